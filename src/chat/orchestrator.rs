use futures_util::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::chat::memory::ConversationMemory;
use crate::chat::prompt::{
    build_context_block, build_refinement_prompt, clean_question, collect_sources, PromptTemplate,
};
use crate::config::StrategyConfig;
use crate::error::{RagError, RagResult};
use crate::llm::backend::{LanguageModel, TokenStream};
use crate::llm::reasoning::{strip_reasoning, ReasoningFilter};
use crate::models::{ChatEvent, RetrievalResult, ScoredPassage, Turn};
use crate::retrieval::{dispatch, RetrievalAlgorithm, RetrievalContext, StrategyKind};

/// Everything the backend needs for one answer. Built per turn, consumed once.
pub struct GenerationRequest {
    prompt: String,
    memory: Vec<Turn>,
    passages: RetrievalResult,
}

impl GenerationRequest {
    pub fn new(
        template: &PromptTemplate,
        passages: RetrievalResult,
        memory: &ConversationMemory,
        question: &str,
    ) -> Self {
        let prompt = template.render(&build_context_block(&passages), question);
        Self {
            prompt,
            memory: memory.turns().to_vec(),
            passages,
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn passages(&self) -> &[ScoredPassage] {
        &self.passages
    }

    pub async fn send(self, model: &dyn LanguageModel) -> RagResult<TokenStream> {
        model
            .generate_stream(&self.prompt, &self.memory)
            .await
            .map_err(|e| RagError::Generation(format!("{e:#}")))
    }
}

/// One chat session: a fixed retrieval strategy, a prompt template and the
/// dialogue memory the strategy's answers build on.
pub struct Conversation {
    ctx: Arc<RetrievalContext>,
    algorithm: Arc<dyn RetrievalAlgorithm>,
    config: StrategyConfig,
    template: PromptTemplate,
    memory: ConversationMemory,
    refine_sources: bool,
}

/// One step of a chat turn: an answer event, or the finished exchange once
/// the whole answer has been produced.
#[derive(Debug)]
pub enum TurnStep {
    Event(ChatEvent),
    Complete(Exchange),
}

/// A finished question/answer pair, not yet in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
}

enum Phase {
    Start,
    Streaming {
        tokens: TokenStream,
        filter: ReasoningFilter,
        answer: String,
    },
    Buffered {
        units: VecDeque<String>,
        answer: String,
    },
    Finishing {
        answer: String,
    },
    Done,
}

struct Turning<'a> {
    conv: &'a Conversation,
    question: String,
    phase: Phase,
}

impl Turning<'_> {
    async fn next_step(&mut self) -> Option<TurnStep> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Start => {
                    if self.question.is_empty() {
                        return Some(TurnStep::Event(ChatEvent::Error(
                            "query is empty".to_string(),
                        )));
                    }
                    match self.conv.start(&self.question).await {
                        Ok(phase) => self.phase = phase,
                        Err(e) => {
                            tracing::warn!("Chat turn failed: {e}");
                            return Some(TurnStep::Event(ChatEvent::Error(e.to_string())));
                        }
                    }
                }
                Phase::Streaming {
                    mut tokens,
                    mut filter,
                    mut answer,
                } => match tokens.next().await {
                    Some(Ok(chunk)) => {
                        let text = filter.push(&chunk);
                        answer.push_str(&text);
                        self.phase = Phase::Streaming {
                            tokens,
                            filter,
                            answer,
                        };
                        if !text.is_empty() {
                            return Some(TurnStep::Event(ChatEvent::Chunk(text)));
                        }
                    }
                    Some(Err(e)) => {
                        let err = RagError::Generation(format!("{e:#}"));
                        tracing::warn!("Answer stream failed: {err}");
                        return Some(TurnStep::Event(ChatEvent::Error(err.to_string())));
                    }
                    None => {
                        let tail = filter.finish();
                        answer.push_str(&tail);
                        self.phase = Phase::Finishing {
                            answer: answer.trim_end().to_string(),
                        };
                        if !tail.is_empty() {
                            return Some(TurnStep::Event(ChatEvent::Chunk(tail)));
                        }
                    }
                },
                Phase::Buffered { mut units, answer } => match units.pop_front() {
                    Some(unit) => {
                        tokio::task::yield_now().await;
                        self.phase = if units.is_empty() {
                            Phase::Finishing { answer }
                        } else {
                            Phase::Buffered { units, answer }
                        };
                        return Some(TurnStep::Event(ChatEvent::Chunk(unit)));
                    }
                    None => self.phase = Phase::Finishing { answer },
                },
                Phase::Finishing { answer } => {
                    return Some(TurnStep::Complete(Exchange {
                        question: std::mem::take(&mut self.question),
                        answer,
                    }));
                }
                Phase::Done => return None,
            }
        }
    }
}

impl Conversation {
    /// Unknown strategy ids fall back to similarity; invalid parameters are rejected.
    pub fn new(ctx: Arc<RetrievalContext>, config: StrategyConfig) -> RagResult<Self> {
        config.validate()?;
        let algorithm = dispatch(&config.strategy_id);
        Ok(Self {
            ctx,
            algorithm,
            config,
            template: PromptTemplate::default(),
            memory: ConversationMemory::new(),
            refine_sources: false,
        })
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    /// Buffer each answer and run a second model pass that weaves the
    /// retrieved source links into it before streaming.
    pub fn with_source_refinement(mut self, enabled: bool) -> Self {
        self.refine_sources = enabled;
        self
    }

    pub fn strategy(&self) -> StrategyKind {
        self.algorithm.kind()
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn reset(&mut self) {
        self.memory.clear();
    }

    /// Answer `query` as a stream of events.
    ///
    /// Any failure yields a single [`ChatEvent::Error`] and ends the stream.
    /// The exchange is committed to memory only when the stream is polled to
    /// its end; a stream dropped earlier leaves memory untouched.
    pub fn respond<'a>(&'a mut self, query: &str) -> impl Stream<Item = ChatEvent> + Send + 'a {
        let question = clean_question(query);
        stream::unfold((self, question, Phase::Start), |(conv, question, phase)| async move {
            let mut turning = Turning {
                conv: &*conv,
                question,
                phase,
            };
            let step = turning.next_step().await;
            let Turning { question, phase, .. } = turning;
            match step {
                Some(TurnStep::Event(event)) => Some((event, (conv, question, phase))),
                Some(TurnStep::Complete(exchange)) => {
                    conv.commit(exchange);
                    None
                }
                None => None,
            }
        })
    }

    /// Like [`respond`](Self::respond), but hands the finished exchange back
    /// as [`TurnStep::Complete`] instead of committing it. The caller decides
    /// when the answer has really been delivered and then calls
    /// [`commit`](Self::commit).
    pub fn turn<'a>(&'a self, query: &str) -> impl Stream<Item = TurnStep> + Send + 'a {
        let turning = Turning {
            conv: self,
            question: clean_question(query),
            phase: Phase::Start,
        };
        stream::unfold(turning, |mut t| async move {
            let step = t.next_step().await?;
            Some((step, t))
        })
    }

    pub fn commit(&mut self, exchange: Exchange) {
        self.memory.commit_exchange(&exchange.question, &exchange.answer);
    }

    async fn start(&self, question: &str) -> RagResult<Phase> {
        let passages = self
            .algorithm
            .retrieve(&self.ctx, question, &self.config)
            .await?;
        tracing::info!(
            "Strategy {} retrieved {} passages",
            self.algorithm.kind(),
            passages.len()
        );

        let model = self.ctx.model.as_ref();
        let sources = collect_sources(&passages);
        let request = GenerationRequest::new(&self.template, passages, &self.memory, question);
        let tokens = request.send(model).await?;

        if !self.refine_sources {
            return Ok(Phase::Streaming {
                tokens,
                filter: ReasoningFilter::new(),
                answer: String::new(),
            });
        }

        let draft = collect_answer(tokens).await?;
        let answer = if draft.is_empty() || sources.is_empty() {
            draft
        } else {
            let refined = model
                .complete(&build_refinement_prompt(&draft, &sources))
                .await
                .map_err(|e| RagError::Generation(format!("{e:#}")))?;
            let refined = strip_reasoning(&refined);
            if refined.is_empty() {
                draft
            } else {
                refined
            }
        };

        Ok(Phase::Buffered {
            units: split_units(&answer),
            answer,
        })
    }
}

async fn collect_answer(mut tokens: TokenStream) -> RagResult<String> {
    let mut raw = String::new();
    while let Some(chunk) = tokens.next().await {
        raw.push_str(&chunk.map_err(|e| RagError::Generation(format!("{e:#}")))?);
    }
    Ok(strip_reasoning(&raw))
}

/// Word-sized pieces that concatenate back to `text`.
fn split_units(text: &str) -> VecDeque<String> {
    text.split_inclusive(char::is_whitespace)
        .map(str::to_string)
        .collect()
}
