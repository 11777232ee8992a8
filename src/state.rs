use futures_util::stream::{self, Stream, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};

use crate::chat::{Conversation, Exchange, TurnStep};
use crate::chunking::TextSplitter;
use crate::config::Config;
use crate::error::{RagError, RagResult};
use crate::llm::backend::{connect_backend, LanguageModel};
use crate::llm::embeddings::{connect_embedder, Embedder};
use crate::llm::retry::RetryPolicy;
use crate::models::{ChatEvent, ChatRequest, Passage};
use crate::retrieval::{RetrievalContext, StrategyKind};
use crate::search::parent::ParentStore;
use crate::search::vector::VectorStore;

const MAX_CONCURRENT_CHATS: usize = 3;

/// An event on its way to the caller, with a signal fired once it is taken.
type Delivery = (ChatEvent, oneshot::Sender<()>);

struct Session {
    strategy: StrategyKind,
    conversation: Arc<Mutex<Conversation>>,
}

/// Shared application state.
///
/// Sessions are created on first use and live until [`AppState::end_session`]
/// is called. The front-end owns their teardown; a session it never ends keeps
/// its conversation memory for the life of the process.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub vectors: Arc<VectorStore>,
    pub parents: Arc<ParentStore>,
    pub retrieval: Arc<RetrievalContext>,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    chat_semaphore: Arc<Semaphore>,
}

impl AppState {
    /// Open the stores and wait for both backends to become ready.
    pub async fn connect(config: Config) -> RagResult<Self> {
        config.strategy.validate()?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| RagError::Configuration(format!("HTTP client: {e}")))?;
        let policy = RetryPolicy::from(config.retry.clone());

        let (model, embedder) = tokio::try_join!(
            connect_backend(http_client.clone(), &config.llm, policy),
            connect_embedder(http_client, &config.embedding, policy),
        )?;
        tracing::info!(
            "Chat backend {} ready; embeddings have {} dimensions",
            model.name(),
            embedder.dim()
        );

        let vectors = VectorStore::open_or_create(&config.index_dir())
            .map_err(|e| RagError::Index(format!("{e:#}")))?;
        let parents = ParentStore::open_or_create(&config.parents_path())
            .map_err(|e| RagError::Index(format!("{e:#}")))?;

        Ok(Self::from_parts(
            config,
            Arc::new(vectors),
            Arc::new(parents),
            embedder,
            model,
        ))
    }

    pub fn from_parts(
        config: Config,
        vectors: Arc<VectorStore>,
        parents: Arc<ParentStore>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        let retrieval = RetrievalContext::new(vectors.clone(), embedder, model)
            .with_parents(parents.clone());
        Self {
            config,
            vectors,
            parents,
            retrieval: Arc::new(retrieval),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            chat_semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_CHATS)),
        }
    }

    /// Answer one chat request as a stream of events.
    ///
    /// Generation runs in its own task and is stopped as soon as the returned
    /// stream is dropped. The turn is committed to memory only after the
    /// caller has taken every event of the answer.
    pub fn chat(&self, request: ChatRequest) -> impl Stream<Item = ChatEvent> + Send + 'static {
        let (tx, rx) = mpsc::channel::<Delivery>(1);

        match self.session(&request) {
            Err(e) => {
                let (taken, _) = oneshot::channel();
                let _ = tx.try_send((ChatEvent::Error(e.to_string()), taken));
            }
            Ok(conversation) => {
                let semaphore = self.chat_semaphore.clone();
                let query = request.query;
                tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return;
                    };
                    let mut conversation = conversation.lock_owned().await;
                    let delivered = deliver(&tx, conversation.turn(&query)).await;
                    if let Some(exchange) = delivered {
                        conversation.commit(exchange);
                    }
                });
            }
        }

        stream::unfold(rx, |mut rx| async move {
            let (event, taken) = rx.recv().await?;
            let _ = taken.send(());
            Some((event, rx))
        })
    }

    /// Drop a session and its memory. Returns whether it existed.
    pub fn end_session(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Number of committed memory turns, waiting for any running answer.
    pub async fn session_turns(&self, session_id: &str) -> Option<usize> {
        let conversation = self
            .sessions
            .read()
            .get(session_id)
            .map(|s| s.conversation.clone())?;
        let guard = conversation.lock().await;
        Some(guard.memory().len())
    }

    /// Index a parent document as child chunks and drop the lexical snapshot
    /// so hybrid retrieval sees the new text.
    pub async fn ingest(&self, parent: Passage) -> RagResult<usize> {
        let splitter = TextSplitter::new(
            self.config.strategy.chunk_size,
            self.config.strategy.chunk_overlap,
        )?;
        let count = self
            .parents
            .ingest(
                parent,
                &splitter,
                self.retrieval.embedder.as_ref(),
                &self.vectors,
            )
            .await?;
        self.retrieval.lexical.invalidate().await;
        Ok(count)
    }

    fn session(&self, request: &ChatRequest) -> RagResult<Arc<Mutex<Conversation>>> {
        if request.session_id.trim().is_empty() {
            return Err(RagError::Configuration("session_id is required".to_string()));
        }

        if let Some(session) = self.sessions.read().get(&request.session_id) {
            if let Some(id) = &request.strategy_id {
                let requested = StrategyKind::parse(id).unwrap_or(StrategyKind::Similarity);
                if requested != session.strategy {
                    tracing::warn!(
                        "Session {} keeps strategy {}; ignoring request for '{id}'",
                        request.session_id,
                        session.strategy
                    );
                }
            }
            return Ok(session.conversation.clone());
        }

        let mut config = self.config.strategy.clone();
        if let Some(id) = &request.strategy_id {
            config = config.with_strategy(id.clone());
        }
        let conversation = Conversation::new(self.retrieval.clone(), config)?
            .with_source_refinement(self.config.refine_sources);
        let strategy = conversation.strategy();

        let mut sessions = self.sessions.write();
        let session = sessions
            .entry(request.session_id.clone())
            .or_insert_with(|| {
                tracing::info!("New session {} using {strategy}", request.session_id);
                Session {
                    strategy,
                    conversation: Arc::new(Mutex::new(conversation)),
                }
            });
        Ok(session.conversation.clone())
    }
}

/// Relay a turn's events to the caller one at a time, waiting until each
/// has been taken. Returns the finished exchange only if the caller received
/// the whole answer.
async fn deliver<S>(tx: &mpsc::Sender<Delivery>, steps: S) -> Option<Exchange>
where
    S: Stream<Item = TurnStep>,
{
    futures_util::pin_mut!(steps);
    loop {
        let step = tokio::select! {
            _ = tx.closed() => None,
            step = steps.next() => step,
        };
        match step? {
            TurnStep::Event(event) => {
                let (taken, received) = oneshot::channel();
                if tx.send((event, taken)).await.is_err() || received.await.is_err() {
                    tracing::info!("Chat consumer went away, stopping generation");
                    return None;
                }
            }
            TurnStep::Complete(exchange) => return Some(exchange),
        }
    }
}
