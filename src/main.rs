use std::io::Write;

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use corpus_chat::config::Config;
use corpus_chat::models::{ChatEvent, ChatRequest, Passage, SOURCE_KEY};
use corpus_chat::retrieval::StrategyKind;
use corpus_chat::search::vector::DocumentIndex;
use corpus_chat::state::AppState;

const HELP: &str = "Commands:\n  \
/strategy <id>   start a new session with another retrieval strategy\n  \
/ingest <path>   index a text file as a parent document\n  \
/reset           forget the conversation\n  \
/quit            exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so answers on stdout stay clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("LLM provider: {} ({})", config.llm.provider, config.llm.base_url);
    tracing::info!(
        "Embedding provider: {} ({})",
        config.embedding.provider,
        config.embedding.base_url
    );

    let state = AppState::connect(config.clone()).await?;
    tracing::info!("{} passages indexed", state.vectors.len());

    let mut strategy = config.strategy.strategy_id.clone();
    let mut session_id = Uuid::new_v4().to_string();
    println!("corpus-chat ready (strategy: {strategy}). Type /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/help", _) => println!("{HELP}"),
            ("/reset", _) => {
                state.end_session(&session_id);
                session_id = Uuid::new_v4().to_string();
                println!("Conversation cleared.");
            }
            ("/strategy", id) => {
                let id = id.trim();
                if StrategyKind::parse(id).is_none() {
                    let known: Vec<&str> = StrategyKind::ALL.iter().map(|k| k.id()).collect();
                    println!("Unknown strategy '{id}'. Known: {}", known.join(", "));
                    continue;
                }
                state.end_session(&session_id);
                session_id = Uuid::new_v4().to_string();
                strategy = id.to_string();
                println!("Now using {strategy}.");
            }
            ("/ingest", path) => {
                let path = path.trim();
                match tokio::fs::read_to_string(path).await {
                    Ok(text) => {
                        let parent = Passage::new(Uuid::new_v4().to_string(), text)
                            .with_metadata(SOURCE_KEY, path);
                        match state.ingest(parent).await {
                            Ok(n) => println!("Indexed {n} chunks from {path}."),
                            Err(e) => eprintln!("Ingest failed: {e}"),
                        }
                    }
                    Err(e) => eprintln!("Cannot read {path}: {e}"),
                }
            }
            _ => {
                let request = ChatRequest {
                    query: line.to_string(),
                    strategy_id: Some(strategy.clone()),
                    session_id: session_id.clone(),
                };
                let mut events = Box::pin(state.chat(request));
                while let Some(event) = events.next().await {
                    match event {
                        ChatEvent::Chunk(text) => {
                            print!("{text}");
                            std::io::stdout().flush()?;
                        }
                        ChatEvent::Error(message) => eprintln!("\nerror: {message}"),
                    }
                }
                println!();
            }
        }
    }

    Ok(())
}
