//! Terminal front end: manage stored sessions and stream chat turns.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use chat_relay::config::ENV_MODEL;
use chat_relay::prelude::*;
use chat_relay::{default_model, init_observability};
use clap::{Parser, Subcommand};
use futures::StreamExt as _;
use tokio::io::AsyncWriteExt as _;

/// Stream chat replies from an OpenAI- or Ollama-compatible endpoint.
#[derive(Parser, Debug)]
#[command(name = "chat-relay", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding one JSON document per session.
    #[arg(long, global = true, default_value = "sessions")]
    store_dir: PathBuf,

    /// Provider family (`openai` or `ollama`); overrides CHAT_RELAY_PROVIDER.
    #[arg(long, global = true)]
    provider: Option<ProviderChannel>,

    /// Model identifier; overrides CHAT_RELAY_MODEL.
    #[arg(long, global = true)]
    model: Option<String>,

    /// Provider base URL; overrides CHAT_RELAY_BASE_URL.
    #[arg(long, global = true)]
    base_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty session and print its id.
    New {
        #[arg(long)]
        title: Option<String>,
        /// Session category; defaults to "Instant Chat".
        #[arg(long)]
        category: Option<String>,
    },
    /// List sessions, newest first.
    List,
    /// Print a session's messages.
    Show { session: String },
    /// Remove all messages from a session.
    Clear { session: String },
    /// Send one message and stream the reply.
    Send {
        session: String,
        message: String,
        /// Print the client wire frames instead of plain text.
        #[arg(long)]
        wire: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_observability();

    let cli = Cli::parse();
    let store = FileSessionStore::open(&cli.store_dir)
        .await
        .with_context(|| format!("opening session store at {}", cli.store_dir.display()))?;

    match &cli.command {
        Command::New { title, category } => {
            let record = store
                .create_session(title.as_deref(), category.as_deref())
                .await?;
            println!("{}", record.id);
        }
        Command::List => {
            for session in store.list_sessions().await? {
                println!(
                    "{}\t{}\t{}",
                    session.id,
                    session.created_at.to_rfc3339(),
                    session.title
                );
            }
        }
        Command::Show { session } => {
            let record = store.get(&SessionId::from(session.as_str())).await?;
            println!("# {} ({})", record.title, record.id);
            for message in &record.messages {
                println!("[{}] {}", message.role, message.content);
            }
        }
        Command::Clear { session } => {
            store.clear(&SessionId::from(session.as_str())).await?;
            println!("cleared {session}");
        }
        Command::Send {
            session,
            message,
            wire,
        } => send(&cli, store, session, message, *wire).await?,
    }
    Ok(())
}

fn relay_config(cli: &Cli) -> Result<RelayConfig> {
    let mut config = RelayConfig::from_env().context("reading relay configuration")?;
    if let Some(channel) = cli.provider
        && channel != config.channel
    {
        config.channel = channel;
        if std::env::var_os(ENV_MODEL).is_none() {
            config.model = default_model(channel).to_string();
        }
    }
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn send(
    cli: &Cli,
    store: FileSessionStore,
    session: &str,
    message: &str,
    wire: bool,
) -> Result<()> {
    let config = relay_config(cli)?;
    let mut endpoint = EndpointConfig::from_env(config.channel);
    if let Some(base_url) = &cli.base_url {
        endpoint = endpoint.base_url(base_url.clone());
    }
    let provider = HttpProviderClient::new(endpoint)?;
    let relay = Relay::new(Arc::new(store), Arc::new(provider));

    let turn = relay
        .turn(session, config)
        .user_text(message)
        .start_stream()
        .await?;
    tracing::debug!(session_id = %turn.session_id(), turn_id = %turn.turn_id(), "streaming reply");

    let mut stdout = tokio::io::stdout();
    if wire {
        let mut frames = Box::pin(turn.into_wire_stream());
        while let Some(frame) = frames.next().await {
            stdout.write_all(&frame).await?;
            stdout.flush().await?;
        }
        return Ok(());
    }

    let mut turn = turn;
    while let Some(event) = turn.next_event().await {
        match event {
            NormalizedEvent::Delta { text } => {
                stdout.write_all(text.as_bytes()).await?;
                stdout.flush().await?;
            }
            NormalizedEvent::Done => stdout.write_all(b"\n").await?,
            NormalizedEvent::Error { failure } => {
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
                eprintln!("error: {failure}");
            }
        }
    }
    stdout.flush().await?;
    match turn.finish().await {
        Ok(_) => Ok(()),
        Err(RelayError::TurnFailed(failure)) => Err(anyhow::anyhow!("turn failed: {failure}")),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_with_global_overrides() {
        let cli = Cli::try_parse_from([
            "chat-relay",
            "send",
            "abc",
            "hello there",
            "--wire",
            "--provider",
            "ollama",
            "--model",
            "llama3.1",
        ])
        .expect("parse");
        assert_eq!(cli.provider, Some(ProviderChannel::OllamaCompatible));
        assert_eq!(cli.model.as_deref(), Some("llama3.1"));
        assert_eq!(cli.store_dir, PathBuf::from("sessions"));
        match cli.command {
            Command::Send {
                session,
                message,
                wire,
            } => {
                assert_eq!(session, "abc");
                assert_eq!(message, "hello there");
                assert!(wire);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn new_accepts_title_and_category() {
        let cli = Cli::try_parse_from([
            "chat-relay",
            "new",
            "--title",
            "Trip plans",
            "--category",
            "Travel",
        ])
        .expect("parse");
        match cli.command {
            Command::New { title, category } => {
                assert_eq!(title.as_deref(), Some("Trip plans"));
                assert_eq!(category.as_deref(), Some("Travel"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_provider() {
        assert!(Cli::try_parse_from(["chat-relay", "--provider", "gemini", "list"]).is_err());
    }
}
