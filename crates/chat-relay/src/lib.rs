//! Streaming chat relay.
//!
//! A turn appends the user's message to a stored session, streams the reply
//! from an OpenAI- or Ollama-compatible upstream, forwards it as normalized
//! client events, and persists the text that was actually delivered.
//!
//! # Streaming a turn
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chat_relay::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), RelayError> {
//! let store = Arc::new(FileSessionStore::open("./sessions").await?);
//! let session = store.create_session(Some("demo"), None).await?;
//!
//! let config = RelayConfig::from_env()?;
//! let provider = HttpProviderClient::new(EndpointConfig::from_env(config.channel))?;
//! let relay = Relay::new(store, Arc::new(provider));
//!
//! let mut turn = relay
//!     .turn(session.id, config)
//!     .user_text("Say hello")
//!     .start_stream()
//!     .await?;
//! while let Some(event) = turn.next_event().await {
//!     print!("{}", event.to_wire());
//! }
//! let report = turn.finish().await?;
//! println!("stored {} chars", report.reply.len());
//! # Ok(())
//! # }
//! ```

/// Reply text accumulated during one turn.
pub mod accumulator;
/// Relay and provider endpoint configuration.
pub mod config;
/// Public error types.
pub mod errors;
/// Conversation messages, session ids and provider channels.
pub mod model;
/// Tracing subscriber setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Provider client contract.
pub mod provider;
/// Turn orchestration: builder, streaming handle and cancellation.
pub mod relay;
/// Session store contract and bundled stores.
pub mod store;
/// Normalized client events and their wire encoding.
pub mod stream;
/// HTTP provider client.
pub mod vendors;
/// Upstream wire shapes and the frame stream.
pub mod wire;

pub use accumulator::StreamAccumulator;
pub use config::{EndpointConfig, RelayConfig, default_model};
pub use errors::{DecodeError, ProviderError, RelayError, StoreError, TurnFailure};
pub use model::{Message, ProviderChannel, Role, SessionId};
pub use observability::init_observability;
pub use provider::{ByteStream, ProviderClient, ProviderRequest};
pub use relay::{AbortHandle, Relay, TurnBuilder, TurnReport, TurnStream};
pub use store::{
    FileSessionStore, InMemorySessionStore, SessionRecord, SessionStore, SessionSummary,
};
pub use stream::{DONE_FRAME, NormalizedEvent};
pub use vendors::HttpProviderClient;
