//! Common imports for embedding the relay.
pub use crate::{
    AbortHandle, EndpointConfig, FileSessionStore, HttpProviderClient, InMemorySessionStore,
    Message, NormalizedEvent, ProviderChannel, Relay, RelayConfig, RelayError, SessionId,
    SessionStore, TurnFailure, TurnReport, TurnStream,
};
