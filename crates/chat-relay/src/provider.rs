use std::pin::Pin;

use crate::errors::ProviderError;
use crate::model::{Message, ProviderChannel};

/// Raw upstream response body as it arrives from the transport.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, ProviderError>> + Send + 'static>>;

/// Everything a provider client needs to open one upstream stream.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderRequest {
    pub turn_id: uuid::Uuid,
    pub channel: ProviderChannel,
    pub model: String,
    /// Token bound for prompt plus reply, forwarded where the provider accepts it.
    pub context_window: Option<u32>,
    pub max_output_tokens: Option<u32>,
    /// Full history, newest user message last.
    pub messages: Vec<Message>,
}

/// Opens upstream inference streams.
///
/// Implementations must fail with [`ProviderError::Connection`] or
/// [`ProviderError::Status`] when the initial handshake does not succeed, and
/// must abort the upstream request when the returned stream is dropped.
#[async_trait::async_trait]
pub trait ProviderClient: Send + Sync {
    async fn open_stream(&self, request: ProviderRequest) -> Result<ByteStream, ProviderError>;
}
