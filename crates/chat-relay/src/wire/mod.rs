//! Upstream wire decoding.
//!
//! Providers stream replies in one of two shapes. Each shape is a
//! [`WireFormat`] implementation that turns a decoded line into an
//! [`UpstreamFrame`] and a frame into a normalized [`Delta`]. The format is
//! picked once per turn from the configured [`ProviderChannel`] so the relay
//! loop never branches on provider kind.

pub mod decoder;
pub mod event_stream;
pub mod frames;
pub mod ndjson;

pub use decoder::LineDecoder;
pub use event_stream::EventStreamFormat;
pub use frames::{UpstreamItem, upstream_items};
pub use ndjson::NdjsonFormat;

use crate::errors::DecodeError;
use crate::model::ProviderChannel;

/// One decoded unit of a provider stream.
#[derive(Clone, Debug, PartialEq)]
pub enum UpstreamFrame {
    /// A provider-native JSON object.
    Json(serde_json::Value),
    /// The event-stream `[DONE]` sentinel.
    Done,
}

/// Normalized content of one frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delta {
    /// Reply text carried by the frame; empty when the frame has none.
    pub text: String,
    /// Whether the frame ends the stream.
    pub terminal: bool,
}

impl Delta {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            terminal: false,
        }
    }

    pub fn terminal() -> Self {
        Self {
            text: String::new(),
            terminal: true,
        }
    }
}

/// Provider-specific framing and field paths.
pub trait WireFormat: Send + Sync {
    /// Provider channel this format decodes.
    fn channel(&self) -> ProviderChannel;

    /// Decodes one line. `Ok(None)` means the line carries no frame
    /// (blank lines, comments, non-data fields).
    fn decode_line(&self, line: &str) -> Result<Option<UpstreamFrame>, DecodeError>;

    /// Maps a frame to its delta. Missing optional fields yield an empty,
    /// non-terminal delta. `Err` carries an in-band provider error message.
    fn extract_delta(&self, frame: &UpstreamFrame) -> Result<Delta, String>;
}

/// Returns the wire format used by `channel`.
pub fn wire_format(channel: ProviderChannel) -> &'static dyn WireFormat {
    match channel {
        ProviderChannel::OpenAiCompatible => &EventStreamFormat,
        ProviderChannel::OllamaCompatible => &NdjsonFormat,
    }
}

pub(crate) fn parse_json_line(
    channel: ProviderChannel,
    line: &str,
) -> Result<serde_json::Value, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| DecodeError::new(channel, format!("invalid JSON: {e}"), line))?;
    if !value.is_object() {
        return Err(DecodeError::new(channel, "frame is not a JSON object", line));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_matches_channel() {
        for channel in [
            ProviderChannel::OpenAiCompatible,
            ProviderChannel::OllamaCompatible,
        ] {
            assert_eq!(wire_format(channel).channel(), channel);
        }
    }

    #[test]
    fn non_object_json_is_a_decode_error() {
        let err = parse_json_line(ProviderChannel::OllamaCompatible, "[1,2]")
            .expect_err("array frame");
        assert_eq!(err.line, "[1,2]");
    }
}
