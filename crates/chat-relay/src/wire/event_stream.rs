use crate::errors::DecodeError;
use crate::model::ProviderChannel;

use super::{Delta, UpstreamFrame, WireFormat, parse_json_line};

const DONE_SENTINEL: &str = "[DONE]";

/// `text/event-stream` framing used by OpenAI-compatible chat completions.
///
/// Only `data:` payloads matter; comments and the other SSE fields are
/// dropped. `data: [DONE]` ends the stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct EventStreamFormat;

impl WireFormat for EventStreamFormat {
    fn channel(&self) -> ProviderChannel {
        ProviderChannel::OpenAiCompatible
    }

    fn decode_line(&self, line: &str) -> Result<Option<UpstreamFrame>, DecodeError> {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }
        let payload = match line.strip_prefix("data:") {
            Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
            None if is_sse_field(line) => return Ok(None),
            None => line,
        };
        if payload.trim().is_empty() {
            return Ok(None);
        }
        if payload.trim() == DONE_SENTINEL {
            return Ok(Some(UpstreamFrame::Done));
        }
        parse_json_line(self.channel(), payload).map(|value| Some(UpstreamFrame::Json(value)))
    }

    fn extract_delta(&self, frame: &UpstreamFrame) -> Result<Delta, String> {
        let value = match frame {
            UpstreamFrame::Done => return Ok(Delta::terminal()),
            UpstreamFrame::Json(value) => value,
        };
        if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .or_else(|| error.as_str())
                .unwrap_or("upstream reported an error");
            return Err(message.to_string());
        }
        let text = value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("delta"))
            .and_then(|d| d.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default();
        Ok(Delta::text(text))
    }
}

fn is_sse_field(line: &str) -> bool {
    ["event:", "id:", "retry:"]
        .iter()
        .any(|field| line.starts_with(field))
}
