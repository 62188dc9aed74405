use crate::errors::DecodeError;
use crate::model::ProviderChannel;

use super::{Delta, UpstreamFrame, WireFormat, parse_json_line};

/// Newline-delimited JSON framing used by Ollama-compatible `/api/chat`.
///
/// Every line is a complete object; `"done": true` marks the last one.
#[derive(Clone, Copy, Debug, Default)]
pub struct NdjsonFormat;

impl WireFormat for NdjsonFormat {
    fn channel(&self) -> ProviderChannel {
        ProviderChannel::OllamaCompatible
    }

    fn decode_line(&self, line: &str) -> Result<Option<UpstreamFrame>, DecodeError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        parse_json_line(self.channel(), line).map(|value| Some(UpstreamFrame::Json(value)))
    }

    fn extract_delta(&self, frame: &UpstreamFrame) -> Result<Delta, String> {
        let value = match frame {
            UpstreamFrame::Done => return Ok(Delta::terminal()),
            UpstreamFrame::Json(value) => value,
        };
        if let Some(message) = value.get("error").and_then(|e| e.as_str()) {
            return Err(message.to_string());
        }
        let text = value
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default();
        let terminal = value
            .get("done")
            .and_then(|d| d.as_bool())
            .unwrap_or(false);
        Ok(Delta {
            text: text.to_string(),
            terminal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_of(line: &str) -> Delta {
        let frame = NdjsonFormat
            .decode_line(line)
            .expect("decodes")
            .expect("frame");
        NdjsonFormat.extract_delta(&frame).expect("delta")
    }

    #[test]
    fn extracts_message_content() {
        assert_eq!(
            delta_of(r#"{"model":"llama3","message":{"role":"assistant","content":"Hi"},"done":false}"#),
            Delta::text("Hi")
        );
    }

    #[test]
    fn done_true_is_terminal_and_may_carry_text() {
        assert_eq!(
            delta_of(r#"{"message":{"content":""},"done":true}"#),
            Delta::terminal()
        );
        let last = delta_of(r#"{"message":{"content":"!"},"done":true,"eval_count":12}"#);
        assert_eq!(last.text, "!");
        assert!(last.terminal);
    }

    #[test]
    fn missing_fields_default_to_empty_non_terminal() {
        assert_eq!(delta_of(r#"{"model":"llama3"}"#), Delta::text(""));
        assert_eq!(delta_of(r#"{"done":"yes"}"#), Delta::text(""));
    }

    #[test]
    fn blank_lines_carry_no_frame() {
        assert_eq!(NdjsonFormat.decode_line("   ").expect("decodes"), None);
    }

    #[test]
    fn malformed_line_is_a_decode_error() {
        assert!(NdjsonFormat.decode_line("{\"message\":").is_err());
    }

    #[test]
    fn error_string_is_reported() {
        let frame = NdjsonFormat
            .decode_line(r#"{"error":"model 'x' not found"}"#)
            .expect("decodes")
            .expect("frame");
        assert_eq!(
            NdjsonFormat.extract_delta(&frame),
            Err("model 'x' not found".to_string())
        );
    }
}
