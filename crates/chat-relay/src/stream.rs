use bytes::Bytes;

use crate::errors::TurnFailure;

/// Literal terminator frame sent after the last delta.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Client-facing events. This is the only vocabulary a client sees,
/// whichever provider produced the reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NormalizedEvent {
    /// Incremental reply text, in upstream order.
    Delta { text: String },
    /// Terminal success.
    Done,
    /// Terminal failure.
    Error { failure: TurnFailure },
}

#[derive(serde::Serialize)]
struct DeltaPayload<'a> {
    delta: &'a str,
}

#[derive(serde::Serialize)]
struct ErrorPayload {
    error: String,
}

impl NormalizedEvent {
    /// Returns true for `Done` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }

    /// Encodes the event as one client wire frame.
    ///
    /// `data: {"delta":"..."}\n\n`, `data: [DONE]\n\n`, or
    /// `data: {"error":"..."}\n\n`.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Delta { text } => data_frame(&DeltaPayload { delta: text }),
            Self::Done => DONE_FRAME.to_string(),
            Self::Error { failure } => data_frame(&ErrorPayload {
                error: failure.to_string(),
            }),
        }
    }

    /// Same as [`to_wire`](Self::to_wire), as bytes for a response body.
    pub fn to_wire_bytes(&self) -> Bytes {
        Bytes::from(self.to_wire())
    }
}

fn data_frame<T: serde::Serialize>(payload: &T) -> String {
    // Serializing a struct of strings cannot fail.
    let json = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    format!("data: {json}\n\n")
}
