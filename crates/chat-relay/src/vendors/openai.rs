use crate::provider::ProviderRequest;

pub(crate) const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
pub(crate) const ACCEPT: &str = "text/event-stream";

/// Chat-completions body with streaming on.
///
/// The context window has no counterpart in this API and is not sent.
pub(crate) fn build_request_body(req: &ProviderRequest) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": req.model,
        "messages": req.messages,
        "stream": true,
    });
    if let Some(max_tokens) = req.max_output_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    body
}
