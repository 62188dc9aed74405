use crate::provider::ProviderRequest;

pub(crate) const CHAT_PATH: &str = "/api/chat";
pub(crate) const ACCEPT: &str = "application/x-ndjson";

/// `/api/chat` body. Token limits go under `options` as `num_ctx` and
/// `num_predict`.
pub(crate) fn build_request_body(req: &ProviderRequest) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": req.model,
        "messages": req.messages,
        "stream": true,
    });
    let mut options = serde_json::Map::new();
    if let Some(num_ctx) = req.context_window {
        options.insert("num_ctx".into(), serde_json::json!(num_ctx));
    }
    if let Some(num_predict) = req.max_output_tokens {
        options.insert("num_predict".into(), serde_json::json!(num_predict));
    }
    if !options.is_empty() {
        body["options"] = serde_json::Value::Object(options);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Message, ProviderChannel};

    fn request(context_window: Option<u32>, max_output_tokens: Option<u32>) -> ProviderRequest {
        ProviderRequest {
            turn_id: uuid::Uuid::new_v4(),
            channel: ProviderChannel::OllamaCompatible,
            model: "llama3".into(),
            context_window,
            max_output_tokens,
            messages: vec![Message::system("be brief"), Message::user("hi")],
        }
    }

    #[test]
    fn limits_go_under_options() {
        let body = build_request_body(&request(Some(8192), Some(128)));
        assert_eq!(body["options"]["num_ctx"], 8192);
        assert_eq!(body["options"]["num_predict"], 128);
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[test]
    fn options_omitted_without_limits() {
        let body = build_request_body(&request(None, None));
        assert!(body.get("options").is_none());
        assert_eq!(body["stream"], true);
    }
}
