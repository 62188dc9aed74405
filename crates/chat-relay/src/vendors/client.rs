use std::time::Duration;

use futures::TryStreamExt as _;
use tracing::debug;

use crate::config::EndpointConfig;
use crate::errors::{ProviderError, RelayError};
use crate::model::ProviderChannel;
use crate::provider::{ByteStream, ProviderClient, ProviderRequest};

use super::{ollama, openai};

const MAX_ERROR_BODY_CHARS: usize = 2_000;
const ERROR_BODY_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Streams chat replies from an OpenAI- or Ollama-compatible HTTP endpoint.
///
/// Only connecting and reading an error body are time-bounded here. Waiting
/// for response headers and idle gaps while streaming are policed by the
/// relay. Dropping the returned byte stream closes the connection.
pub struct HttpProviderClient {
    client: reqwest::Client,
    endpoint: EndpointConfig,
}

impl HttpProviderClient {
    pub fn new(endpoint: EndpointConfig) -> Result<Self, RelayError> {
        if endpoint.base_url.trim().is_empty() {
            return Err(RelayError::Config("provider base_url must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(endpoint.connect_timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait::async_trait]
impl ProviderClient for HttpProviderClient {
    async fn open_stream(&self, request: ProviderRequest) -> Result<ByteStream, ProviderError> {
        let channel = request.channel;
        let (url, accept, body) = match channel {
            ProviderChannel::OpenAiCompatible => (
                self.endpoint.url(openai::CHAT_COMPLETIONS_PATH),
                openai::ACCEPT,
                openai::build_request_body(&request),
            ),
            ProviderChannel::OllamaCompatible => (
                self.endpoint.url(ollama::CHAT_PATH),
                ollama::ACCEPT,
                ollama::build_request_body(&request),
            ),
        };
        debug!(
            turn_id = %request.turn_id,
            provider = %channel,
            model = %request.model,
            messages = request.messages.len(),
            %url,
            "opening upstream stream"
        );

        let mut http_req = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, accept)
            .json(&body);
        if let Some(api_key) = self.endpoint.api_key.as_deref() {
            http_req = http_req.bearer_auth(api_key);
        }

        let response = http_req.send().await.map_err(|e| {
            ProviderError::connection(channel, format!("request to {url} failed: {e}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = match tokio::time::timeout(ERROR_BODY_READ_TIMEOUT, response.text()).await {
                Ok(Ok(body)) => body,
                Ok(Err(_)) => "<unreadable body>".to_string(),
                Err(_) => "<error body not received in time>".to_string(),
            };
            return Err(ProviderError::status(
                channel,
                status.as_u16(),
                truncate(body.trim(), MAX_ERROR_BODY_CHARS),
            ));
        }

        let stream = response
            .bytes_stream()
            .map_err(move |e| ProviderError::connection(channel, format!("stream read failed: {e}")));
        Ok(Box::pin(stream))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Message;
    use crate::wire::{UpstreamItem, upstream_items, wire_format};
    use futures::StreamExt as _;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    struct CapturedRequest {
        head: String,
        body: serde_json::Value,
    }

    /// Serves exactly one HTTP response and reports the request it saw.
    async fn serve_once(response: String) -> (String, oneshot::Receiver<CapturedRequest>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut raw = Vec::new();
            let mut buf = [0_u8; 4096];
            let (head, body) = loop {
                let n = socket.read(&mut buf).await.expect("read");
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let head = text[..split].to_string();
                    let length = head
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + length {
                        break (head, raw[split + 4..split + 4 + length].to_vec());
                    }
                }
                if n == 0 {
                    panic!("client closed before sending a full request");
                }
            };
            let _ = tx.send(CapturedRequest {
                head,
                body: serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null),
            });
            socket
                .write_all(response.as_bytes())
                .await
                .expect("write response");
            let _ = socket.shutdown().await;
        });
        (format!("http://{addr}"), rx)
    }

    fn streaming_response(content_type: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\ncontent-type: {content_type}\r\nconnection: close\r\n\r\n{body}"
        )
    }

    fn request(channel: ProviderChannel) -> ProviderRequest {
        ProviderRequest {
            turn_id: uuid::Uuid::new_v4(),
            channel,
            model: "m".into(),
            context_window: Some(2048),
            max_output_tokens: Some(64),
            messages: vec![Message::user("hello")],
        }
    }

    async fn deltas(channel: ProviderChannel, bytes: ByteStream) -> Vec<UpstreamItem> {
        upstream_items(wire_format(channel), bytes, None)
            .map(|item| item.expect("upstream item"))
            .collect()
            .await
    }

    #[tokio::test]
    async fn openai_compatible_stream_over_http() {
        let (base_url, captured) = serve_once(streaming_response(
            "text/event-stream",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
             data: [DONE]\n\n",
        ))
        .await;
        let client =
            HttpProviderClient::new(EndpointConfig::new(base_url).api_key("sk-test")).expect("client");

        let bytes = client
            .open_stream(request(ProviderChannel::OpenAiCompatible))
            .await
            .expect("open");
        assert_eq!(
            deltas(ProviderChannel::OpenAiCompatible, bytes).await,
            vec![
                UpstreamItem::Delta("Hel".into()),
                UpstreamItem::Delta("lo".into()),
                UpstreamItem::End
            ]
        );

        let seen = captured.await.expect("captured");
        assert!(seen.head.starts_with("POST /v1/chat/completions "));
        assert!(seen.head.to_ascii_lowercase().contains("authorization: bearer sk-test"));
        assert_eq!(seen.body["max_tokens"], 64);
        assert_eq!(seen.body["messages"][0]["content"], "hello");
    }

    #[tokio::test]
    async fn ollama_compatible_stream_over_http() {
        let (base_url, captured) = serve_once(streaming_response(
            "application/x-ndjson",
            "{\"message\":{\"content\":\"Hi\"},\"done\":false}\n{\"message\":{\"content\":\"\"},\"done\":true}\n",
        ))
        .await;
        let client = HttpProviderClient::new(EndpointConfig::new(base_url)).expect("client");

        let bytes = client
            .open_stream(request(ProviderChannel::OllamaCompatible))
            .await
            .expect("open");
        assert_eq!(
            deltas(ProviderChannel::OllamaCompatible, bytes).await,
            vec![UpstreamItem::Delta("Hi".into()), UpstreamItem::End]
        );

        let seen = captured.await.expect("captured");
        assert!(seen.head.starts_with("POST /api/chat "));
        assert!(!seen.head.to_ascii_lowercase().contains("authorization:"));
        assert_eq!(seen.body["options"]["num_ctx"], 2048);
    }

    #[tokio::test]
    async fn non_success_status_is_status_error() {
        let body = "{\"error\":{\"message\":\"bad key\"}}";
        let (base_url, _captured) = serve_once(format!(
            "HTTP/1.1 401 Unauthorized\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        ))
        .await;
        let client = HttpProviderClient::new(EndpointConfig::new(base_url)).expect("client");

        let err = match client
            .open_stream(request(ProviderChannel::OpenAiCompatible))
            .await
        {
            Ok(_) => panic!("401 should fail"),
            Err(err) => err,
        };
        assert_eq!(
            err,
            ProviderError::status(ProviderChannel::OpenAiCompatible, 401, body)
        );
    }

    #[tokio::test]
    async fn refused_connection_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let client =
            HttpProviderClient::new(EndpointConfig::new(format!("http://{addr}"))).expect("client");

        let result = client
            .open_stream(request(ProviderChannel::OllamaCompatible))
            .await;
        assert!(matches!(result, Err(ProviderError::Connection { .. })));
    }

    #[test]
    fn empty_base_url_is_rejected() {
        assert!(matches!(
            HttpProviderClient::new(EndpointConfig::new(" ")),
            Err(RelayError::Config(_))
        ));
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        assert_eq!(truncate("abcdef", 3), "abc…");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
