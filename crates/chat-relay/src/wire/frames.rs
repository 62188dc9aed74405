use std::collections::VecDeque;
use std::time::Duration;

use futures::StreamExt as _;
use futures::stream;
use tracing::{debug, warn};

use crate::errors::ProviderError;
use crate::provider::ByteStream;

use super::{LineDecoder, WireFormat};

const LOG_EXCERPT_CHARS: usize = 120;

/// Normalized output of an upstream stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpstreamItem {
    /// Non-empty reply text.
    Delta(String),
    /// The provider's terminal signal. Nothing follows it.
    End,
}

struct State {
    format: &'static dyn WireFormat,
    bytes: ByteStream,
    idle_timeout: Option<Duration>,
    decoder: LineDecoder,
    pending: VecDeque<Result<UpstreamItem, ProviderError>>,
    finished: bool,
    skipped: usize,
}

impl State {
    fn accept_line(&mut self, line: &str) {
        let channel = self.format.channel();
        let frame = match self.format.decode_line(line) {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(err) => {
                self.skipped += 1;
                warn!(
                    provider = %channel,
                    error = %err.message,
                    line = %excerpt(&err.line),
                    "skipping malformed upstream frame"
                );
                return;
            }
        };
        match self.format.extract_delta(&frame) {
            Ok(delta) => {
                if !delta.text.is_empty() {
                    self.pending.push_back(Ok(UpstreamItem::Delta(delta.text)));
                }
                if delta.terminal {
                    self.pending.push_back(Ok(UpstreamItem::End));
                    self.finished = true;
                }
            }
            Err(message) => {
                self.pending
                    .push_back(Err(ProviderError::upstream(channel, message)));
                self.finished = true;
            }
        }
    }
}

/// Drives decoder and wire format over `bytes`.
///
/// Yields deltas in decode order and ends with either [`UpstreamItem::End`]
/// or an error. Malformed lines are logged and skipped. A body that closes
/// without a terminal signal yields [`ProviderError::Truncated`]; a gap longer
/// than `idle_timeout` between reads yields [`ProviderError::IdleTimeout`].
/// Dropping the returned stream drops `bytes`.
pub fn upstream_items(
    format: &'static dyn WireFormat,
    bytes: ByteStream,
    idle_timeout: Option<Duration>,
) -> impl futures::Stream<Item = Result<UpstreamItem, ProviderError>> + Send {
    stream::try_unfold(
        State {
            format,
            bytes,
            idle_timeout,
            decoder: LineDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
            skipped: 0,
        },
        |mut state| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    return item.map(|item| Some((item, state)));
                }
                if state.finished {
                    return Ok(None);
                }

                let next = match state.idle_timeout {
                    Some(idle) => tokio::time::timeout(idle, state.bytes.next())
                        .await
                        .map_err(|_| ProviderError::IdleTimeout {
                            channel: state.format.channel(),
                            idle,
                        })?,
                    None => state.bytes.next().await,
                };

                match next {
                    Some(Ok(chunk)) => {
                        for line in state.decoder.push_chunk(&chunk) {
                            state.accept_line(&line);
                            if state.finished {
                                break;
                            }
                        }
                    }
                    Some(Err(err)) => return Err(err),
                    None => {
                        if let Some(line) = state.decoder.finish() {
                            state.accept_line(&line);
                        }
                        if !state.finished {
                            debug!(
                                provider = %state.format.channel(),
                                skipped = state.skipped,
                                "upstream body closed without terminal signal"
                            );
                            state.pending.push_back(Err(ProviderError::Truncated {
                                channel: state.format.channel(),
                            }));
                            state.finished = true;
                        }
                    }
                }
            }
        },
    )
}

fn excerpt(line: &str) -> String {
    if line.chars().count() <= LOG_EXCERPT_CHARS {
        return line.to_string();
    }
    let mut out: String = line.chars().take(LOG_EXCERPT_CHARS).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProviderChannel;
    use crate::wire::wire_format;

    fn byte_stream(chunks: &[&'static str]) -> ByteStream {
        let chunks: Vec<_> = chunks
            .iter()
            .map(|c| Ok::<_, ProviderError>(bytes::Bytes::from_static(c.as_bytes())))
            .collect();
        Box::pin(stream::iter(chunks))
    }

    async fn collect(
        channel: ProviderChannel,
        chunks: &[&'static str],
    ) -> Vec<Result<UpstreamItem, ProviderError>> {
        upstream_items(wire_format(channel), byte_stream(chunks), None)
            .collect()
            .await
    }

    fn delta(text: &str) -> Result<UpstreamItem, ProviderError> {
        Ok(UpstreamItem::Delta(text.into()))
    }

    #[tokio::test]
    async fn event_stream_deltas_then_end() {
        let items = collect(
            ProviderChannel::OpenAiCompatible,
            &[
                "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi",
                "ces\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n\n",
            ],
        )
        .await;
        assert_eq!(items, vec![delta("Hel"), delta("lo"), Ok(UpstreamItem::End)]);
    }

    #[tokio::test]
    async fn nothing_after_terminal_is_read() {
        let items = collect(
            ProviderChannel::OllamaCompatible,
            &["{\"message\":{\"content\":\"a\"},\"done\":true}\n{\"message\":{\"content\":\"b\"},\"done\":false}\n"],
        )
        .await;
        assert_eq!(items, vec![delta("a"), Ok(UpstreamItem::End)]);
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let items = collect(
            ProviderChannel::OllamaCompatible,
            &[
                "{\"message\":{\"content\":\"x\"},\"done\":false}\n",
                "garbage{{\n",
                "{\"message\":{\"content\":\"y\"},\"done\":false}\n{\"done\":true}\n",
            ],
        )
        .await;
        assert_eq!(items, vec![delta("x"), delta("y"), Ok(UpstreamItem::End)]);
    }

    #[tokio::test]
    async fn unterminated_final_line_is_flushed() {
        let items = collect(
            ProviderChannel::OllamaCompatible,
            &["{\"message\":{\"content\":\"Hi\"},\"done\":false}\n{\"done\":true}"],
        )
        .await;
        assert_eq!(items, vec![delta("Hi"), Ok(UpstreamItem::End)]);
    }

    #[tokio::test]
    async fn close_without_terminal_is_truncated() {
        let items = collect(
            ProviderChannel::OpenAiCompatible,
            &["data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n"],
        )
        .await;
        assert_eq!(
            items,
            vec![
                delta("partial"),
                Err(ProviderError::Truncated {
                    channel: ProviderChannel::OpenAiCompatible
                })
            ]
        );
    }

    #[tokio::test]
    async fn in_band_error_ends_stream_after_earlier_deltas() {
        let items = collect(
            ProviderChannel::OllamaCompatible,
            &["{\"message\":{\"content\":\"a\"}}\n{\"error\":\"out of memory\"}\n{\"message\":{\"content\":\"b\"}}\n"],
        )
        .await;
        assert_eq!(
            items,
            vec![
                delta("a"),
                Err(ProviderError::upstream(
                    ProviderChannel::OllamaCompatible,
                    "out of memory"
                ))
            ]
        );
    }

    #[tokio::test]
    async fn transport_error_is_forwarded() {
        let bytes: ByteStream = Box::pin(stream::iter(vec![
            Ok(bytes::Bytes::from_static(b"{\"message\":{\"content\":\"a\"}}\n")),
            Err(ProviderError::connection(
                ProviderChannel::OllamaCompatible,
                "reset by peer",
            )),
        ]));
        let items: Vec<_> = upstream_items(
            wire_format(ProviderChannel::OllamaCompatible),
            bytes,
            None,
        )
        .collect()
        .await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(ProviderError::Connection { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_upstream_hits_idle_timeout() {
        let bytes: ByteStream = Box::pin(
            stream::iter(vec![Ok::<_, ProviderError>(bytes::Bytes::from_static(
                b"{\"message\":{\"content\":\"a\"}}\n",
            ))])
            .chain(stream::pending()),
        );
        let items: Vec<_> = upstream_items(
            wire_format(ProviderChannel::OllamaCompatible),
            bytes,
            Some(Duration::from_secs(5)),
        )
        .collect()
        .await;
        assert_eq!(
            items,
            vec![
                delta("a"),
                Err(ProviderError::IdleTimeout {
                    channel: ProviderChannel::OllamaCompatible,
                    idle: Duration::from_secs(5),
                })
            ]
        );
    }

    #[test]
    fn long_lines_are_truncated_for_logs() {
        let line = "x".repeat(500);
        assert_eq!(excerpt(&line).chars().count(), LOG_EXCERPT_CHARS + 1);
        assert_eq!(excerpt("short"), "short");
    }
}
