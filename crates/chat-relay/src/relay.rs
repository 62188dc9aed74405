use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use futures::stream;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{Instrument as _, debug, error, info, warn};

use crate::accumulator::StreamAccumulator;
use crate::config::RelayConfig;
use crate::errors::{
    ProviderError, RelayError, StoreError, TurnFailure, turn_failure_from_provider_error,
};
use crate::model::{Message, ProviderChannel, SessionId};
use crate::provider::{ByteStream, ProviderClient, ProviderRequest};
use crate::store::SessionStore;
use crate::stream::NormalizedEvent;
use crate::wire::{UpstreamItem, upstream_items, wire_format};

/// Relays chat turns between a session store, an upstream provider and a
/// client event channel.
///
/// Turns for different sessions may run concurrently. Callers must not start
/// a turn for a session while a previous turn for the same session is still
/// streaming; the relay appends to the session without locking it.
#[derive(Clone)]
pub struct Relay {
    store: Arc<dyn SessionStore>,
    provider: Arc<dyn ProviderClient>,
}

impl Relay {
    pub fn new(store: Arc<dyn SessionStore>, provider: Arc<dyn ProviderClient>) -> Self {
        Self { store, provider }
    }

    /// Starts building a turn for `session_id` with a snapshot of `config`.
    pub fn turn(&self, session_id: impl Into<SessionId>, config: RelayConfig) -> TurnBuilder {
        TurnBuilder {
            relay: self.clone(),
            session_id: session_id.into(),
            config,
            user_text: None,
        }
    }
}

/// Handle used to cancel a streaming turn.
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The turn ends with `TurnFailure::Cancelled` after persisting any
    /// partial reply.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Summary of a finished turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnReport {
    pub session_id: SessionId,
    pub turn_id: uuid::Uuid,
    /// Deltas forwarded to the client.
    pub deltas: usize,
    /// Assistant text appended to the session; empty when nothing was stored.
    pub reply: String,
}

/// Builder for one chat turn.
pub struct TurnBuilder {
    relay: Relay,
    session_id: SessionId,
    config: RelayConfig,
    user_text: Option<String>,
}

impl TurnBuilder {
    pub fn user_text(mut self, text: impl Into<String>) -> Self {
        self.user_text = Some(text.into());
        self
    }

    /// Persists the user message and starts streaming.
    ///
    /// Fails without opening an upstream connection when the input is invalid,
    /// the session does not exist, or the user message cannot be stored.
    /// Upstream failures surface later as a terminal
    /// [`NormalizedEvent::Error`].
    pub async fn start_stream(self) -> Result<TurnStream, RelayError> {
        self.config.validate()?;
        let user_text = self
            .user_text
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| RelayError::Validation("user message must not be empty".into()))?;

        let store = self.relay.store.clone();
        let mut history = store.load(&self.session_id).await?;
        let user_message = Message::user(user_text);
        store
            .append_message(&self.session_id, user_message.clone())
            .await?;
        history.push(user_message);

        let turn_id = uuid::Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.config.stream_buffer_capacity);
        let (final_tx, final_rx) = oneshot::channel();
        let (abort_tx, abort_rx) = watch::channel(false);

        let span = tracing::info_span!(
            "turn",
            session_id = %self.session_id,
            %turn_id,
            provider = %self.config.channel,
            model = %self.config.model,
        );
        let turn = TurnTask {
            store,
            provider: self.relay.provider.clone(),
            session_id: self.session_id.clone(),
            turn_id,
            config: self.config,
            history,
        };
        tokio::spawn(turn.run(tx, final_tx, abort_rx).instrument(span));

        Ok(TurnStream {
            session_id: self.session_id,
            turn_id,
            rx,
            final_rx,
            abort_handle: AbortHandle {
                tx: Arc::new(abort_tx),
            },
            saw_terminal: false,
        })
    }

    /// Runs the turn to completion, discarding client events.
    pub async fn collect_reply(self) -> Result<TurnReport, RelayError> {
        self.start_stream().await?.finish().await
    }
}

/// Client side of a streaming turn.
///
/// Dropping it counts as a client disconnect: the relay aborts the upstream
/// request and persists what was delivered.
pub struct TurnStream {
    session_id: SessionId,
    turn_id: uuid::Uuid,
    rx: mpsc::Receiver<NormalizedEvent>,
    final_rx: oneshot::Receiver<Result<TurnReport, RelayError>>,
    abort_handle: AbortHandle,
    saw_terminal: bool,
}

impl TurnStream {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn turn_id(&self) -> uuid::Uuid {
        self.turn_id
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Waits for the next event. Returns `None` once the turn has ended.
    pub async fn next_event(&mut self) -> Option<NormalizedEvent> {
        if self.saw_terminal {
            return None;
        }
        let event = self.rx.recv().await;
        if event.as_ref().is_some_and(NormalizedEvent::is_terminal) {
            self.saw_terminal = true;
        }
        event
    }

    /// Drains remaining events and returns the turn result, after the reply
    /// has been persisted.
    pub async fn finish(mut self) -> Result<TurnReport, RelayError> {
        while self.next_event().await.is_some() {}
        match self.final_rx.await {
            Ok(result) => result,
            Err(_) => Err(RelayError::protocol_msg(format!(
                "turn task ended without a result (session={}, turn={})",
                self.session_id, self.turn_id
            ))),
        }
    }

    /// Turns the remaining events into client wire frames, ending after the
    /// terminal frame.
    pub fn into_wire_stream(self) -> impl futures::Stream<Item = bytes::Bytes> + Send {
        stream::unfold(self, |mut turn| async move {
            let event = turn.next_event().await?;
            Some((event.to_wire_bytes(), turn))
        })
    }
}

struct TurnTask {
    store: Arc<dyn SessionStore>,
    provider: Arc<dyn ProviderClient>,
    session_id: SessionId,
    turn_id: uuid::Uuid,
    config: RelayConfig,
    history: Vec<Message>,
}

enum Forward {
    Sent,
    Disconnected,
    Cancelled,
}

impl TurnTask {
    async fn run(
        self,
        tx: mpsc::Sender<NormalizedEvent>,
        final_tx: oneshot::Sender<Result<TurnReport, RelayError>>,
        mut abort_rx: watch::Receiver<bool>,
    ) {
        let channel = self.config.channel;
        let request = ProviderRequest {
            turn_id: self.turn_id,
            channel,
            model: self.config.model.clone(),
            context_window: self.config.context_window,
            max_output_tokens: self.config.max_output_tokens,
            messages: self.history.clone(),
        };
        info!(messages = request.messages.len(), "turn started");

        let mut accumulator = StreamAccumulator::default();
        let opened = tokio::select! {
            biased;
            _ = cancelled(&mut abort_rx) => Err(TurnFailure::Cancelled),
            _ = tx.closed() => Err(TurnFailure::ClientDisconnected),
            opened = open_upstream(self.provider.as_ref(), request, self.config.idle_timeout) => {
                opened.map_err(|e| turn_failure_from_provider_error(&e))
            }
        };

        let failure = match opened {
            Err(failure) => Some(failure),
            Ok(bytes) => {
                let mut items = Box::pin(upstream_items(
                    wire_format(channel),
                    bytes,
                    self.config.idle_timeout,
                ));
                let failure = loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancelled(&mut abort_rx) => break Some(TurnFailure::Cancelled),
                        _ = tx.closed() => break Some(TurnFailure::ClientDisconnected),
                        next = items.next() => next,
                    };
                    match next {
                        Some(Ok(UpstreamItem::Delta(text))) => {
                            let event = NormalizedEvent::Delta { text: text.clone() };
                            match forward(&tx, event, &mut abort_rx).await {
                                Forward::Sent => accumulator.push(&text),
                                Forward::Disconnected => {
                                    break Some(TurnFailure::ClientDisconnected);
                                }
                                Forward::Cancelled => break Some(TurnFailure::Cancelled),
                            }
                        }
                        Some(Ok(UpstreamItem::End)) => break None,
                        Some(Err(err)) => break Some(turn_failure_from_provider_error(&err)),
                        None => {
                            break Some(TurnFailure::UpstreamConnection {
                                provider: channel.to_string(),
                                message: "stream ended before a terminal signal".into(),
                            });
                        }
                    }
                };
                // Release the upstream connection before touching the store.
                drop(items);
                failure
            }
        };

        let result = match failure {
            None => self.complete(&tx, accumulator).await,
            Some(failure) => self.fail(&tx, accumulator, failure, channel).await,
        };
        let _ = final_tx.send(result);
    }

    async fn complete(
        &self,
        tx: &mpsc::Sender<NormalizedEvent>,
        accumulator: StreamAccumulator,
    ) -> Result<TurnReport, RelayError> {
        let done_sent = tx.send(NormalizedEvent::Done).await.is_ok();
        let deltas = accumulator.deltas();
        let reply = match persist_reply(self.store.as_ref(), &self.session_id, accumulator).await {
            Ok(reply) => reply,
            Err(err) => {
                error!(error = %err, "failed to persist completed reply");
                return Err(TurnFailure::Persistence {
                    message: err.to_string(),
                }
                .into());
            }
        };
        if !done_sent {
            warn!(deltas, "client disconnected before the done event");
            return Err(TurnFailure::ClientDisconnected.into());
        }
        info!(deltas, reply_chars = reply.chars().count(), "turn completed");
        Ok(TurnReport {
            session_id: self.session_id.clone(),
            turn_id: self.turn_id,
            deltas,
            reply,
        })
    }

    async fn fail(
        &self,
        tx: &mpsc::Sender<NormalizedEvent>,
        accumulator: StreamAccumulator,
        failure: TurnFailure,
        channel: ProviderChannel,
    ) -> Result<TurnReport, RelayError> {
        let deltas = accumulator.deltas();
        match persist_reply(self.store.as_ref(), &self.session_id, accumulator).await {
            Ok(partial) if !partial.is_empty() => {
                debug!(partial_chars = partial.chars().count(), "persisted partial reply");
            }
            Ok(_) => {}
            Err(err) => error!(error = %err, "failed to persist partial reply"),
        }
        warn!(provider = %channel, deltas, failure = %failure, "turn failed");
        if failure != TurnFailure::ClientDisconnected {
            let _ = tx
                .send(NormalizedEvent::Error {
                    failure: failure.clone(),
                })
                .await;
        }
        Err(RelayError::TurnFailed(failure))
    }
}

/// Appends the accumulated reply as an assistant message unless it is empty.
async fn persist_reply(
    store: &dyn SessionStore,
    session_id: &SessionId,
    accumulator: StreamAccumulator,
) -> Result<String, StoreError> {
    if accumulator.is_empty() {
        return Ok(String::new());
    }
    let reply = accumulator.into_text();
    store
        .append_message(session_id, Message::assistant(reply.clone()))
        .await?;
    Ok(reply)
}

/// Opens the upstream stream. With `idle` set, an upstream that has not
/// answered within that interval fails with [`ProviderError::IdleTimeout`].
async fn open_upstream(
    provider: &dyn ProviderClient,
    request: ProviderRequest,
    idle: Option<Duration>,
) -> Result<ByteStream, ProviderError> {
    let channel = request.channel;
    let Some(idle) = idle else {
        return provider.open_stream(request).await;
    };
    tokio::time::timeout(idle, provider.open_stream(request))
        .await
        .unwrap_or(Err(ProviderError::IdleTimeout { channel, idle }))
}

async fn forward(
    tx: &mpsc::Sender<NormalizedEvent>,
    event: NormalizedEvent,
    abort_rx: &mut watch::Receiver<bool>,
) -> Forward {
    tokio::select! {
        biased;
        _ = cancelled(abort_rx) => Forward::Cancelled,
        sent = tx.send(event) => {
            if sent.is_ok() { Forward::Sent } else { Forward::Disconnected }
        }
    }
}

/// Resolves once cancellation is requested; pends forever if the abort
/// handle is gone.
async fn cancelled(abort_rx: &mut watch::Receiver<bool>) {
    loop {
        if *abort_rx.borrow_and_update() {
            return;
        }
        if abort_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
