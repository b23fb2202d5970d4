use crate::endpoints::log_stream_endpoint;
use crate::error::AppError;
use crate::logs::buffer::SharedLogBuffer;
use crate::logs::fanout::FanoutBus;
use crate::logs::normalizer::{decode_frame, normalize};
use crate::logs::persistence::now_unix_ms;
use crate::logs::types::{
    normalize_user_id, ChannelConnectionState, LogChannelStatusSnapshot, RawLogPayload,
};
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type LogWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Consecutive non-terminal transport errors tolerated before the socket is
/// treated as closed.
///
/// A single error keeps the stream open and only a close frame ends it. The
/// exceptions come from tungstenite: after `ConnectionClosed`, `AlreadyClosed`
/// or `Io` the stream yields nothing further, and a run of protocol or UTF-8
/// errors means the peer is sending garbage that will never resync. Waiting
/// for a close frame in either case would leave the slot held by a dead
/// socket with no way to reopen it.
const MAX_CONSECUTIVE_TRANSPORT_ERRORS: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStart {
    Started,
    AlreadyActive { user_id: String },
}

struct ActiveChannel {
    id: u64,
    user_id: String,
    cancellation_token: CancellationToken,
    join_handle: JoinHandle<()>,
}

struct ChannelShared {
    buffer: SharedLogBuffer,
    bus: Arc<FanoutBus<RawLogPayload>>,
    slot: Mutex<Option<ActiveChannel>>,
    status: RwLock<LogChannelStatusSnapshot>,
    state_tx: watch::Sender<ChannelConnectionState>,
    connections_opened: AtomicU64,
}

impl ChannelShared {
    fn owns_slot(&self, id: u64) -> bool {
        self.slot.lock().as_ref().map(|active| active.id) == Some(id)
    }

    fn set_state(
        &self,
        state: ChannelConnectionState,
        user_id: Option<String>,
        reason: Option<String>,
    ) {
        {
            let mut writable = self.status.write();
            if state == ChannelConnectionState::Connecting {
                writable.frames_received = 0;
                writable.last_frame_at_ms = None;
            }
            writable.state = state;
            if user_id.is_some() {
                writable.user_id = user_id;
            }
            writable.reason = reason;
        }
        self.state_tx.send_replace(state);
    }

    fn mark_connected(&self, id: u64) -> bool {
        let slot = self.slot.lock();
        let Some(active) = slot.as_ref().filter(|active| active.id == id) else {
            return false;
        };
        self.connections_opened.fetch_add(1, Ordering::SeqCst);
        self.set_state(
            ChannelConnectionState::Connected,
            Some(active.user_id.clone()),
            Some("log stream connected".to_string()),
        );
        true
    }

    /// Clears the slot after a transport-side close, unless `stop` or a newer
    /// connection already replaced it.
    fn release(&self, id: u64, reason: String) {
        let released = {
            let mut slot = self.slot.lock();
            if slot.as_ref().map(|active| active.id) == Some(id) {
                slot.take()
            } else {
                None
            }
        };

        if released.is_some() {
            self.set_state(ChannelConnectionState::Disconnected, None, Some(reason));
        }
    }

    fn record_frame(&self) {
        let mut writable = self.status.write();
        writable.frames_received = writable.frames_received.saturating_add(1);
        writable.last_frame_at_ms = Some(now_unix_ms());
    }
}

/// Owns the single push connection for the dashboard user. Inbound frames
/// are normalized into the shared buffer and the raw payload is fanned out
/// to subscribers.
pub struct LogChannelManager {
    stream_base: String,
    next_connection_id: AtomicU64,
    shared: Arc<ChannelShared>,
}

impl LogChannelManager {
    pub fn new(
        stream_base: impl Into<String>,
        buffer: SharedLogBuffer,
        bus: Arc<FanoutBus<RawLogPayload>>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ChannelConnectionState::Disconnected);
        Self {
            stream_base: stream_base.into(),
            next_connection_id: AtomicU64::new(1),
            shared: Arc::new(ChannelShared {
                buffer,
                bus,
                slot: Mutex::new(None),
                status: RwLock::new(LogChannelStatusSnapshot::disconnected(
                    None,
                    Some("stream idle".to_string()),
                )),
                state_tx,
                connections_opened: AtomicU64::new(0),
            }),
        }
    }

    pub fn start(&self, user_id: Option<&str>) -> Result<ChannelStart, AppError> {
        let Some(user_id) = normalize_user_id(user_id) else {
            error!("log stream start requested without a user id");
            return Err(AppError::MissingUserId);
        };
        let endpoint = log_stream_endpoint(&self.stream_base, &user_id)?;

        let mut slot = self.shared.slot.lock();
        if let Some(active) = slot.as_ref() {
            debug!(user_id = %active.user_id, "log stream already active");
            return Ok(ChannelStart::AlreadyActive {
                user_id: active.user_id.clone(),
            });
        }

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let cancellation_token = CancellationToken::new();
        self.shared.set_state(
            ChannelConnectionState::Connecting,
            Some(user_id.clone()),
            Some("opening log stream".to_string()),
        );
        info!(%user_id, %endpoint, "connecting log stream");

        let join_handle = tokio::spawn(run_log_channel(
            Arc::clone(&self.shared),
            id,
            user_id.clone(),
            endpoint.to_string(),
            cancellation_token.clone(),
        ));

        *slot = Some(ActiveChannel {
            id,
            user_id,
            cancellation_token,
            join_handle,
        });
        Ok(ChannelStart::Started)
    }

    /// Closes the active connection, if any. Returns whether one was open.
    pub async fn stop(&self) -> bool {
        let existing = self.shared.slot.lock().take();
        let Some(active) = existing else {
            return false;
        };

        active.cancellation_token.cancel();
        let _ = active.join_handle.await;
        self.shared.set_state(
            ChannelConnectionState::Disconnected,
            None,
            Some("log stream stopped".to_string()),
        );
        info!(user_id = %active.user_id, "log stream stopped");
        true
    }

    /// Cancels the active connection without waiting for its task.
    pub fn force_close(&self) {
        if let Some(active) = self.shared.slot.lock().take() {
            active.cancellation_token.cancel();
            self.shared.set_state(
                ChannelConnectionState::Disconnected,
                None,
                Some("log stream torn down".to_string()),
            );
        }
    }

    pub fn state(&self) -> ChannelConnectionState {
        self.shared.status.read().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ChannelConnectionState::Connected
    }

    pub fn has_connection(&self) -> bool {
        self.shared.slot.lock().is_some()
    }

    /// User the open connection belongs to.
    pub fn active_user(&self) -> Option<String> {
        self.shared
            .slot
            .lock()
            .as_ref()
            .map(|active| active.user_id.clone())
    }

    pub fn status(&self) -> LogChannelStatusSnapshot {
        self.shared.status.read().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn connections_opened(&self) -> u64 {
        self.shared.connections_opened.load(Ordering::SeqCst)
    }
}

impl Drop for LogChannelManager {
    fn drop(&mut self) {
        self.force_close();
    }
}

enum FrameDirective {
    Continue,
    Closed(String),
}

async fn connect_log_stream(endpoint: &str) -> Result<LogWsStream, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(16 << 20),
        max_frame_size: Some(4 << 20),
        ..Default::default()
    };

    let (stream, _) = connect_async_with_config(endpoint, Some(ws_config), true).await?;
    Ok(stream)
}

async fn run_log_channel(
    shared: Arc<ChannelShared>,
    id: u64,
    user_id: String,
    endpoint: String,
    cancel_token: CancellationToken,
) {
    let connected = tokio::select! {
        _ = cancel_token.cancelled() => return,
        result = connect_log_stream(&endpoint) => result,
    };

    let mut websocket_stream = match connected {
        Ok(stream) => stream,
        Err(error) => {
            warn!(%user_id, %error, "log stream connect failed");
            shared.release(id, format!("log stream connect error: {error}"));
            return;
        }
    };

    if !shared.mark_connected(id) {
        let _ = websocket_stream.close(None).await;
        return;
    }
    info!(%user_id, "log stream connected");

    let mut consecutive_errors = 0_u32;
    let reason = loop {
        let frame = tokio::select! {
            _ = cancel_token.cancelled() => {
                let _ = websocket_stream.close(None).await;
                return;
            }
            next_message = websocket_stream.next() => next_message,
        };

        let Some(frame_result) = frame else {
            break "log stream ended".to_string();
        };

        match frame_result {
            Ok(message) => {
                consecutive_errors = 0;
                match handle_message(message, &shared).await {
                    FrameDirective::Continue => {}
                    FrameDirective::Closed(reason) => break reason,
                }
            }
            Err(error) => {
                warn!(%user_id, %error, "log stream transport error");
                consecutive_errors = consecutive_errors.saturating_add(1);
                if is_terminal(&error) || consecutive_errors >= MAX_CONSECUTIVE_TRANSPORT_ERRORS {
                    break format!("log stream transport closed: {error}");
                }
            }
        }
    };

    if shared.owns_slot(id) {
        info!(%user_id, %reason, "log stream closed");
    }
    shared.release(id, reason);
}

async fn handle_message(message: Message, shared: &ChannelShared) -> FrameDirective {
    let payload = match message {
        Message::Text(text_payload) => text_payload.into_bytes(),
        Message::Binary(binary_payload) => binary_payload,
        Message::Close(frame) => {
            let reason = frame
                .map(|close| format!("server closed log stream: {}", close.reason))
                .unwrap_or_else(|| "server closed log stream".to_string());
            return FrameDirective::Closed(reason);
        }
        _ => return FrameDirective::Continue,
    };

    let Some(raw) = decode_frame(payload) else {
        return FrameDirective::Continue;
    };
    let record = normalize(&raw);

    {
        let mut buffer = shared.buffer.lock().await;
        if let Err(error) = buffer.append(&record).await {
            warn!(%error, "failed to persist log buffer");
        }
    }
    shared.record_frame();
    shared.bus.publish(&raw);

    FrameDirective::Continue
}

fn is_terminal(error: &WsError) -> bool {
    matches!(
        error,
        WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Io(_)
    )
}
