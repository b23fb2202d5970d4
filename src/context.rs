use crate::config::DashboardConfig;
use crate::error::AppError;
use crate::logs::buffer::{BufferLoadSource, LogBuffer, SharedLogBuffer};
use crate::logs::channel::{ChannelStart, LogChannelManager};
use crate::logs::fanout::{FanoutBus, SubscriptionToken};
use crate::logs::history::{fetch_history, fetch_recent_logs, records_from_history};
use crate::logs::normalizer::normalize_recovered;
use crate::logs::types::{
    is_guest, normalize_user_id, ChannelConnectionState, LogChannelStatusSnapshot, RawLogPayload,
    GUEST_USER_ID,
};
use crate::session::backend::HttpSessionBackend;
use crate::session::control::TradeControl;
use crate::session::persistence::{
    clear_last_user, delete_session_preferences, get_session_preferences, save_last_user,
    save_session_preferences,
};
use crate::session::reconcile::{reconcile_session, ReconcileReport};
use crate::session::types::{ActiveView, SelectionType, TradingSessionState};
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountReport {
    pub user_id: String,
    pub buffer: BufferLoadSource,
    pub reconcile: ReconcileReport,
    pub cancelled: bool,
}

/// Everything the dashboard shares between views: the log buffer, the
/// subscriber bus, the single stream connection and the session mirror.
/// Built once at startup and torn down on exit.
pub struct LogStreamContext {
    pool: SqlitePool,
    client: Client,
    history_base: String,
    api_base: String,
    history_limit: u16,
    buffer: SharedLogBuffer,
    bus: Arc<FanoutBus<RawLogPayload>>,
    channel: LogChannelManager,
    backend: HttpSessionBackend,
    session: RwLock<TradingSessionState>,
    user_id: RwLock<String>,
    liveness: Mutex<CancellationToken>,
}

impl LogStreamContext {
    pub fn new(config: &DashboardConfig, pool: SqlitePool, client: Client) -> Self {
        let buffer = LogBuffer::with_capacity(pool.clone(), config.buffer_capacity).into_shared();
        let bus = Arc::new(FanoutBus::new());
        let channel =
            LogChannelManager::new(config.stream_base.clone(), Arc::clone(&buffer), Arc::clone(&bus));

        Self {
            pool,
            backend: HttpSessionBackend::new(client.clone(), config.api_base.clone()),
            client,
            history_base: config.history_base.clone(),
            api_base: config.api_base.clone(),
            history_limit: config.history_limit,
            buffer,
            bus,
            channel,
            session: RwLock::new(TradingSessionState::default()),
            user_id: RwLock::new(GUEST_USER_ID.to_string()),
            liveness: Mutex::new(CancellationToken::new()),
        }
    }

    /// Binds the context to `user_id` (guest when absent): remembers the user,
    /// restores view preferences, loads the buffer from backfill or local
    /// storage, then reconciles against the backend.
    pub async fn mount(
        &self,
        user_id: Option<&str>,
        role: Option<&str>,
    ) -> Result<MountReport, AppError> {
        let user_id = normalize_user_id(user_id).unwrap_or_else(|| GUEST_USER_ID.to_string());
        let liveness = self.renew_liveness();
        if let Some(previous) = self.channel.active_user().filter(|active| *active != user_id) {
            info!(%previous, %user_id, "closing previous user's log stream");
            self.channel.stop().await;
        }
        *self.user_id.write() = user_id.clone();
        *self.session.write() = TradingSessionState::default();

        if !is_guest(&user_id) {
            if let Err(error) = save_last_user(&self.pool, &user_id, role).await {
                warn!(%user_id, %error, "failed to remember last user");
            }
        }

        match get_session_preferences(&self.pool, &user_id).await {
            Ok(preferences) => {
                let mut writable = self.session.write();
                writable.active_view = preferences.active_view;
                writable.selection_type = preferences.selection_type;
            }
            Err(error) => warn!(%user_id, %error, "failed to restore session preferences"),
        }

        let history = fetch_history(&self.client, &self.history_base, &user_id, self.history_limit).await;
        if liveness.is_cancelled() {
            return Ok(MountReport {
                user_id,
                buffer: BufferLoadSource::Empty,
                reconcile: ReconcileReport::default(),
                cancelled: true,
            });
        }
        let records = records_from_history(&history);
        let buffer = self.buffer.lock().await.load(&user_id, &records).await?;
        info!(%user_id, ?buffer, "log buffer loaded");

        let reconcile =
            reconcile_session(&user_id, &self.backend, &self.channel, &self.session, &liveness).await;
        let cancelled = liveness.is_cancelled();
        if reconcile.failed_steps() > 0 {
            warn!(%user_id, report = ?reconcile, "session reconciliation partially failed");
        }
        if !cancelled {
            self.save_preferences().await;
        }

        Ok(MountReport {
            user_id,
            buffer,
            reconcile,
            cancelled,
        })
    }

    /// Cancels in-flight mount work and force-closes the stream.
    pub fn teardown(&self) {
        self.liveness.lock().cancel();
        self.channel.force_close();
        info!(user_id = %self.user_id(), "log stream context torn down");
    }

    fn renew_liveness(&self) -> CancellationToken {
        let mut slot = self.liveness.lock();
        slot.cancel();
        *slot = CancellationToken::new();
        slot.clone()
    }

    pub fn user_id(&self) -> String {
        self.user_id.read().clone()
    }

    pub fn start_logs(&self, user_id: Option<&str>) -> Result<ChannelStart, AppError> {
        self.channel.start(user_id)
    }

    pub async fn stop_logs(&self) -> bool {
        self.channel.stop().await
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionToken
    where
        F: Fn(&RawLogPayload) -> Result<(), AppError> + Send + Sync + 'static,
    {
        self.bus.subscribe(callback)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.bus.unsubscribe(token)
    }

    pub async fn messages(&self) -> Vec<String> {
        self.buffer.lock().await.lines()
    }

    pub async fn clear_log(&self) -> Result<usize, AppError> {
        self.buffer.lock().await.clear().await
    }

    /// Appends records the server kept while the stream was down. Returns how
    /// many lines were stored after the adjacent-duplicate check.
    pub async fn recover_missed(&self) -> usize {
        let user_id = self.user_id();
        let records = fetch_recent_logs(&self.client, &self.api_base, &user_id, self.history_limit).await;

        let mut stored = 0;
        let mut buffer = self.buffer.lock().await;
        for record in &records {
            match buffer.append(&normalize_recovered(record)).await {
                Ok(true) => stored += 1,
                Ok(false) => {}
                Err(error) => warn!(%user_id, %error, "failed to persist recovered log line"),
            }
        }
        stored
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub fn channel_state(&self) -> ChannelConnectionState {
        self.channel.state()
    }

    pub fn channel_status(&self) -> LogChannelStatusSnapshot {
        self.channel.status()
    }

    pub fn watch_channel(&self) -> watch::Receiver<ChannelConnectionState> {
        self.channel.watch_state()
    }

    pub fn session(&self) -> TradingSessionState {
        self.session.read().clone()
    }

    pub fn update_session<F>(&self, update: F)
    where
        F: FnOnce(&mut TradingSessionState),
    {
        update(&mut self.session.write());
    }

    /// Forgets the session mirror and the buffer's contents for the current
    /// user; the local selection type survives.
    pub async fn reset_session(&self) -> Result<(), AppError> {
        self.channel.stop().await;
        self.session.write().reset();
        self.buffer.lock().await.clear().await?;
        self.save_preferences().await;
        Ok(())
    }

    /// Drops every trace of the current user: stream, buffer, preferences and
    /// the remembered last user. The context falls back to guest.
    pub async fn logout(&self) -> Result<String, AppError> {
        let user_id = self.user_id();
        self.liveness.lock().cancel();
        self.channel.stop().await;

        *self.session.write() = TradingSessionState::default();
        self.buffer.lock().await.clear().await?;
        delete_session_preferences(&self.pool, &user_id).await?;
        clear_last_user(&self.pool).await?;
        *self.user_id.write() = GUEST_USER_ID.to_string();

        info!(%user_id, "logged out");
        Ok(user_id)
    }

    /// Updates the persisted view preferences for the current user.
    pub async fn set_preferences(
        &self,
        active_view: Option<ActiveView>,
        selection_type: Option<SelectionType>,
    ) {
        {
            let mut writable = self.session.write();
            if let Some(view) = active_view {
                writable.active_view = view;
            }
            if let Some(selection) = selection_type {
                writable.selection_type = selection;
            }
        }
        self.save_preferences().await;
    }

    pub fn trade_control(&self) -> TradeControlGuard<'_> {
        TradeControlGuard {
            context: self,
            user_id: self.user_id(),
        }
    }

    async fn save_preferences(&self) {
        let user_id = self.user_id();
        let (active_view, selection_type) = {
            let readable = self.session.read();
            (readable.active_view, readable.selection_type)
        };
        if let Err(error) =
            save_session_preferences(&self.pool, &user_id, active_view, selection_type).await
        {
            warn!(%user_id, %error, "failed to save session preferences");
        }
    }
}

/// Owns the user id for the duration of a trade-control call and saves the
/// view preference afterwards.
pub struct TradeControlGuard<'a> {
    context: &'a LogStreamContext,
    user_id: String,
}

impl TradeControlGuard<'_> {
    fn control(&self) -> TradeControl<'_> {
        TradeControl {
            user_id: &self.user_id,
            backend: &self.context.backend,
            session: &self.context.session,
            buffer: &self.context.buffer,
            channel: &self.context.channel,
        }
    }

    pub async fn start_all(&self) -> Vec<String> {
        let lines = self.control().start_all().await;
        self.context.save_preferences().await;
        lines
    }

    pub async fn stop_all(&self) -> Vec<String> {
        self.control().stop_all().await
    }

    pub async fn close_all(&self) -> Vec<String> {
        self.control().close_all().await
    }

    pub async fn toggle_slot(&self, index: usize) -> Vec<String> {
        let lines = self.control().toggle_slot(index).await;
        self.context.save_preferences().await;
        lines
    }

    pub async fn close_position(&self, index: usize) -> Vec<String> {
        self.control().close_position(index).await
    }
}
