use crate::error::AppError;
use crate::logs::channel::{ChannelStart, LogChannelManager};
use crate::logs::types::is_guest;
use crate::session::backend::SessionBackend;
use crate::session::types::{ActiveView, TradingSessionState};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Whatever can open the log stream on behalf of reconciliation.
pub trait StreamControl: Send + Sync {
    fn start_stream(&self, user_id: &str) -> Result<ChannelStart, AppError>;
}

impl StreamControl for LogChannelManager {
    fn start_stream(&self, user_id: &str) -> Result<ChannelStart, AppError> {
        self.start(Some(user_id))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StepOutcome {
    #[default]
    Skipped,
    Applied,
    NoChange,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub resume_stream: StepOutcome,
    pub restore_state: StepOutcome,
    pub sync_view: StepOutcome,
}

impl ReconcileReport {
    pub fn failed_steps(&self) -> usize {
        [self.resume_stream, self.restore_state, self.sync_view]
            .into_iter()
            .filter(|outcome| *outcome == StepOutcome::Failed)
            .count()
    }
}

/// Brings the local session mirror in line with the backend after a mount.
///
/// Three steps run in order and each one tolerates failure on its own:
/// resume the stream when trading is running, restore brokers and slots from
/// the saved trade state, then switch to the results view if trading is still
/// running. The view step only runs after a restored snapshot. Once
/// `liveness` is cancelled no further state is touched.
pub async fn reconcile_session<B, S>(
    user_id: &str,
    backend: &B,
    stream: &S,
    session: &RwLock<TradingSessionState>,
    liveness: &CancellationToken,
) -> ReconcileReport
where
    B: SessionBackend + ?Sized,
    S: StreamControl + ?Sized,
{
    let mut report = ReconcileReport::default();
    let user_id = user_id.trim();
    if is_guest(user_id) {
        debug!("skipping session reconciliation for guest");
        return report;
    }

    let resume_stream = match backend.trade_status(user_id).await {
        _ if liveness.is_cancelled() => return cancelled(report),
        Ok(status) if status.is_running() => match stream.start_stream(user_id) {
            Ok(ChannelStart::AlreadyActive { user_id: active }) if active != user_id => {
                warn!(user_id, %active, "log stream is held by another user");
                StepOutcome::Failed
            }
            Ok(start) => {
                info!(user_id, ?start, "resuming log stream for running session");
                StepOutcome::Applied
            }
            Err(error) => {
                warn!(user_id, %error, "failed to resume log stream");
                StepOutcome::Failed
            }
        },
        Ok(_) => StepOutcome::NoChange,
        Err(error) => {
            warn!(user_id, %error, "failed to sync trade status");
            StepOutcome::Failed
        }
    };
    report.resume_stream = resume_stream;

    let restore_state = match backend.trade_state(user_id).await {
        _ if liveness.is_cancelled() => return cancelled(report),
        Ok(snapshot) if snapshot.exists => {
            let mut writable = session.write();
            if let Some(brokers) = snapshot.selected_brokers {
                writable.restore_brokers(brokers);
            }
            if let Some(parameters) = snapshot.trading_parameters {
                writable.restore_parameters(parameters);
            }
            info!(user_id, slots = writable.stock_count, "restored saved trade state");
            StepOutcome::Applied
        }
        Ok(_) => StepOutcome::NoChange,
        Err(error) => {
            warn!(user_id, %error, "failed to load trade state");
            StepOutcome::Failed
        }
    };
    report.restore_state = restore_state;

    if report.restore_state != StepOutcome::Applied {
        return report;
    }

    let sync_view = match backend.trade_status(user_id).await {
        _ if liveness.is_cancelled() => return cancelled(report),
        Ok(status) if status.is_running() => {
            session.write().active_view = ActiveView::Results;
            StepOutcome::Applied
        }
        Ok(_) => StepOutcome::NoChange,
        Err(error) => {
            warn!(user_id, %error, "failed to re-check trade status");
            StepOutcome::Failed
        }
    };
    report.sync_view = sync_view;

    report
}

fn cancelled(mut report: ReconcileReport) -> ReconcileReport {
    debug!("session reconciliation cancelled by teardown");
    for step in [
        &mut report.resume_stream,
        &mut report.restore_state,
        &mut report.sync_view,
    ] {
        if *step == StepOutcome::Skipped {
            *step = StepOutcome::Cancelled;
        }
    }
    report
}
