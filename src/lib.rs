pub mod commands;
pub mod config;
pub mod context;
pub mod db;
pub mod endpoints;
pub mod error;
pub mod logs;
pub mod session;
pub mod state;
pub mod telemetry;

#[cfg(test)]
mod test_support;

use commands::log_stream::{start_log_stream, stop_log_stream};
use commands::trading_session::{mount_session, MountSessionArgs};
use config::DashboardConfig;
use context::MountReport;
use db::initialize_pool;
use error::AppError;
use logs::normalizer::normalize;
use logs::types::{ChannelConnectionState, RawLogPayload, StartLogStreamArgs};
use state::AppState;
use tokio::sync::mpsc;
use tracing::info;

pub async fn bootstrap(config: &DashboardConfig) -> Result<AppState, AppError> {
    let db_pool = initialize_pool(&config.data_dir, &config.db_filename).await?;
    Ok(AppState::new(config, db_pool))
}

/// Mounts `user_id`, prints the buffered lines, opens the stream and prints
/// each live event until ctrl-c or the server closes the stream.
pub async fn watch<F>(
    state: &AppState,
    user_id: Option<String>,
    mut emit: F,
) -> Result<MountReport, AppError>
where
    F: FnMut(&str),
{
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<RawLogPayload>();
    let token = state.context.subscribe(move |raw: &RawLogPayload| {
        event_tx
            .send(raw.clone())
            .map_err(|_| AppError::Subscriber("watch output closed".to_string()))
    });

    let report = mount_session(
        state,
        Some(MountSessionArgs {
            user_id,
            role: None,
        }),
    )
    .await?;
    for line in state.context.messages().await {
        emit(&line);
    }

    let mut channel_state = state.context.watch_channel();
    let session = start_log_stream(
        state,
        Some(StartLogStreamArgs {
            user_id: Some(report.user_id.clone()),
        }),
    )?;
    info!(user_id = %session.user_id, already_active = session.already_active, "watching log stream");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupt received");
                break;
            }
            Some(raw) = event_rx.recv() => emit(&normalize(&raw).formatted()),
            changed = channel_state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *channel_state.borrow_and_update();
                if current == ChannelConnectionState::Disconnected {
                    info!(reason = ?state.context.channel_status().reason, "log stream closed");
                    break;
                }
            }
        }
    }

    while let Ok(raw) = event_rx.try_recv() {
        emit(&normalize(&raw).formatted());
    }
    state.context.unsubscribe(token);
    stop_log_stream(state).await?;
    state.context.teardown();
    Ok(report)
}
