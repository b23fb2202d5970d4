use crate::error::AppError;
use crate::logs::channel::ChannelStart;
use crate::logs::classify::{classify, LineClass};
use crate::logs::types::{
    ClearLogResult, LogChannelStatusSnapshot, LogStreamSession, LogStreamStopResult,
    RecoveredLogsResult, StartLogStreamArgs,
};
use crate::state::AppState;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedLine {
    pub line: String,
    pub class: LineClass,
}

pub fn start_log_stream(
    state: &AppState,
    args: Option<StartLogStreamArgs>,
) -> Result<LogStreamSession, AppError> {
    let args = args.unwrap_or_default();
    let start = state.context.start_logs(args.user_id.as_deref())?;
    let requested = args.normalize()?;

    Ok(match start {
        ChannelStart::Started => LogStreamSession {
            running: true,
            already_active: false,
            user_id: requested,
        },
        ChannelStart::AlreadyActive { user_id } => LogStreamSession {
            running: true,
            already_active: true,
            user_id,
        },
    })
}

pub async fn stop_log_stream(state: &AppState) -> Result<LogStreamStopResult, AppError> {
    let stopped = state.context.stop_logs().await;
    Ok(LogStreamStopResult { stopped })
}

pub fn log_stream_status(state: &AppState) -> Result<LogChannelStatusSnapshot, AppError> {
    Ok(state.context.channel_status())
}

pub async fn log_messages(state: &AppState) -> Result<Vec<String>, AppError> {
    Ok(state.context.messages().await)
}

pub async fn classified_log_messages(state: &AppState) -> Result<Vec<ClassifiedLine>, AppError> {
    let lines = state.context.messages().await;
    Ok(lines
        .into_iter()
        .map(|line| ClassifiedLine {
            class: classify(&line),
            line,
        })
        .collect())
}

pub async fn clear_log(state: &AppState) -> Result<ClearLogResult, AppError> {
    let removed = state.context.clear_log().await?;
    Ok(ClearLogResult { removed })
}

pub async fn recover_missed_logs(state: &AppState) -> Result<RecoveredLogsResult, AppError> {
    let appended = state.context.recover_missed().await;
    Ok(RecoveredLogsResult { appended })
}
