use crate::context::MountReport;
use crate::error::AppError;
use crate::session::persistence::{get_last_user, LastUser};
use crate::session::types::{ActiveView, SelectionType, TradingSessionState};
use crate::state::AppState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountSessionArgs {
    pub user_id: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePreferencesArgs {
    pub active_view: Option<String>,
    pub selection_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeActionResult {
    pub lines: Vec<String>,
    pub session: TradingSessionState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResult {
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    StartAll,
    StopAll,
    CloseAll,
    ToggleSlot(usize),
    ClosePosition(usize),
}

/// Falls back to the remembered last user when no id is given.
pub async fn mount_session(
    state: &AppState,
    args: Option<MountSessionArgs>,
) -> Result<MountReport, AppError> {
    let args = args.unwrap_or_default();
    let remembered = match args.user_id {
        Some(_) => None,
        None => get_last_user(&state.db_pool).await?,
    };

    let (user_id, role) = match remembered {
        Some(LastUser { user_id, role, .. }) => (Some(user_id), role),
        None => (args.user_id, args.role),
    };
    state
        .context
        .mount(user_id.as_deref(), role.as_deref())
        .await
}

pub fn session_snapshot(state: &AppState) -> Result<TradingSessionState, AppError> {
    Ok(state.context.session())
}

pub async fn save_preferences(
    state: &AppState,
    args: SavePreferencesArgs,
) -> Result<TradingSessionState, AppError> {
    let active_view = args
        .active_view
        .as_deref()
        .map(ActiveView::parse_str)
        .transpose()?;
    let selection_type = args
        .selection_type
        .as_deref()
        .map(SelectionType::parse_str)
        .transpose()?;

    state.context.set_preferences(active_view, selection_type).await;
    Ok(state.context.session())
}

/// Clears the session mirror and log buffer but keeps the user mounted.
pub async fn reset_session(state: &AppState) -> Result<TradingSessionState, AppError> {
    state.context.reset_session().await?;
    Ok(state.context.session())
}

pub async fn logout(state: &AppState) -> Result<LogoutResult, AppError> {
    let user_id = state.context.logout().await?;
    Ok(LogoutResult { user_id })
}

pub async fn run_trade_action(
    state: &AppState,
    action: TradeAction,
) -> Result<TradeActionResult, AppError> {
    let control = state.context.trade_control();
    let lines = match action {
        TradeAction::StartAll => control.start_all().await,
        TradeAction::StopAll => control.stop_all().await,
        TradeAction::CloseAll => control.close_all().await,
        TradeAction::ToggleSlot(index) => control.toggle_slot(index).await,
        TradeAction::ClosePosition(index) => control.close_position(index).await,
    };

    Ok(TradeActionResult {
        lines,
        session: state.context.session(),
    })
}
