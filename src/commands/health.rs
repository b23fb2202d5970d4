use crate::logs::types::ChannelConnectionState;
use crate::{error::AppError, state::AppState};
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Instant;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u128,
    pub db: &'static str,
    pub stream: ChannelConnectionState,
    pub buffered_lines: usize,
}

pub async fn build_health_response(
    started_at: Instant,
    pool: &SqlitePool,
    stream: ChannelConnectionState,
    buffered_lines: usize,
) -> HealthResponse {
    let db_status = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pool)
        .await
    {
        Ok(_) => "ok",
        Err(_) => "error",
    };

    HealthResponse {
        status: if db_status == "ok" { "ok" } else { "degraded" },
        uptime_ms: started_at.elapsed().as_millis(),
        db: db_status,
        stream,
        buffered_lines,
    }
}

pub async fn health(state: &AppState) -> Result<HealthResponse, AppError> {
    let buffered_lines = state.context.messages().await.len();
    Ok(build_health_response(
        state.started_at,
        &state.db_pool,
        state.context.channel_state(),
        buffered_lines,
    )
    .await)
}
