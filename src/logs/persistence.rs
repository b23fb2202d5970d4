use crate::error::AppError;
use sqlx::{Row, SqlitePool};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

pub(crate) fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

fn encode_lines(lines: &[String]) -> Result<String, AppError> {
    Ok(simd_json::to_string(&lines)?)
}

fn decode_lines(raw: String) -> Result<Vec<String>, AppError> {
    let mut bytes = raw.into_bytes();
    Ok(simd_json::serde::from_slice::<Vec<String>>(bytes.as_mut_slice())?)
}

/// Returns `None` when nothing is stored for the user. A stored value that no
/// longer decodes is treated as absent.
pub async fn load_log_buffer(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Option<Vec<String>>, AppError> {
    let row = sqlx::query("SELECT lines_json FROM log_buffers WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let raw: String = row.try_get("lines_json")?;
    match decode_lines(raw) {
        Ok(lines) => Ok(Some(lines)),
        Err(error) => {
            warn!(user_id, %error, "discarding undecodable persisted log buffer");
            Ok(None)
        }
    }
}

pub async fn save_log_buffer(
    pool: &SqlitePool,
    user_id: &str,
    lines: &[String],
) -> Result<(), AppError> {
    let encoded = encode_lines(lines)?;
    let line_count = i64::try_from(lines.len()).unwrap_or(i64::MAX);

    sqlx::query(
        "INSERT INTO log_buffers (user_id, lines_json, line_count, updated_at_ms) VALUES (?, ?, ?, ?) \
         ON CONFLICT(user_id) DO UPDATE SET lines_json=excluded.lines_json, line_count=excluded.line_count, updated_at_ms=excluded.updated_at_ms",
    )
    .bind(user_id)
    .bind(encoded)
    .bind(line_count)
    .bind(now_unix_ms())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn delete_log_buffer(pool: &SqlitePool, user_id: &str) -> Result<bool, AppError> {
    let result = sqlx::query("DELETE FROM log_buffers WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
