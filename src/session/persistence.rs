use crate::error::AppError;
use crate::logs::persistence::now_unix_ms;
use crate::session::types::{ActiveView, SelectionType};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPreferences {
    pub active_view: ActiveView,
    pub selection_type: SelectionType,
    pub updated_at_ms: i64,
}

impl Default for SessionPreferences {
    fn default() -> Self {
        Self {
            active_view: ActiveView::default(),
            selection_type: SelectionType::default(),
            updated_at_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastUser {
    pub user_id: String,
    pub role: Option<String>,
    pub updated_at_ms: i64,
}

fn map_preferences_row(row: &sqlx::sqlite::SqliteRow) -> Result<SessionPreferences, AppError> {
    let active_view_raw: String = row.try_get("active_view")?;
    let selection_type_raw: String = row.try_get("selection_type")?;

    Ok(SessionPreferences {
        active_view: ActiveView::parse_str(&active_view_raw)?,
        selection_type: SelectionType::parse_str(&selection_type_raw)?,
        updated_at_ms: row.try_get("updated_at_ms")?,
    })
}

/// Missing rows give defaults; unreadable rows are logged and also give
/// defaults.
pub async fn get_session_preferences(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<SessionPreferences, AppError> {
    let row = sqlx::query(
        "SELECT active_view, selection_type, updated_at_ms FROM session_preferences WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(SessionPreferences::default());
    };

    match map_preferences_row(&row) {
        Ok(preferences) => Ok(preferences),
        Err(error) => {
            warn!(user_id, %error, "discarding unreadable session preferences");
            Ok(SessionPreferences::default())
        }
    }
}

pub async fn save_session_preferences(
    pool: &SqlitePool,
    user_id: &str,
    active_view: ActiveView,
    selection_type: SelectionType,
) -> Result<SessionPreferences, AppError> {
    let updated_at_ms = now_unix_ms();

    sqlx::query(
        "INSERT INTO session_preferences (user_id, active_view, selection_type, updated_at_ms) VALUES (?, ?, ?, ?) \
         ON CONFLICT(user_id) DO UPDATE SET active_view=excluded.active_view, selection_type=excluded.selection_type, updated_at_ms=excluded.updated_at_ms",
    )
    .bind(user_id)
    .bind(active_view.as_str())
    .bind(selection_type.as_str())
    .bind(updated_at_ms)
    .execute(pool)
    .await?;

    Ok(SessionPreferences {
        active_view,
        selection_type,
        updated_at_ms,
    })
}

pub async fn delete_session_preferences(pool: &SqlitePool, user_id: &str) -> Result<bool, AppError> {
    let result = sqlx::query("DELETE FROM session_preferences WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_last_user(pool: &SqlitePool) -> Result<Option<LastUser>, AppError> {
    let row = sqlx::query("SELECT user_id, role, updated_at_ms FROM last_user WHERE id = 1")
        .fetch_optional(pool)
        .await?;

    row.map(|row| -> Result<LastUser, AppError> {
        Ok(LastUser {
            user_id: row.try_get("user_id")?,
            role: row.try_get("role")?,
            updated_at_ms: row.try_get("updated_at_ms")?,
        })
    })
    .transpose()
}

pub async fn save_last_user(
    pool: &SqlitePool,
    user_id: &str,
    role: Option<&str>,
) -> Result<LastUser, AppError> {
    let updated_at_ms = now_unix_ms();

    sqlx::query(
        "INSERT INTO last_user (id, user_id, role, updated_at_ms) VALUES (1, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET user_id=excluded.user_id, role=excluded.role, updated_at_ms=excluded.updated_at_ms",
    )
    .bind(user_id)
    .bind(role)
    .bind(updated_at_ms)
    .execute(pool)
    .await?;

    Ok(LastUser {
        user_id: user_id.to_string(),
        role: role.map(str::to_string),
        updated_at_ms,
    })
}

pub async fn clear_last_user(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::query("DELETE FROM last_user WHERE id = 1")
        .execute(pool)
        .await?;
    Ok(())
}
