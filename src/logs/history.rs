use crate::endpoints::{history_endpoint, recent_logs_endpoint};
use crate::error::AppError;
use crate::logs::normalizer::normalize_history;
use crate::logs::types::{LogRecord, RecentLogsWire};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

/// Fetches backfill records in server order. Any failure degrades to an
/// empty list.
pub async fn fetch_history(
    client: &Client,
    history_base: &str,
    user_id: &str,
    limit: u16,
) -> Vec<Value> {
    match try_fetch_history(client, history_base, user_id, limit).await {
        Ok(records) => {
            debug!(user_id, count = records.len(), "fetched log history");
            records
        }
        Err(error) => {
            warn!(user_id, %error, "log history unavailable");
            Vec::new()
        }
    }
}

async fn try_fetch_history(
    client: &Client,
    history_base: &str,
    user_id: &str,
    limit: u16,
) -> Result<Vec<Value>, AppError> {
    let endpoint = history_endpoint(history_base, user_id, limit)?;
    let response = client.get(endpoint).send().await?.error_for_status()?;
    let payload = response.json::<Value>().await?;
    match payload {
        Value::Array(records) => Ok(records),
        _ => Err(AppError::InvalidArgument(
            "log history payload is not an array".to_string(),
        )),
    }
}

/// Fetches the `{logs: [...]}` window used to recover lines missed while the
/// stream was down.
pub async fn fetch_recent_logs(
    client: &Client,
    api_base: &str,
    user_id: &str,
    limit: u16,
) -> Vec<Value> {
    let result = async {
        let endpoint = recent_logs_endpoint(api_base, user_id, limit)?;
        let response = client.get(endpoint).send().await?.error_for_status()?;
        let payload = response.json::<RecentLogsWire>().await?;
        Ok::<_, AppError>(payload.logs.unwrap_or_default())
    }
    .await;

    match result {
        Ok(records) => records,
        Err(error) => {
            warn!(user_id, %error, "recent logs unavailable");
            Vec::new()
        }
    }
}

pub fn records_from_history(records: &[Value]) -> Vec<LogRecord> {
    records.iter().map(normalize_history).collect()
}
