use crate::error::AppError;
use reqwest::Url;

/// Appends percent-encoded path segments to `base`, keeping any base path
/// (`https://host/api` + `["trade", "status", id]`).
pub fn join_segments(base: &str, segments: &[&str]) -> Result<Url, AppError> {
    let mut url = Url::parse(base.trim())
        .map_err(|error| AppError::InvalidArgument(format!("invalid base url '{base}': {error}")))?;

    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| AppError::InvalidArgument(format!("base url '{base}' cannot hold a path")))?;
        path.pop_if_empty();
        path.extend(segments);
    }

    Ok(url)
}

pub fn history_endpoint(history_base: &str, user_id: &str, limit: u16) -> Result<Url, AppError> {
    let mut url = join_segments(history_base, &["logs", "history", user_id])?;
    url.query_pairs_mut()
        .append_pair("limit", &limit.to_string());
    Ok(url)
}

pub fn recent_logs_endpoint(api_base: &str, user_id: &str, limit: u16) -> Result<Url, AppError> {
    let mut url = join_segments(api_base, &["logs", user_id])?;
    url.query_pairs_mut()
        .append_pair("limit", &limit.to_string());
    Ok(url)
}

pub fn log_stream_endpoint(stream_base: &str, user_id: &str) -> Result<Url, AppError> {
    let mut url = join_segments(stream_base, &["ws", "logs"])?;
    url.query_pairs_mut().append_pair("user_id", user_id);
    Ok(url)
}

pub fn trade_status_endpoint(api_base: &str, user_id: &str) -> Result<Url, AppError> {
    join_segments(api_base, &["trade", "status", user_id])
}

pub fn trade_state_endpoint(api_base: &str, user_id: &str) -> Result<Url, AppError> {
    join_segments(api_base, &["trade-state", user_id])
}

pub fn trade_action_endpoint(api_base: &str, action: &str) -> Result<Url, AppError> {
    join_segments(api_base, &[action])
}
