use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const LOG_BUFFER_CAPACITY: usize = 1_000;
pub const DEFAULT_HISTORY_LIMIT: u16 = 300;
pub const MIN_HISTORY_LIMIT: u16 = 1;
pub const MAX_HISTORY_LIMIT: u16 = 1_000;
pub const GUEST_USER_ID: &str = "guest";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum LogLevel {
    #[default]
    Info,
    Warning,
    Error,
    Other(String),
}

impl LogLevel {
    /// Uppercases the source value; blank input falls back to `INFO`.
    pub fn parse_str(value: &str) -> Self {
        let upper = value.trim().to_uppercase();
        match upper.as_str() {
            "" | "INFO" => Self::Info,
            "WARNING" => Self::Warning,
            "ERROR" => Self::Error,
            _ => Self::Other(upper),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Other(value) => value.as_str(),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for LogLevel {
    fn from(value: String) -> Self {
        Self::parse_str(&value)
    }
}

impl From<LogLevel> for String {
    fn from(value: LogLevel) -> Self {
        value.as_str().to_string()
    }
}

/// Canonical shape of every inbound log event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub timestamp: String,
    pub level: LogLevel,
    pub text: String,
    pub user_id: Option<String>,
    pub kind: Option<String>,
}

impl LogRecord {
    pub fn formatted(&self) -> String {
        format!("[{}] {}: {}", self.timestamp, self.level, self.text)
    }
}

/// Payload exactly as it came off the wire, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawLogPayload {
    Text(String),
    Structured(serde_json::Value),
}

impl RawLogPayload {
    pub fn as_structured(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ChannelConnectionState {
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogChannelStatusSnapshot {
    pub state: ChannelConnectionState,
    pub user_id: Option<String>,
    pub frames_received: u64,
    pub last_frame_at_ms: Option<i64>,
    pub reason: Option<String>,
}

impl LogChannelStatusSnapshot {
    pub fn disconnected(user_id: Option<String>, reason: Option<String>) -> Self {
        Self {
            state: ChannelConnectionState::Disconnected,
            user_id,
            frames_received: 0,
            last_frame_at_ms: None,
            reason,
        }
    }

    pub fn connected(&self) -> bool {
        self.state == ChannelConnectionState::Connected
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartLogStreamArgs {
    pub user_id: Option<String>,
}

impl StartLogStreamArgs {
    pub fn normalize(self) -> Result<String, AppError> {
        normalize_user_id(self.user_id.as_deref()).ok_or(AppError::MissingUserId)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStreamSession {
    pub running: bool,
    pub already_active: bool,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStreamStopResult {
    pub stopped: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearLogResult {
    pub removed: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveredLogsResult {
    pub appended: usize,
}

#[derive(Debug, Deserialize)]
pub struct RecentLogsWire {
    #[serde(default)]
    pub logs: Option<Vec<serde_json::Value>>,
}

pub fn normalize_user_id(user_id: Option<&str>) -> Option<String> {
    user_id
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn is_guest(user_id: &str) -> bool {
    let trimmed = user_id.trim();
    trimmed.is_empty() || trimmed == GUEST_USER_ID
}

pub fn validate_history_limit(limit: u16) -> Result<u16, AppError> {
    if !(MIN_HISTORY_LIMIT..=MAX_HISTORY_LIMIT).contains(&limit) {
        return Err(AppError::InvalidArgument(format!(
            "historyLimit must be between {MIN_HISTORY_LIMIT} and {MAX_HISTORY_LIMIT}"
        )));
    }
    Ok(limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_levels_case_insensitively() {
        assert_eq!(LogLevel::parse_str("error"), LogLevel::Error);
        assert_eq!(LogLevel::parse_str("Warning"), LogLevel::Warning);
        assert_eq!(LogLevel::parse_str(""), LogLevel::Info);
        assert_eq!(
            LogLevel::parse_str("debug"),
            LogLevel::Other("DEBUG".to_string())
        );
        assert_eq!(LogLevel::parse_str("trace").as_str(), "TRACE");
    }

    #[test]
    fn formats_record_for_display() {
        let record = LogRecord {
            timestamp: "2024-05-01T09:15:00.000Z".to_string(),
            level: LogLevel::Warning,
            text: "order rejected".to_string(),
            user_id: None,
            kind: None,
        };
        assert_eq!(
            record.formatted(),
            "[2024-05-01T09:15:00.000Z] WARNING: order rejected"
        );
    }

    #[test]
    fn start_args_reject_blank_user() {
        let result = StartLogStreamArgs {
            user_id: Some("   ".to_string()),
        }
        .normalize();
        assert!(matches!(result, Err(AppError::MissingUserId)));

        let user = StartLogStreamArgs {
            user_id: Some(" u-17 ".to_string()),
        }
        .normalize()
        .expect("non-blank user should pass");
        assert_eq!(user, "u-17");
    }

    #[test]
    fn guest_detection_covers_empty_ids() {
        assert!(is_guest("guest"));
        assert!(is_guest(""));
        assert!(!is_guest("trader-1"));
    }

    #[test]
    fn validates_history_limit_range() {
        assert!(validate_history_limit(0).is_err());
        assert!(validate_history_limit(1_001).is_err());
        assert_eq!(validate_history_limit(300).expect("in range"), 300);
    }

    #[test]
    fn level_serializes_as_plain_string() {
        let encoded = serde_json::to_string(&LogLevel::Other("NOTICE".to_string()))
            .expect("level should serialize");
        assert_eq!(encoded, "\"NOTICE\"");
    }
}
