use crate::logs::types::{LogLevel, LogRecord, RawLogPayload};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;

/// Decodes one push frame. Frames that carry nothing (empty bytes, `null`,
/// `false`, `""`) yield `None` and are dropped before normalization.
pub fn decode_frame(payload: Vec<u8>) -> Option<RawLogPayload> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return None;
    }

    let text = String::from_utf8_lossy(&payload).into_owned();
    let mut scratch = payload;
    let decoded = match simd_json::serde::from_slice::<Value>(scratch.as_mut_slice()) {
        Ok(value) => RawLogPayload::Structured(value),
        Err(_) => RawLogPayload::Text(text),
    };

    match &decoded {
        RawLogPayload::Structured(value) if !is_truthy(value) => None,
        _ => Some(decoded),
    }
}

/// Converts any raw payload into a canonical record. Never fails; a missing
/// timestamp is filled with the current instant.
pub fn normalize(raw: &RawLogPayload) -> LogRecord {
    normalize_with(raw, now_iso8601)
}

/// Backfill records keep an absent timestamp empty instead of stamping them
/// with the load time.
pub fn normalize_history(record: &Value) -> LogRecord {
    normalize_structured(record, String::new)
}

/// Records recovered after a gap are stamped with the current instant when
/// they carry no timestamp, like live frames.
pub fn normalize_recovered(record: &Value) -> LogRecord {
    normalize_structured(record, now_iso8601)
}

pub fn normalize_with<F>(raw: &RawLogPayload, default_timestamp: F) -> LogRecord
where
    F: FnOnce() -> String,
{
    match raw {
        RawLogPayload::Text(text) => LogRecord {
            timestamp: default_timestamp(),
            level: LogLevel::Info,
            text: non_empty_text(text.clone(), || quoted(text)),
            user_id: None,
            kind: None,
        },
        RawLogPayload::Structured(value) => normalize_structured(value, default_timestamp),
    }
}

fn normalize_structured<F>(value: &Value, default_timestamp: F) -> LogRecord
where
    F: FnOnce() -> String,
{
    let Value::Object(fields) = value else {
        let text = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        return LogRecord {
            timestamp: default_timestamp(),
            level: LogLevel::Info,
            text: non_empty_text(text, || value.to_string()),
            user_id: None,
            kind: None,
        };
    };

    let text = fields
        .get("message")
        .filter(|candidate| is_truthy(candidate))
        .or_else(|| fields.get("data").filter(|candidate| is_truthy(candidate)))
        .map(display_text)
        .unwrap_or_else(|| value.to_string());

    let timestamp = match fields.get("ts") {
        Some(Value::String(ts)) if !ts.trim().is_empty() => ts.clone(),
        Some(Value::Number(ts)) => ts.to_string(),
        _ => default_timestamp(),
    };

    let level = fields
        .get("level")
        .and_then(Value::as_str)
        .map(LogLevel::parse_str)
        .unwrap_or_default();

    let user_id = fields
        .get("user_id")
        .or_else(|| fields.get("userId"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let kind = fields
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string);

    LogRecord {
        timestamp,
        level,
        text: non_empty_text(text, || value.to_string()),
        user_id,
        kind,
    }
}

fn display_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn non_empty_text<F>(text: String, fallback: F) -> String
where
    F: FnOnce() -> String,
{
    if text.is_empty() {
        fallback()
    } else {
        text
    }
}

fn quoted(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixed_ts() -> String {
        "2024-05-01T09:15:00.000Z".to_string()
    }

    fn decode_and_normalize(frame: &str) -> LogRecord {
        let raw = decode_frame(frame.as_bytes().to_vec()).expect("frame should carry a payload");
        normalize_with(&raw, fixed_ts)
    }

    #[test]
    fn normalizes_json_object_with_lowercase_level() {
        let record = decode_and_normalize(r#"{"level":"error","message":"oops"}"#);
        assert_eq!(record.level, LogLevel::Error);
        assert_eq!(record.text, "oops");
        assert_eq!(record.timestamp, fixed_ts());
    }

    #[test]
    fn normalizes_bare_string_as_info_text() {
        let record = decode_and_normalize("hello");
        assert_eq!(record.text, "hello");
        assert_eq!(record.level, LogLevel::Info);
    }

    #[test]
    fn json_encoded_string_unwraps_to_text() {
        let record = decode_and_normalize(r#""order placed""#);
        assert_eq!(record.text, "order placed");
    }

    #[test]
    fn falls_back_to_data_then_full_payload() {
        let from_data = decode_and_normalize(r#"{"data":"tick received","level":"info"}"#);
        assert_eq!(from_data.text, "tick received");

        let from_payload = decode_and_normalize(r#"{"ts":"t1","pnl":12}"#);
        let reparsed: Value =
            serde_json::from_str(&from_payload.text).expect("fallback text is the payload json");
        assert_eq!(reparsed, json!({"ts": "t1", "pnl": 12}));
        assert_eq!(from_payload.timestamp, "t1");
    }

    #[test]
    fn empty_message_defers_to_data() {
        let record = decode_and_normalize(r#"{"message":"","data":"fallback"}"#);
        assert_eq!(record.text, "fallback");
    }

    #[test]
    fn structured_message_is_serialized() {
        let record = decode_and_normalize(r#"{"message":{"symbol":"RELIANCE","qty":5}}"#);
        let reparsed: Value =
            serde_json::from_str(&record.text).expect("message object is serialized json");
        assert_eq!(reparsed, json!({"symbol": "RELIANCE", "qty": 5}));
    }

    #[test]
    fn malformed_json_is_kept_verbatim() {
        let record = decode_and_normalize(r#"{"level":"error","message":"#);
        assert_eq!(record.text, r#"{"level":"error","message":"#);
        assert_eq!(record.level, LogLevel::Info);
    }

    #[test]
    fn drops_frames_without_content() {
        assert!(decode_frame(Vec::new()).is_none());
        assert!(decode_frame(b"  \n".to_vec()).is_none());
        assert!(decode_frame(b"null".to_vec()).is_none());
        assert!(decode_frame(b"\"\"".to_vec()).is_none());
        assert!(decode_frame(b"false".to_vec()).is_none());
    }

    #[test]
    fn carries_user_and_type_tags() {
        let record = decode_and_normalize(
            r#"{"message":"started","user_id":"u-9","type":"strategy","level":"Warning"}"#,
        );
        assert_eq!(record.user_id.as_deref(), Some("u-9"));
        assert_eq!(record.kind.as_deref(), Some("strategy"));
        assert_eq!(record.level, LogLevel::Warning);
    }

    #[test]
    fn history_records_keep_missing_timestamp_empty() {
        let record = normalize_history(&json!({"level": "info", "message": "restored"}));
        assert_eq!(record.timestamp, "");
        assert_eq!(record.formatted(), "[] INFO: restored");
    }

    #[test]
    fn recovered_records_are_stamped_when_timestamp_missing() {
        let record = normalize_recovered(&json!({"message": "missed"}));
        assert!(record.timestamp.ends_with('Z'));

        let stamped = normalize_recovered(&json!({"ts": "t9", "message": "missed"}));
        assert_eq!(stamped.formatted(), "[t9] INFO: missed");
    }

    #[test]
    fn empty_text_payload_never_yields_empty_text() {
        let record = normalize_with(&RawLogPayload::Text(String::new()), fixed_ts);
        assert!(!record.text.is_empty());
    }

    #[test]
    fn generated_timestamp_is_utc_iso8601() {
        let ts = now_iso8601();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
