//! Shared timestamp/id helpers for deterministic envelopes.

use chrono::{SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use ulid::Ulid;
use uuid::Uuid;

/// RFC 3339 UTC timestamp at second precision (e.g. `2026-08-27T10:15:04Z`).
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Unix-epoch seconds.
pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}

/// Epoch seconds with `Z` suffix (e.g. `1771220592Z`), used for seal and
/// activation file names where lexical ordering matters.
pub fn now_epoch_z() -> String {
    format!("{}Z", now_epoch())
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// UUIDv4, used for message ids and capsule ids.
pub fn new_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Standard command response envelope shape used across CLI surfaces.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut base = serde_json::json!({
        "envelope_version": "1.0.0",
        "ts": now_rfc3339(),
        "event_id": new_event_id(),
        "cmd": cmd,
        "status": status
    });
    if let (Some(base_obj), Some(extra_obj)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_rfc3339_shape() {
        let ts = now_rfc3339();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2026-08-27T10:15:04Z".len());
    }

    #[test]
    fn test_now_epoch_z_format() {
        let result = now_epoch_z();
        assert!(result.ends_with('Z'));
        let numeric_part = result.trim_end_matches('Z');
        assert!(numeric_part.parse::<u64>().is_ok());
    }

    #[test]
    fn test_new_event_id_is_valid_ulid() {
        let id = new_event_id();
        assert!(ulid::Ulid::from_string(&id).is_ok());
    }

    #[test]
    fn test_new_uuid_is_unique() {
        assert_ne!(new_uuid(), new_uuid());
    }

    #[test]
    fn test_command_envelope_with_extra() {
        let extra = serde_json::json!({"key": "value", "count": 42});
        let envelope = command_envelope("test", "ok", extra);
        assert_eq!(envelope["cmd"], "test");
        assert_eq!(envelope["key"], "value");
        assert_eq!(envelope["count"], 42);
    }
}
