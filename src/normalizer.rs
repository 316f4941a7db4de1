//! Entry Normalizer
//!
//! Turns one raw JSON record into a validated [`UsageEntry`]. This is a pure
//! function: logging and skip accounting belong to the caller.
//!
//! Records without a `message.usage` object (user turns, tool results,
//! summaries) are not usage records and normalize to `Ok(None)`. Usage
//! records that violate a domain rule produce a [`MalformedEntry`] naming
//! the field.

use crate::error::MalformedEntry;
use crate::models::{MessageId, ModelName, RequestId, SessionId, SourceProvenance, TokenCounts, UsageEntry};
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use std::str::FromStr;

/// Normalize one raw record.
pub fn normalize(
    raw: &Value,
    provenance: SourceProvenance,
) -> Result<Option<UsageEntry>, MalformedEntry> {
    let record = raw
        .as_object()
        .ok_or_else(|| MalformedEntry::invalid("record", "must be a JSON object"))?;

    let Some(message) = record.get("message").and_then(Value::as_object) else {
        return Ok(None);
    };
    let usage = match message.get("usage") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(usage)) => usage,
        Some(_) => return Err(MalformedEntry::invalid("message.usage", "must be an object")),
    };

    let timestamp = match record.get("timestamp") {
        Some(Value::String(raw)) => parse_timestamp(raw)?,
        Some(_) => return Err(MalformedEntry::invalid("timestamp", "must be a string")),
        None => return Err(MalformedEntry::missing("timestamp")),
    };

    let model = match message.get("model") {
        Some(Value::String(model)) => ModelName::new(model.as_str())?,
        None | Some(Value::Null) => return Err(MalformedEntry::missing("message.model")),
        Some(_) => return Err(MalformedEntry::invalid("message.model", "must be a string")),
    };

    let tokens = TokenCounts {
        input_tokens: token_count(usage, "input_tokens", "message.usage.input_tokens")?,
        output_tokens: token_count(usage, "output_tokens", "message.usage.output_tokens")?,
        cache_creation_tokens: token_count(
            usage,
            "cache_creation_input_tokens",
            "message.usage.cache_creation_input_tokens",
        )?,
        cache_read_tokens: token_count(
            usage,
            "cache_read_input_tokens",
            "message.usage.cache_read_input_tokens",
        )?,
    };

    let precomputed_cost = match record.get("costUSD") {
        None | Some(Value::Null) => None,
        Some(Value::Number(number)) => {
            let cost = decimal_from_number(number)
                .ok_or_else(|| MalformedEntry::invalid("costUSD", "is not representable"))?;
            if cost.is_sign_negative() && !cost.is_zero() {
                return Err(MalformedEntry::invalid("costUSD", "must be non-negative"));
            }
            Some(cost)
        }
        Some(_) => return Err(MalformedEntry::invalid("costUSD", "must be a number")),
    };

    let session_id = match optional_string(record, "sessionId")? {
        Some(id) => SessionId::new(id)?,
        None => provenance
            .source
            .session_id
            .clone()
            .ok_or_else(|| MalformedEntry::missing("sessionId"))?,
    };

    let request_id = optional_string(record, "requestId")?
        .map(RequestId::new)
        .transpose()?;
    let message_id = optional_string(message, "id")?
        .map(MessageId::new)
        .transpose()?;

    Ok(Some(UsageEntry {
        timestamp,
        model,
        session_id,
        request_id,
        message_id,
        tokens,
        precomputed_cost,
        provenance,
    }))
}

/// Parse an ISO-8601 instant. Accepts RFC 3339 (with `Z` or an offset) and
/// offset-less `YYYY-MM-DDTHH:MM:SS[.f]`, which is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, MalformedEntry> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    Err(MalformedEntry::invalid(
        "timestamp",
        format!("`{}` is not an ISO-8601 instant", raw),
    ))
}

/// Convert a JSON number to a decimal using its textual form, so `0.1`
/// stays exactly `0.1`.
pub(crate) fn decimal_from_number(number: &Number) -> Option<Decimal> {
    if let Some(int) = number.as_i64() {
        return Some(Decimal::from(int));
    }
    if let Some(int) = number.as_u64() {
        return Some(Decimal::from(int));
    }
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
        .or_else(|| number.as_f64().filter(|v| v.is_finite()).and_then(Decimal::from_f64))
        .map(|d| d.normalize())
}

fn token_count(
    usage: &Map<String, Value>,
    key: &str,
    field: &'static str,
) -> Result<u64, MalformedEntry> {
    match usage.get(key) {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(number)) => {
            if let Some(count) = number.as_u64() {
                Ok(count)
            } else if number.as_i64().is_some() {
                Err(MalformedEntry::invalid(field, "must be non-negative"))
            } else {
                Err(MalformedEntry::invalid(field, "must be an integer"))
            }
        }
        Some(_) => Err(MalformedEntry::invalid(field, "must be an integer")),
    }
}

fn optional_string<'a>(
    object: &'a Map<String, Value>,
    key: &'static str,
) -> Result<Option<&'a str>, MalformedEntry> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(MalformedEntry::invalid(key, "must be a string")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceInfo;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::Arc;

    fn provenance() -> SourceProvenance {
        SourceProvenance {
            source: Arc::new(
                SourceInfo::new("/data/projects/demo/file-session.jsonl")
                    .with_session(SessionId::new("file-session").unwrap()),
            ),
            line: 7,
        }
    }

    fn record() -> Value {
        json!({
            "timestamp": "2024-01-15T10:30:00Z",
            "sessionId": "abc",
            "requestId": "req_456",
            "costUSD": 0.123,
            "message": {
                "id": "msg_123",
                "model": "claude-opus-4-1-20250805",
                "usage": {
                    "input_tokens": 1000,
                    "output_tokens": 500,
                    "cache_creation_input_tokens": 200,
                    "cache_read_input_tokens": 300
                }
            }
        })
    }

    #[test]
    fn test_full_record() {
        let entry = normalize(&record(), provenance()).unwrap().unwrap();
        assert_eq!(entry.timestamp, Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap());
        assert_eq!(entry.model.as_str(), "claude-opus-4-1-20250805");
        assert_eq!(entry.session_id.as_str(), "abc");
        assert_eq!(entry.request_id.unwrap().as_str(), "req_456");
        assert_eq!(entry.message_id.unwrap().as_str(), "msg_123");
        assert_eq!(entry.tokens, TokenCounts::new(1000, 500, 200, 300));
        assert_eq!(entry.precomputed_cost, Some(dec!(0.123)));
        assert_eq!(entry.provenance.line, 7);
    }

    #[test]
    fn test_missing_counts_default_to_zero() {
        let mut raw = record();
        raw["message"]["usage"] = json!({ "input_tokens": 5 });
        let entry = normalize(&raw, provenance()).unwrap().unwrap();
        assert_eq!(entry.tokens, TokenCounts::new(5, 0, 0, 0));
    }

    #[test]
    fn test_session_falls_back_to_provenance() {
        let mut raw = record();
        raw.as_object_mut().unwrap().remove("sessionId");
        let entry = normalize(&raw, provenance()).unwrap().unwrap();
        assert_eq!(entry.session_id.as_str(), "file-session");
    }

    #[test]
    fn test_absent_and_zero_cost_are_distinct() {
        let mut raw = record();
        raw.as_object_mut().unwrap().remove("costUSD");
        assert_eq!(normalize(&raw, provenance()).unwrap().unwrap().precomputed_cost, None);

        raw["costUSD"] = json!(0);
        assert_eq!(
            normalize(&raw, provenance()).unwrap().unwrap().precomputed_cost,
            Some(Decimal::ZERO)
        );
    }

    #[test]
    fn test_non_usage_records_are_ignored() {
        let raw = json!({ "timestamp": "2024-01-15T10:30:00Z", "message": { "role": "user" } });
        assert_eq!(normalize(&raw, provenance()).unwrap(), None);
        let raw = json!({ "type": "summary" });
        assert_eq!(normalize(&raw, provenance()).unwrap(), None);
    }

    #[test]
    fn test_rejections_name_the_field() {
        let mut raw = record();
        raw["message"]["model"] = json!("");
        assert_eq!(normalize(&raw, provenance()).unwrap_err().field, "message.model");

        let mut raw = record();
        raw["message"]["usage"]["output_tokens"] = json!(-3);
        assert_eq!(
            normalize(&raw, provenance()).unwrap_err().field,
            "message.usage.output_tokens"
        );

        let mut raw = record();
        raw["message"]["usage"]["input_tokens"] = json!(1.5);
        assert_eq!(
            normalize(&raw, provenance()).unwrap_err().field,
            "message.usage.input_tokens"
        );

        let mut raw = record();
        raw["timestamp"] = json!("yesterday");
        assert_eq!(normalize(&raw, provenance()).unwrap_err().field, "timestamp");

        let mut raw = record();
        raw["costUSD"] = json!(-1.0);
        assert_eq!(normalize(&raw, provenance()).unwrap_err().field, "costUSD");
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-01T12:00:00.000Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-01T14:00:00+02:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-01T12:00:00.000").unwrap(), expected);
        assert!(parse_timestamp("invalid").is_err());
    }

    #[test]
    fn test_decimal_from_scientific_number() {
        let number: Number = serde_json::from_str("3e-06").unwrap();
        assert_eq!(decimal_from_number(&number), Some(dec!(0.000003)));
        let number: Number = serde_json::from_str("0.1").unwrap();
        assert_eq!(decimal_from_number(&number), Some(dec!(0.1)));
    }
}
