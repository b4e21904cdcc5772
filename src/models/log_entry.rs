use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single log line from a running execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Nanosecond-resolution timestamp assigned by the platform.
    pub timestamp: DateTime<Utc>,
    pub severity: String,
    pub message: String,
    pub structured_fields: Map<String, Value>,
}

impl LogEntry {
    /// Build an entry from one element of a log-tail batch.
    ///
    /// Returns `None` when the entry has no usable timestamp.
    pub fn from_json(value: &Value) -> Option<Self> {
        let timestamp = parse_timestamp(value.get("timestamp"))
            .or_else(|| parse_timestamp(value.get("receiveTimestamp")))?;
        let severity = parse_severity(value.get("severity"));

        let mut fields = match value.get("jsonPayload").map(unwrap_struct_value) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        fields.remove("@type");

        let message = match value.get("textPayload").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => match fields.remove("message") {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => String::new(),
            },
        };

        Some(Self {
            timestamp,
            severity,
            message,
            structured_fields: fields,
        })
    }

    /// Render for the terminal: `HH:MM:SS.mmm SEVERITY message key=value...`
    pub fn format_line(&self) -> String {
        let mut line = format!(
            "{} {:<7} {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.severity,
            self.message.trim_end()
        );
        for (key, value) in &self.structured_fields {
            match value {
                Value::String(s) => line.push_str(&format!(" {}={}", key, s)),
                other => line.push_str(&format!(" {}={}", key, other)),
            }
        }
        line
    }
}

/// Sort a delivered batch into chronological order.
///
/// Batches are not guaranteed to arrive in timestamp order; the sort is
/// stable so equal timestamps keep their delivery order.
pub fn sort_batch(entries: &mut [LogEntry]) {
    entries.sort_by_key(|e| e.timestamp);
}

/// True for entries that only carry platform-internal diagnostics (audit
/// records, bare type markers, empty payloads) and should not be shown.
pub fn is_platform_diagnostic(value: &Value) -> bool {
    let has_text = value
        .get("textPayload")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    if has_text {
        return false;
    }

    let json_payload = value.get("jsonPayload").map(unwrap_struct_value);
    let has_json = match json_payload {
        Some(Value::Object(ref map)) => map.keys().any(|k| k != "@type"),
        Some(Value::Null) | None => false,
        Some(_) => true,
    };
    !has_json
}

/// Unwrap the vendor's structured-value encoding into plain JSON.
///
/// Handles `{"fields": {...}}` structs, `{"stringValue": ..}`-style scalars,
/// `{"structValue": ..}` and `{"listValue": {"values": [..]}}` at any depth.
/// Values that are already plain pass through with their children unwrapped.
pub fn unwrap_struct_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            if let Some((key, inner)) = map.iter().next().filter(|_| map.len() == 1) {
                match key.as_str() {
                    "stringValue" | "boolValue" | "numberValue" => return inner.clone(),
                    "nullValue" => return Value::Null,
                    "structValue" => return unwrap_struct_value(inner),
                    "listValue" => {
                        let values = inner
                            .get("values")
                            .and_then(Value::as_array)
                            .map(|items| items.iter().map(unwrap_struct_value).collect())
                            .unwrap_or_default();
                        return Value::Array(values);
                    }
                    "fields" if inner.is_object() => return unwrap_struct_value(inner),
                    _ => {}
                }
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), unwrap_struct_value(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(unwrap_struct_value).collect()),
        other => other.clone(),
    }
}

/// Timestamps arrive as RFC 3339 strings or as `{seconds, nanos}` objects.
fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Object(map) => {
            let seconds = match map.get("seconds")? {
                Value::Number(n) => n.as_i64()?,
                Value::String(s) => s.parse().ok()?,
                _ => return None,
            };
            let nanos = map.get("nanos").and_then(Value::as_u64).unwrap_or(0) as u32;
            DateTime::from_timestamp(seconds, nanos)
        }
        _ => None,
    }
}

/// Severity arrives as a name or as the numeric level.
fn parse_severity(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) if !s.is_empty() => s.to_uppercase(),
        Some(Value::Number(n)) => match n.as_u64().unwrap_or(0) {
            100 => "DEBUG",
            200 => "INFO",
            300 => "NOTICE",
            400 => "WARNING",
            500 => "ERROR",
            600 => "CRITICAL",
            700 => "ALERT",
            800 => "EMERGENCY",
            _ => "DEFAULT",
        }
        .to_string(),
        _ => "DEFAULT".to_string(),
    }
}
