//! Record - ingestion input
//!
//! An opaque JSON payload plus the timestamp derived from it when the record
//! was admitted. Records are immutable once built.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ContractError;

/// Single event record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Event time (seconds since epoch)
    timestamp: f64,

    /// Application payload
    payload: Value,
}

impl Record {
    /// Create a record with an explicit timestamp (seconds since epoch)
    pub fn new(timestamp: f64, payload: Value) -> Self {
        Self { timestamp, payload }
    }

    /// Admit a payload, deriving its timestamp with `timestamper`
    pub fn from_payload<T>(payload: Value, timestamper: &T) -> Result<Self, ContractError>
    where
        T: Timestamper + ?Sized,
    {
        let timestamp = timestamper.timestamp(&payload)?;
        Ok(Self { timestamp, payload })
    }

    #[inline]
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    #[inline]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }
}

/// Record → timestamp extractor
pub trait Timestamper: Send + Sync {
    /// Event time in seconds since epoch
    fn timestamp(&self, payload: &Value) -> Result<f64, ContractError>;
}

impl<F> Timestamper for F
where
    F: Fn(&Value) -> Result<f64, ContractError> + Send + Sync,
{
    fn timestamp(&self, payload: &Value) -> Result<f64, ContractError> {
        self(payload)
    }
}

/// How a timestamp field is encoded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampFormat {
    /// Strings are RFC 3339, numbers are epoch millis
    #[default]
    Auto,
    /// RFC 3339 / ISO-8601 string
    Iso,
    /// Epoch milliseconds
    Millis,
    /// Epoch seconds
    Seconds,
}

/// Reads the timestamp from a named top-level field
#[derive(Debug, Clone)]
pub struct FieldTimestamper {
    field: String,
    format: TimestampFormat,
}

impl FieldTimestamper {
    pub fn new(field: impl Into<String>, format: TimestampFormat) -> Self {
        Self {
            field: field.into(),
            format,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    fn parse_iso(raw: &str) -> Result<f64, ContractError> {
        let dt = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| ContractError::invalid_timestamp(raw, e.to_string()))?;
        Ok(dt.timestamp_millis() as f64 / 1000.0)
    }

    fn parse_number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl Timestamper for FieldTimestamper {
    fn timestamp(&self, payload: &Value) -> Result<f64, ContractError> {
        let value = payload.get(&self.field).ok_or_else(|| {
            ContractError::invalid_timestamp("<missing>", format!("field '{}' not present", self.field))
        })?;

        let not_numeric =
            || ContractError::invalid_timestamp(value, format!("field '{}' is not numeric", self.field));

        match (self.format, value) {
            (TimestampFormat::Iso, Value::String(s)) | (TimestampFormat::Auto, Value::String(s)) => {
                Self::parse_iso(s)
            }
            (TimestampFormat::Iso, other) => Err(ContractError::invalid_timestamp(
                other,
                "expected an ISO-8601 string",
            )),
            (TimestampFormat::Millis, v) | (TimestampFormat::Auto, v) => {
                Self::parse_number(v).map(|ms| ms / 1000.0).ok_or_else(not_numeric)
            }
            (TimestampFormat::Seconds, v) => Self::parse_number(v).ok_or_else(not_numeric),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_iso_field() {
        let ts = FieldTimestamper::new("timestamp", TimestampFormat::Auto);
        let record = Record::from_payload(json!({"timestamp": "2024-03-01T12:05:00Z"}), &ts).unwrap();
        assert_eq!(record.timestamp(), 1_709_294_700.0);
    }

    #[test]
    fn test_millis_and_seconds() {
        let millis = FieldTimestamper::new("t", TimestampFormat::Millis);
        assert_eq!(millis.timestamp(&json!({"t": 1500})).unwrap(), 1.5);

        let seconds = FieldTimestamper::new("t", TimestampFormat::Seconds);
        assert_eq!(seconds.timestamp(&json!({"t": "42"})).unwrap(), 42.0);
    }

    #[test]
    fn test_missing_field_is_invalid_timestamp() {
        let ts = FieldTimestamper::new("timestamp", TimestampFormat::Auto);
        let err = Record::from_payload(json!({"column": "a"}), &ts).unwrap_err();
        assert!(matches!(err, ContractError::InvalidTimestamp { .. }));
    }

    #[test]
    fn test_closure_timestamper() {
        let ts = |_: &Value| -> Result<f64, ContractError> { Ok(7.0) };
        let record = Record::from_payload(json!({}), &ts).unwrap();
        assert_eq!(record.timestamp(), 7.0);
    }
}
