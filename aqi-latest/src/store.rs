use crate::flux::FluxQuery;
use async_trait::async_trait;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use thiserror::Error;

/// A typed cell from a query result.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Double(f64),
    Long(i64),
    UnsignedLong(u64),
    Boolean(bool),
    String(String),
    /// RFC3339 text as returned by the store.
    DateTime(String),
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Double(v) => serializer.serialize_f64(*v),
            FieldValue::Long(v) => serializer.serialize_i64(*v),
            FieldValue::UnsignedLong(v) => serializer.serialize_u64(*v),
            FieldValue::Boolean(v) => serializer.serialize_bool(*v),
            FieldValue::String(v) | FieldValue::DateTime(v) => serializer.serialize_str(v),
        }
    }
}

/// One result row, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FluxRecord {
    pub values: HashMap<String, FieldValue>,
}

impl FluxRecord {
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.values.get(key)
    }
}

impl<K: Into<String>> FromIterator<(K, FieldValue)> for FluxRecord {
    fn from_iter<I: IntoIterator<Item = (K, FieldValue)>>(iter: I) -> Self {
        FluxRecord {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FluxTable {
    pub records: Vec<FluxRecord>,
}

/// Failure to execute a query against the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store responded with {status}: {message}")]
    Status {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("store reported a query error: {0}")]
    Query(String),
    #[error("malformed query result: {0}")]
    Decode(String),
    #[error("store is not configured: {0}")]
    Config(String),
    #[error("store query timed out after {0:?}")]
    Timeout(std::time::Duration),
}

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Runs `query` for `org` and returns the result tables in store order.
    async fn query(&self, org: &str, query: &FluxQuery) -> Result<Vec<FluxTable>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_values_serialize_as_plain_json_scalars() {
        let v = serde_json::to_value(vec![
            FieldValue::Double(12.9),
            FieldValue::Long(42),
            FieldValue::UnsignedLong(7),
            FieldValue::Boolean(true),
            FieldValue::String("ok".into()),
            FieldValue::DateTime("2024-05-01T00:00:00Z".into()),
        ])
        .expect("serialize");
        assert_eq!(
            v,
            json!([12.9, 42, 7, true, "ok", "2024-05-01T00:00:00Z"])
        );
    }

    #[test]
    fn record_lookup_distinguishes_absent_keys() {
        let rec: FluxRecord = [("AQI", FieldValue::Long(55))].into_iter().collect();
        assert_eq!(rec.get("AQI"), Some(&FieldValue::Long(55)));
        assert_eq!(rec.get("Latitude"), None);
    }
}
