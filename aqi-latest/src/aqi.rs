use crate::store::{FieldValue, FluxRecord, FluxTable};
use serde::Serialize;

/// One AQI reading. A `None` field means the sensor did not report it at that instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AqiRecord {
    pub latitude: Option<FieldValue>,
    pub longitude: Option<FieldValue>,
    #[serde(rename = "AQI")]
    pub aqi: Option<FieldValue>,
}

impl From<&FluxRecord> for AqiRecord {
    fn from(record: &FluxRecord) -> Self {
        AqiRecord {
            latitude: record.get("Latitude").cloned(),
            longitude: record.get("Longitude").cloned(),
            aqi: record.get("AQI").cloned(),
        }
    }
}

/// Flattens result tables into one record per row, preserving store order.
pub fn flatten(tables: &[FluxTable]) -> Vec<AqiRecord> {
    tables
        .iter()
        .flat_map(|table| table.records.iter())
        .map(AqiRecord::from)
        .collect()
}
