use crate::flux::FluxQuery;
use crate::store::{FieldValue, FluxRecord, FluxTable, StoreError, TelemetryStore};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::json;
use tracing::{debug, warn};

/// InfluxDB v2 query client speaking Flux over HTTP.
pub struct InfluxClient {
    client: Client,
    // An unusable URL is reported per query, so `/latest` still answers with 500.
    query_url: Result<Url, String>,
    token: Option<String>,
}

fn build_query_url(base_url: &str) -> Result<Url, String> {
    let mut base = Url::parse(base_url)
        .map_err(|e| format!("Invalid InfluxDB URL '{}': {}", base_url, e))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(format!(
            "Invalid InfluxDB URL '{}': unsupported scheme",
            base_url
        ));
    }
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("api/v2/query")
        .map_err(|e| format!("Invalid InfluxDB URL '{}': {}", base_url, e))
}

impl InfluxClient {
    pub fn new(client: Client, base_url: &str, token: &str) -> Self {
        let query_url = build_query_url(base_url);
        if let Err(e) = &query_url {
            warn!("{}; every query will fail until it is fixed", e);
        }
        let token = if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        };
        InfluxClient {
            client,
            query_url,
            token,
        }
    }

    /// Why queries cannot be sent, if the configured URL is unusable.
    pub fn config_error(&self) -> Option<&str> {
        self.query_url.as_ref().err().map(String::as_str)
    }
}

#[async_trait]
impl TelemetryStore for InfluxClient {
    async fn query(&self, org: &str, query: &FluxQuery) -> Result<Vec<FluxTable>, StoreError> {
        let body = json!({
            "query": query.to_string(),
            "type": "flux",
            "dialect": {
                "header": true,
                "delimiter": ",",
                "annotations": ["datatype", "group", "default"],
                "commentPrefix": "#",
                "dateTimeFormat": "RFC3339"
            }
        });
        let url = self.query_url.clone().map_err(StoreError::Config)?;
        let mut builder = self
            .client
            .post(url)
            .query(&[("org", org)])
            .header(reqwest::header::ACCEPT, "application/csv")
            .json(&body);
        if let Some(t) = &self.token {
            builder = builder.header(reqwest::header::AUTHORIZATION, format!("Token {}", t));
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            let message = error_message(&bytes);
            warn!(%status, "InfluxDB rejected query: {}", message);
            return Err(StoreError::Status { status, message });
        }
        debug!("Received {} byte(s) of annotated CSV", bytes.len());
        parse_annotated_csv(&bytes)
    }
}

// InfluxDB errors come back as {"code": ..., "message": ...}; fall back to raw text.
fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string())
}

/// Column layout of one annotated-CSV block.
#[derive(Default)]
struct Block {
    datatypes: Vec<String>,
    defaults: Vec<String>,
    columns: Option<Vec<String>>,
}

impl Block {
    fn is_error_table(&self) -> bool {
        matches!(&self.columns, Some(cols) if cols.first().map(String::as_str) == Some("error"))
    }
}

/// Decodes an annotated-CSV query response into tables.
pub fn parse_annotated_csv(body: &[u8]) -> Result<Vec<FluxTable>, StoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body);

    let mut tables: Vec<FluxTable> = Vec::new();
    let mut block = Block::default();
    // `table` value of the last emitted record within the current block
    let mut current_table: Option<String> = None;

    for row in reader.records() {
        let row = row.map_err(|e| StoreError::Decode(e.to_string()))?;
        let first = row.get(0).unwrap_or("");
        if first.starts_with('#') {
            match first {
                "#datatype" => {
                    block = Block {
                        datatypes: row.iter().skip(1).map(str::to_string).collect(),
                        ..Block::default()
                    };
                    current_table = None;
                }
                "#default" => {
                    block.defaults = row.iter().skip(1).map(str::to_string).collect();
                }
                _ => {}
            }
            continue;
        }

        if block.columns.is_none() {
            block.columns = Some(row.iter().skip(1).map(str::to_string).collect());
            continue;
        }
        let Some(columns) = block.columns.as_ref() else {
            continue;
        };

        if block.is_error_table() {
            let message = row.get(1).unwrap_or("").to_string();
            let reference = row.get(2).unwrap_or("");
            return Err(StoreError::Query(if reference.is_empty() {
                message
            } else {
                format!("{} (reference {})", message, reference)
            }));
        }

        let mut record = FluxRecord::default();
        for (i, column) in columns.iter().enumerate() {
            let raw = row.get(i + 1).unwrap_or("");
            let raw = if raw.is_empty() {
                block.defaults.get(i).map(String::as_str).unwrap_or("")
            } else {
                raw
            };
            if raw.is_empty() {
                continue;
            }
            let datatype = block.datatypes.get(i).map(String::as_str).unwrap_or("string");
            let value = parse_value(datatype, raw).ok_or_else(|| {
                StoreError::Decode(format!(
                    "column '{}' value '{}' is not a valid {}",
                    column, raw, datatype
                ))
            })?;
            record.values.insert(column.clone(), value);
        }

        let table_id = columns
            .iter()
            .position(|c| c == "table")
            .and_then(|i| row.get(i + 1))
            .unwrap_or("")
            .to_string();
        if current_table.as_ref() != Some(&table_id) {
            tables.push(FluxTable::default());
        }
        current_table = Some(table_id);
        if let Some(table) = tables.last_mut() {
            table.records.push(record);
        }
    }

    Ok(tables)
}

fn parse_value(datatype: &str, raw: &str) -> Option<FieldValue> {
    match datatype {
        "double" => match raw {
            "+Inf" => Some(FieldValue::Double(f64::INFINITY)),
            "-Inf" => Some(FieldValue::Double(f64::NEG_INFINITY)),
            // JSON has no NaN; keep it distinguishable from an absent cell
            "NaN" => Some(FieldValue::String(raw.to_string())),
            _ => raw.parse().ok().map(FieldValue::Double),
        },
        "long" => raw.parse().ok().map(FieldValue::Long),
        "unsignedLong" => raw.parse().ok().map(FieldValue::UnsignedLong),
        "boolean" => match raw {
            "true" => Some(FieldValue::Boolean(true)),
            "false" => Some(FieldValue::Boolean(false)),
            _ => None,
        },
        dt if dt.starts_with("dateTime") => Some(FieldValue::DateTime(raw.to_string())),
        _ => Some(FieldValue::String(raw.to_string())),
    }
}
