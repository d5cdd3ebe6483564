use crate::config::Config;
use crate::flux::QueryParameters;
use crate::influx::InfluxClient;
use crate::store::TelemetryStore;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};

const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_OUTBOUND: usize = 32;

pub struct AppState {
    pub store: Arc<dyn TelemetryStore>,
    pub params: QueryParameters,
    pub org: String,
    pub query_timeout: Duration,
    pub semaphore: Arc<Semaphore>,
    pub cors_allow_any: bool,
}

impl AppState {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        params: QueryParameters,
        org: impl Into<String>,
        query_timeout: Duration,
        max_outbound: usize,
    ) -> Self {
        AppState {
            store,
            params,
            org: org.into(),
            query_timeout,
            semaphore: Arc::new(Semaphore::new(max_outbound)),
            cors_allow_any: false,
        }
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let params = QueryParameters::new(&cfg.influxdb_bucket, &cfg.influxdb_range)?;
        info!(
            bucket = %params.bucket,
            range_start = %params.range_start,
            max_rows = params.max_rows,
            "Query parameters loaded"
        );

        let timeout_secs = cfg.query_timeout_secs.unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS);
        if timeout_secs == 0 {
            anyhow::bail!("query_timeout_secs must be at least 1");
        }
        let timeout = Duration::from_secs(timeout_secs);
        let mut builder = Client::builder().timeout(timeout);
        if let Some(secs) = cfg.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        if let Some(secs) = cfg.tcp_keepalive_secs {
            builder = builder.tcp_keepalive(Duration::from_secs(secs));
        }
        let client = builder.build()?;
        debug!("HTTP client created with timeout: {:?}", timeout);

        let store = InfluxClient::new(client, &cfg.influxdb_url, &cfg.influxdb_token);
        if store.config_error().is_none() {
            info!(
                "Registered InfluxDB store: url='{}' org='{}'",
                cfg.influxdb_url, cfg.influxdb_org
            );
        }

        let max_outbound = cfg.max_outbound_concurrency.unwrap_or(DEFAULT_MAX_OUTBOUND);
        if max_outbound == 0 {
            anyhow::bail!("max_outbound_concurrency must be at least 1");
        }
        debug!("Created semaphore with {} permits", max_outbound);

        let mut state = AppState::new(
            Arc::new(store),
            params,
            cfg.influxdb_org.clone(),
            timeout,
            max_outbound,
        );
        state.cors_allow_any = cfg.cors_allow_any;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flux::RangeStart;

    fn base_config() -> Config {
        Config {
            influxdb_url: "http://127.0.0.1:8086".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn appstate_from_config_uses_defaults() {
        let st = AppState::from_config(&base_config()).expect("build state");
        assert_eq!(st.org, "dhts");
        assert_eq!(st.params.bucket, "airlytic");
        assert_eq!(st.params.range_start, RangeStart::Unix(0));
        assert_eq!(st.params.max_rows, 100);
        assert_eq!(st.query_timeout, Duration::from_secs(10));
        assert_eq!(st.semaphore.available_permits(), 32);
        assert!(!st.cors_allow_any);
    }

    #[test]
    fn appstate_starts_with_invalid_store_url() {
        let cfg = Config {
            influxdb_url: "not-a-valid-url".to_string(),
            ..Config::default()
        };
        assert!(
            AppState::from_config(&cfg).is_ok(),
            "an unusable URL should surface per request, not at startup"
        );
        let defaults = Config::from_lookup(|_| None).expect("config");
        assert!(AppState::from_config(&defaults).is_ok());
    }

    #[test]
    fn appstate_rejects_zero_timeout() {
        let cfg = Config {
            query_timeout_secs: Some(0),
            ..base_config()
        };
        let err = AppState::from_config(&cfg).err().expect("zero timeout should fail");
        assert!(err.to_string().contains("query_timeout_secs"), "{}", err);
    }

    #[test]
    fn appstate_rejects_unsafe_range_start() {
        let cfg = Config {
            influxdb_range: "-1h) |> yield()".to_string(),
            ..base_config()
        };
        assert!(AppState::from_config(&cfg).is_err());
    }

    #[test]
    fn appstate_rejects_zero_concurrency() {
        let cfg = Config {
            max_outbound_concurrency: Some(0),
            ..base_config()
        };
        assert!(AppState::from_config(&cfg).is_err());
    }
}
