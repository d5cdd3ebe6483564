use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::str::FromStr;

fn default_org() -> String {
    "dhts".into()
}

fn default_bucket() -> String {
    "airlytic".into()
}

fn default_range() -> String {
    "0".into()
}

fn default_log_level() -> String {
    "DEBUG".into()
}

#[derive(Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub influxdb_url: String,
    #[serde(default)]
    pub influxdb_token: String,
    #[serde(default = "default_org")]
    pub influxdb_org: String,
    #[serde(default = "default_bucket")]
    pub influxdb_bucket: String,
    // Start of the queried time range: "0" (epoch), a duration such as "-1h",
    // or an RFC3339 timestamp.
    #[serde(default = "default_range")]
    pub influxdb_range: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub listen: Option<String>,
    // Upper bound for a single store query, including reading the response.
    // If not set, defaults to 10 seconds.
    pub query_timeout_secs: Option<u64>,
    // Connection timeout in seconds for reaching the store.
    // If not set, uses reqwest's default behavior (no specific connect timeout).
    pub connect_timeout_secs: Option<u64>,
    // Maximum number of idle connections to keep alive per host.
    pub pool_max_idle_per_host: Option<usize>,
    // TCP keepalive interval in seconds to detect dead connections.
    pub tcp_keepalive_secs: Option<u64>,
    // Maximum number of store queries in flight across all requests.
    // If not set, a sensible default will be used in `AppState`.
    pub max_outbound_concurrency: Option<usize>,
    #[serde(default)]
    pub cors_allow_any: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            influxdb_url: String::new(),
            influxdb_token: String::new(),
            influxdb_org: default_org(),
            influxdb_bucket: default_bucket(),
            influxdb_range: default_range(),
            log_level: default_log_level(),
            listen: None,
            query_timeout_secs: None,
            connect_timeout_secs: None,
            pool_max_idle_per_host: None,
            tcp_keepalive_secs: None,
            max_outbound_concurrency: None,
            cors_allow_any: false,
        }
    }
}

// The token must never end up in logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("influxdb_url", &self.influxdb_url)
            .field("influxdb_token", &"<redacted>")
            .field("influxdb_org", &self.influxdb_org)
            .field("influxdb_bucket", &self.influxdb_bucket)
            .field("influxdb_range", &self.influxdb_range)
            .field("log_level", &self.log_level)
            .field("listen", &self.listen)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .field("tcp_keepalive_secs", &self.tcp_keepalive_secs)
            .field("max_outbound_concurrency", &self.max_outbound_concurrency)
            .field("cors_allow_any", &self.cors_allow_any)
            .finish()
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let cfg_str = fs::read_to_string(path)?;
        Ok(toml::from_str(&cfg_str)?)
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from a key lookup, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Config::default();
        if let Some(v) = lookup("INFLUXDB_URL") {
            cfg.influxdb_url = v;
        }
        if let Some(v) = lookup("INFLUXDB_TOKEN") {
            cfg.influxdb_token = v;
        }
        if let Some(v) = lookup("INFLUXDB_ORG") {
            cfg.influxdb_org = v;
        }
        if let Some(v) = lookup("INFLUXDB_BUCKET") {
            cfg.influxdb_bucket = v;
        }
        if let Some(v) = lookup("INFLUXDB_RANGE") {
            cfg.influxdb_range = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            cfg.log_level = v;
        }
        cfg.listen = lookup("LISTEN_ADDR").filter(|v| !v.trim().is_empty());
        cfg.query_timeout_secs = parse_var(&lookup, "QUERY_TIMEOUT_SECS")?;
        cfg.connect_timeout_secs = parse_var(&lookup, "CONNECT_TIMEOUT_SECS")?;
        cfg.pool_max_idle_per_host = parse_var(&lookup, "POOL_MAX_IDLE_PER_HOST")?;
        cfg.tcp_keepalive_secs = parse_var(&lookup, "TCP_KEEPALIVE_SECS")?;
        cfg.max_outbound_concurrency = parse_var(&lookup, "MAX_OUTBOUND_CONCURRENCY")?;
        cfg.cors_allow_any = parse_var(&lookup, "CORS_ALLOW_ANY")?.unwrap_or(false);
        Ok(cfg)
    }

    /// Translates `log_level` into an `EnvFilter` directive.
    pub fn log_filter(&self) -> String {
        match self.log_level.trim().to_ascii_uppercase().as_str() {
            "TRACE" => "trace",
            "DEBUG" => "debug",
            "INFO" => "info",
            "WARN" | "WARNING" => "warn",
            "ERROR" | "CRITICAL" | "FATAL" => "error",
            "OFF" => "off",
            _ => "debug",
        }
        .to_string()
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> anyhow::Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            let value = raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {}: '{}'", key, raw))?;
            Ok(Some(value))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = Config::from_lookup(|_| None).expect("config");
        assert_eq!(cfg.influxdb_url, "");
        assert_eq!(cfg.influxdb_token, "");
        assert_eq!(cfg.influxdb_org, "dhts");
        assert_eq!(cfg.influxdb_bucket, "airlytic");
        assert_eq!(cfg.influxdb_range, "0");
        assert_eq!(cfg.log_level, "DEBUG");
        assert!(cfg.listen.is_none());
        assert!(!cfg.cors_allow_any);
    }

    #[test]
    fn environment_overrides_defaults() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("INFLUXDB_URL", "http://influx:8086"),
            ("INFLUXDB_BUCKET", "sensors"),
            ("INFLUXDB_RANGE", "-1h"),
            ("QUERY_TIMEOUT_SECS", "3"),
            ("CORS_ALLOW_ANY", "true"),
        ]))
        .expect("config");
        assert_eq!(cfg.influxdb_url, "http://influx:8086");
        assert_eq!(cfg.influxdb_bucket, "sensors");
        assert_eq!(cfg.influxdb_range, "-1h");
        assert_eq!(cfg.query_timeout_secs, Some(3));
        assert!(cfg.cors_allow_any);
    }

    #[test]
    fn blank_listen_addr_falls_back_to_default() {
        let cfg = Config::from_lookup(lookup_from(&[("LISTEN_ADDR", "  ")])).expect("config");
        assert!(cfg.listen.is_none());
        let cfg = Config::from_lookup(lookup_from(&[("LISTEN_ADDR", "127.0.0.1:8080")]))
            .expect("config");
        assert_eq!(cfg.listen.as_deref(), Some("127.0.0.1:8080"));
    }

    #[test]
    fn malformed_number_names_the_variable() {
        let err = Config::from_lookup(lookup_from(&[("QUERY_TIMEOUT_SECS", "soon")]))
            .expect_err("should reject non-numeric timeout");
        assert!(
            err.to_string().contains("QUERY_TIMEOUT_SECS"),
            "error should name the variable: {}",
            err
        );
    }

    #[test]
    fn log_filter_accepts_python_style_levels() {
        let mut cfg = Config::default();
        assert_eq!(cfg.log_filter(), "debug");
        cfg.log_level = "WARNING".into();
        assert_eq!(cfg.log_filter(), "warn");
        cfg.log_level = "critical".into();
        assert_eq!(cfg.log_filter(), "error");
    }

    #[test]
    fn debug_output_redacts_token() {
        let cfg = Config {
            influxdb_token: "s3cr3t".into(),
            ..Config::default()
        };
        let printed = format!("{:?}", cfg);
        assert!(!printed.contains("s3cr3t"));
    }

    #[test]
    fn parse_example_config() {
        let s = fs::read_to_string("config.toml.example").expect("read example config");
        let cfg: Config = toml::from_str(&s).expect("parse example toml");
        assert_eq!(cfg.influxdb_bucket, "airlytic");
        assert_eq!(cfg.influxdb_range, "0");
    }
}
