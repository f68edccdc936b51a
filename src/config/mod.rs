use anyhow::{bail, Context, Result};
use axum::http::HeaderValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Environment prefix for nested keys, e.g. `TRAFFICDB__SERVER__PORT=8080`.
const ENV_PREFIX: &str = "TRAFFICDB";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3100
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Access log to tail (and to bulk-import with `--import`).
    #[serde(default = "default_log_path")]
    pub log_path: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_import_batch_size")]
    pub import_batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            poll_interval_ms: default_poll_interval_ms(),
            flush_interval_ms: default_flush_interval_ms(),
            import_batch_size: default_import_batch_size(),
        }
    }
}

fn default_log_path() -> String {
    "/var/log/nginx/access.log".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_flush_interval_ms() -> u64 {
    5_000
}

fn default_import_batch_size() -> usize {
    10_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregationConfig {
    #[serde(default = "default_aggregation_interval_secs")]
    pub interval_secs: u64,
    /// Raw events younger than this are not folded.
    #[serde(default = "default_freshness_horizon_secs")]
    pub freshness_horizon_secs: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_aggregation_interval_secs(),
            freshness_horizon_secs: default_freshness_horizon_secs(),
        }
    }
}

fn default_aggregation_interval_secs() -> u64 {
    300
}

fn default_freshness_horizon_secs() -> u64 {
    3_600
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "metrics.db".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Shared secret. When unset every request is allowed.
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl AppConfig {
    /// Load configuration from defaults, an optional file and the process
    /// environment.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        Self::load_from(config_path, std::env::vars())
    }

    /// Same as [`AppConfig::load`] with an explicit set of environment
    /// variables.
    ///
    /// Precedence, lowest first: defaults, file, `TRAFFICDB__*` variables,
    /// then the flat `PORT`, `NGINX_LOG_PATH`, `API_KEY`, `ALLOWED_ORIGINS`
    /// and `DB_PATH` variables.
    pub fn load_from(
        config_path: Option<&str>,
        env: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self> {
        let env: HashMap<String, String> = env.into_iter().collect();
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .list_separator(",")
                .with_list_parse_key("cors.allowed_origins")
                .try_parsing(true)
                .source(Some(env.clone().into_iter().collect())),
        );

        if let Some(port) = non_empty(&env, "PORT") {
            let port: u16 = port
                .parse()
                .with_context(|| format!("Invalid PORT '{}'", port))?;
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(path) = non_empty(&env, "NGINX_LOG_PATH") {
            builder = builder.set_override("ingest.log_path", path)?;
        }
        if let Some(key) = non_empty(&env, "API_KEY") {
            builder = builder.set_override("auth.api_key", key)?;
        }
        if let Some(origins) = non_empty(&env, "ALLOWED_ORIGINS") {
            let origins: Vec<String> = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
            builder = builder.set_override("cors.allowed_origins", origins)?;
        }
        if let Some(path) = non_empty(&env, "DB_PATH") {
            builder = builder.set_override("storage.db_path", path)?;
        }

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.ingest.log_path.trim().is_empty() {
            bail!("ingest.log_path must not be empty");
        }
        if self.ingest.poll_interval_ms == 0 {
            bail!("ingest.poll_interval_ms must be greater than zero");
        }
        if self.ingest.flush_interval_ms == 0 {
            bail!("ingest.flush_interval_ms must be greater than zero");
        }
        if self.ingest.import_batch_size == 0 {
            bail!("ingest.import_batch_size must be greater than zero");
        }
        if self.aggregation.interval_secs == 0 {
            bail!("aggregation.interval_secs must be greater than zero");
        }
        if self.storage.db_path.trim().is_empty() {
            bail!("storage.db_path must not be empty");
        }
        if matches!(&self.auth.api_key, Some(key) if key.is_empty()) {
            bail!("auth.api_key must not be empty when set");
        }
        for origin in &self.cors.allowed_origins {
            if origin != "*" {
                HeaderValue::from_str(origin)
                    .with_context(|| format!("Invalid CORS origin '{}'", origin))?;
            }
        }

        Ok(())
    }
}

fn non_empty<'a>(env: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    env.get(key).map(String::as_str).filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_without_file_or_env() {
        let config = AppConfig::load_from(None, env(&[])).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3100);
        assert_eq!(config.ingest.log_path, "/var/log/nginx/access.log");
        assert_eq!(config.ingest.flush_interval_ms, 5_000);
        assert_eq!(config.aggregation.interval_secs, 300);
        assert_eq!(config.storage.db_path, "metrics.db");
        assert_eq!(config.auth.api_key, None);
        assert_eq!(config.cors.allowed_origins, vec!["*"]);
        config.validate().unwrap();
    }

    #[test]
    fn legacy_variables_override_file_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nport = 4000\n\n[storage]\ndb_path = \"/data/from-file.db\""
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = AppConfig::load_from(
            Some(&path),
            env(&[
                ("PORT", "8080"),
                ("API_KEY", "s3cret"),
                ("ALLOWED_ORIGINS", "https://a.example, https://b.example"),
            ]),
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.db_path, "/data/from-file.db");
        assert_eq!(config.auth.api_key.as_deref(), Some("s3cret"));
        assert_eq!(
            config.cors.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn prefixed_variables_set_nested_keys() {
        let config = AppConfig::load_from(
            None,
            env(&[
                ("TRAFFICDB__INGEST__POLL_INTERVAL_MS", "250"),
                ("TRAFFICDB__AGGREGATION__FRESHNESS_HORIZON_SECS", "7200"),
            ]),
        )
        .unwrap();

        assert_eq!(config.ingest.poll_interval_ms, 250);
        assert_eq!(config.aggregation.freshness_horizon_secs, 7_200);
    }

    #[test]
    fn invalid_port_is_rejected() {
        assert!(AppConfig::load_from(None, env(&[("PORT", "not-a-port")])).is_err());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.ingest.flush_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.auth.api_key = Some(String::new());
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.cors.allowed_origins = vec!["bad\norigin".to_string()];
        assert!(config.validate().is_err());
    }
}
