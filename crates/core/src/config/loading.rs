use std::path::Path;

use crate::error::ConfigError;

use super::types::{
    ComputeConfig, Config, LogConfig, PipelineSettings, PollerConfig, SchedulerSettings,
    ServerConfig, default_routes,
};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

impl Config {
    /// Parse config from a TOML string, apply env overrides, then validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus env overrides, used when no config file is given.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load `path` when given, otherwise fall back to [`Config::from_env`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file(p),
            None => Self::from_env(),
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!(
            host = %self.server.host,
            port = self.server.port,
            "config: server"
        );
        tracing::info!(
            interval_ms = self.poller.interval_ms,
            timeout_ms = self.poller.timeout_ms,
            route = %self.poller.route,
            "config: poller"
        );
        tracing::info!(
            chunk_iterations = self.compute.chunk_iterations,
            iterations = self.compute.iterations,
            "config: compute"
        );
        if self.routes.is_empty() {
            tracing::warn!("config: no routes, every request gets 404");
        }
        for route in &self.routes {
            tracing::info!(key = %route.key, kind = %route.kind, handler = %route.handler, "config: route");
        }
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `TURNLOOP_SECTION_KEY` overrides `section.key`.
    /// Values that fail to parse are ignored with a warning.
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TURNLOOP_SERVER_HOST") {
            self.server.host = v;
        }
        override_parsed("TURNLOOP_SERVER_PORT", &mut self.server.port);
        override_parsed("TURNLOOP_POLLER_INTERVAL_MS", &mut self.poller.interval_ms);
        override_parsed("TURNLOOP_POLLER_TIMEOUT_MS", &mut self.poller.timeout_ms);
        if let Ok(v) = std::env::var("TURNLOOP_POLLER_ROUTE") {
            self.poller.route = v;
        }
        override_parsed(
            "TURNLOOP_COMPUTE_CHUNK_ITERATIONS",
            &mut self.compute.chunk_iterations,
        );
        override_parsed("TURNLOOP_COMPUTE_ITERATIONS", &mut self.compute.iterations);
        override_parsed(
            "TURNLOOP_PIPELINE_HIGH_WATER_MARK",
            &mut self.pipeline.high_water_mark,
        );
        if let Ok(v) = std::env::var("TURNLOOP_LOG_LEVEL") {
            self.log.level = v;
        }
    }
}

fn override_parsed<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(v) = std::env::var(key) {
        match v.parse::<T>() {
            Ok(parsed) => *slot = parsed,
            Err(_) => tracing::warn!(key, value = %v, "ignoring unparsable env override"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            poller: PollerConfig::default(),
            compute: ComputeConfig::default(),
            pipeline: PipelineSettings::default(),
            scheduler: SchedulerSettings::default(),
            log: LogConfig::default(),
            routes: default_routes(),
        }
    }
}
