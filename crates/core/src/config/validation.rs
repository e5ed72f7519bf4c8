use std::collections::HashSet;

use super::types::{BUILTIN_HANDLERS, Config};
use crate::error::ConfigError;

impl Config {
    /// Validate the config: positive periods, known handlers, unique routes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_poller()?;
        self.validate_compute()?;
        self.validate_pipeline()?;
        self.validate_routes()?;
        Ok(())
    }

    fn validate_poller(&self) -> Result<(), ConfigError> {
        if self.poller.interval_ms == 0 {
            return Err(invalid("poller.interval_ms", "must be greater than zero"));
        }
        if self.poller.timeout_ms == 0 {
            return Err(invalid("poller.timeout_ms", "must be greater than zero"));
        }
        if self.poller.timeout_ms >= self.poller.interval_ms {
            // Legal, but every slow probe will make the next tick skip.
            tracing::warn!(
                interval_ms = self.poller.interval_ms,
                timeout_ms = self.poller.timeout_ms,
                "probe timeout is not shorter than the poll interval; overlapping ticks will be skipped"
            );
        }
        if self.poller.route.is_empty() {
            return Err(invalid("poller.route", "must not be empty"));
        }
        Ok(())
    }

    fn validate_compute(&self) -> Result<(), ConfigError> {
        if self.compute.chunk_iterations == 0 {
            return Err(invalid("compute.chunk_iterations", "must be greater than zero"));
        }
        Ok(())
    }

    fn validate_pipeline(&self) -> Result<(), ConfigError> {
        if self.pipeline.read_chunk_size == 0 {
            return Err(invalid("pipeline.read_chunk_size", "must be greater than zero"));
        }
        if self.pipeline.high_water_mark == 0 {
            return Err(invalid("pipeline.high_water_mark", "must be greater than zero"));
        }
        Ok(())
    }

    /// Route keys are unique and every handler exists for its declared kind.
    fn validate_routes(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for route in &self.routes {
            if !seen.insert(route.key.as_str()) {
                return Err(ConfigError::DuplicateRoute(route.key.clone()));
            }
            let kinds = BUILTIN_HANDLERS
                .iter()
                .find(|(name, _)| *name == route.handler)
                .map(|(_, kinds)| *kinds)
                .ok_or_else(|| ConfigError::UnknownHandler {
                    route: route.key.clone(),
                    handler: route.handler.clone(),
                })?;
            if !kinds.contains(&route.kind) {
                return Err(ConfigError::KindMismatch {
                    route: route.key.clone(),
                    handler: route.handler.clone(),
                    kind: route.kind.as_str(),
                });
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
