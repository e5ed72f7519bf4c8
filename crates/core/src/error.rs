use thiserror::Error;

/// Errors raised while loading or validating the runtime configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("duplicate route key: {0}")]
    DuplicateRoute(String),

    #[error("route '{route}' uses unknown handler '{handler}'")]
    UnknownHandler { route: String, handler: String },

    #[error("route '{route}': handler '{handler}' cannot run as {kind}")]
    KindMismatch {
        route: String,
        handler: String,
        kind: &'static str,
    },
}
