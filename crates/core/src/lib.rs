pub mod config;
pub mod error;

pub use config::{
    Config, ComputeConfig, LogConfig, PipelineSettings, PollerConfig, RouteConfig, RouteKind,
    SchedulerSettings, ServerConfig, load_dotenv,
};
pub use error::ConfigError;
