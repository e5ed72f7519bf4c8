use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Top-level config ────────────────────────────────────────────────

/// Full runtime configuration.
///
/// Parsed from `turnloop.toml` with support for `TURNLOOP_*` environment
/// overrides. Loaded once at startup and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub compute: ComputeConfig,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub log: LogConfig,

    /// Route table contents. A missing key gives the built-in demo table;
    /// an explicit `routes = []` serves no routes at all.
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteConfig>,
}

// ── Section configs ─────────────────────────────────────────────────

/// Listener settings for `turnloop serve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Health poller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Period between probe ticks.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Upper bound for a single probe, measured from its tick.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Route the loopback probe dispatches.
    #[serde(default = "default_probe_route")]
    pub route: String,

    /// Issue the first probe at start instead of after one interval.
    #[serde(default = "default_true")]
    pub probe_immediately: bool,
}

fn default_interval_ms() -> u64 {
    5000
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_probe_route() -> String {
    "/health".into()
}

fn default_true() -> bool {
    true
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
            route: default_probe_route(),
            probe_immediately: true,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Settings for the chunked hash computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeConfig {
    /// Iterations per chunk in yielding mode.
    #[serde(default = "default_chunk_iterations")]
    pub chunk_iterations: u64,

    /// Total iterations of the `hash` handler.
    #[serde(default = "default_iterations")]
    pub iterations: u64,

    /// Seed for the pseudo-random input of the `hash` handler.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_chunk_iterations() -> u64 {
    1_000
}

fn default_iterations() -> u64 {
    1_000_000
}

fn default_seed() -> u64 {
    0x5eed
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            chunk_iterations: default_chunk_iterations(),
            iterations: default_iterations(),
            seed: default_seed(),
        }
    }
}

/// Settings for file pipelines (`compress` / `decompress`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Bytes read from the source per chunk.
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,

    /// Buffered bytes in front of the sink before the source is paused.
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,

    /// Compression level handed to the codec.
    #[serde(default = "default_level")]
    pub level: u32,
}

fn default_read_chunk_size() -> usize {
    64 * 1024
}

fn default_high_water_mark() -> usize {
    256 * 1024
}

fn default_level() -> u32 {
    6
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            read_chunk_size: default_read_chunk_size(),
            high_water_mark: default_high_water_mark(),
            level: default_level(),
        }
    }
}

/// Event loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Tasks running longer than this are reported as blocking the loop.
    #[serde(default = "default_slow_task_ms")]
    pub slow_task_ms: u64,

    /// Upper bound on an idle sleep while I/O sources are registered.
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

fn default_slow_task_ms() -> u64 {
    100
}

fn default_idle_poll_ms() -> u64 {
    5
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            slow_task_ms: default_slow_task_ms(),
            idle_poll_ms: default_idle_poll_ms(),
        }
    }
}

/// Logging defaults. `RUST_LOG` still wins when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ── Routes ──────────────────────────────────────────────────────────

/// The closed set of handler kinds a route can be registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    /// Runs synchronously inside the dispatching task.
    Plain,
    /// Runs as one unbounded chunk. Blocks the loop; stress scenario only.
    Chunked,
    /// Runs in bounded chunks, yielding to the scheduler between them.
    Yielding,
}

impl RouteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteKind::Plain => "plain",
            RouteKind::Chunked => "chunked",
            RouteKind::Yielding => "yielding",
        }
    }
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `[[routes]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub key: String,
    pub kind: RouteKind,
    /// Name of a built-in handler (see [`BUILTIN_HANDLERS`]).
    pub handler: String,
}

impl RouteConfig {
    pub fn new(key: &str, kind: RouteKind, handler: &str) -> Self {
        Self {
            key: key.to_string(),
            kind,
            handler: handler.to_string(),
        }
    }
}

/// Built-in handler names and the route kinds each one supports.
pub const BUILTIN_HANDLERS: &[(&str, &[RouteKind])] = &[
    ("ok", &[RouteKind::Plain]),
    ("echo", &[RouteKind::Plain]),
    ("hash", &[RouteKind::Chunked, RouteKind::Yielding]),
];

/// The demo route table: a plain health route plus the hash computation in
/// both scheduling modes.
pub fn default_routes() -> Vec<RouteConfig> {
    vec![
        RouteConfig::new("/health", RouteKind::Plain, "ok"),
        RouteConfig::new("/echo", RouteKind::Plain, "echo"),
        RouteConfig::new("/compute", RouteKind::Chunked, "hash"),
        RouteConfig::new("/compute-fast", RouteKind::Yielding, "hash"),
    ]
}
