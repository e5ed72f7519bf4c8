use std::io::Write;

use super::types::{Config, RouteConfig, RouteKind, default_routes};
use crate::error::ConfigError;

#[test]
fn parse_empty_toml_uses_defaults() {
    let cfg = Config::from_toml("").unwrap();
    assert_eq!(cfg.server.port, 8000);
    assert_eq!(cfg.poller.interval_ms, 5000);
    assert_eq!(cfg.poller.timeout_ms, 2000);
    assert_eq!(cfg.poller.route, "/health");
    assert!(cfg.poller.probe_immediately);
    assert_eq!(cfg.routes, default_routes());
}

#[test]
fn explicit_empty_routes_stay_empty() {
    let cfg = Config::from_toml("routes = []").unwrap();
    assert!(cfg.routes.is_empty());
    cfg.validate().unwrap();

    let cfg = Config::from_toml("[server]\nport = 9000").unwrap();
    assert_eq!(cfg.routes, default_routes());
}

#[test]
fn parse_full_toml() {
    let toml = r#"
[server]
host = "0.0.0.0"
port = 9100

[poller]
interval_ms = 1000
timeout_ms = 250
route = "/ping"
probe_immediately = false

[compute]
chunk_iterations = 64
iterations = 5000
seed = 7

[pipeline]
read_chunk_size = 4096
high_water_mark = 16384
level = 3

[scheduler]
slow_task_ms = 20

[[routes]]
key = "/ping"
kind = "plain"
handler = "ok"

[[routes]]
key = "/work"
kind = "yielding"
handler = "hash"
"#;
    let cfg = Config::from_toml(toml).unwrap();
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9100);
    assert_eq!(cfg.poller.interval().as_millis(), 1000);
    assert_eq!(cfg.poller.timeout().as_millis(), 250);
    assert!(!cfg.poller.probe_immediately);
    assert_eq!(cfg.compute.chunk_iterations, 64);
    assert_eq!(cfg.compute.seed, 7);
    assert_eq!(cfg.pipeline.level, 3);
    assert_eq!(cfg.scheduler.slow_task_ms, 20);
    assert_eq!(cfg.scheduler.idle_poll_ms, 5); // default
    assert_eq!(
        cfg.routes,
        vec![
            RouteConfig::new("/ping", RouteKind::Plain, "ok"),
            RouteConfig::new("/work", RouteKind::Yielding, "hash"),
        ]
    );
}

#[test]
fn reject_zero_interval() {
    let err = Config::from_toml("[poller]\ninterval_ms = 0\n").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { field: "poller.interval_ms", .. }));
}

#[test]
fn reject_zero_chunk_size() {
    let err = Config::from_toml("[compute]\nchunk_iterations = 0\n").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { field: "compute.chunk_iterations", .. }));
}

#[test]
fn timeout_longer_than_interval_is_allowed() {
    let cfg = Config::from_toml("[poller]\ninterval_ms = 100\ntimeout_ms = 500\n").unwrap();
    assert_eq!(cfg.poller.timeout_ms, 500);
}

#[test]
fn reject_duplicate_route() {
    let toml = r#"
[[routes]]
key = "/a"
kind = "plain"
handler = "ok"

[[routes]]
key = "/a"
kind = "plain"
handler = "echo"
"#;
    let err = Config::from_toml(toml).unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateRoute(ref k) if k == "/a"));
}

#[test]
fn reject_unknown_handler() {
    let toml = r#"
[[routes]]
key = "/a"
kind = "plain"
handler = "nope"
"#;
    let err = Config::from_toml(toml).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownHandler { .. }));
}

#[test]
fn reject_hash_as_plain() {
    let toml = r#"
[[routes]]
key = "/compute"
kind = "plain"
handler = "hash"
"#;
    let err = Config::from_toml(toml).unwrap_err();
    assert!(matches!(err, ConfigError::KindMismatch { kind: "plain", .. }));
}

#[test]
fn reject_unknown_kind() {
    let toml = r#"
[[routes]]
key = "/compute"
kind = "parallel"
handler = "hash"
"#;
    assert!(matches!(Config::from_toml(toml), Err(ConfigError::Parse(_))));
}

#[test]
fn load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[server]\nport = 8123").unwrap();
    let cfg = Config::from_file(file.path()).unwrap();
    assert_eq!(cfg.server.port, 8123);
}

#[test]
fn missing_file_is_io_error() {
    let err = Config::from_file("/definitely/not/here/turnloop.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn route_kind_display() {
    assert_eq!(RouteKind::Plain.to_string(), "plain");
    assert_eq!(RouteKind::Chunked.to_string(), "chunked");
    assert_eq!(RouteKind::Yielding.to_string(), "yielding");
}
