use std::path::PathBuf;

use clap::{Parser, Subcommand};
use turnloop_compute::scenario::ScenarioMode;
use turnloop_pipeline::Codec;

/// Single-threaded event loop demo: chunked compute, health polling and
/// streaming pipelines.
#[derive(Parser, Debug)]
#[command(name = "turnloop", version, about = "Cooperative event loop toolkit")]
pub struct CliArgs {
    /// Path to a TOML config file (defaults plus TURNLOOP_* env vars if unset)
    #[arg(long, global = true, env = "TURNLOOP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the route table over HTTP with the health poller running
    Serve {
        /// Listen host (overrides [server].host)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (overrides [server].port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run the health-probe starvation scenario on virtual time
    Scenario {
        /// blocking or yielding
        #[arg(long, default_value = "yielding")]
        mode: ScenarioMode,

        /// Simulated CPU time of the whole computation
        #[arg(long)]
        compute_ms: Option<u64>,

        /// Loop time at which the report is taken
        #[arg(long)]
        horizon_ms: Option<u64>,

        /// Iterations per yielding chunk
        #[arg(long)]
        chunk_iterations: Option<u64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compress a file through the streaming pipeline
    Compress {
        input: PathBuf,

        /// Output path (defaults to the input path plus the codec extension)
        output: Option<PathBuf>,

        /// gzip, deflate, zlib or zstd
        #[arg(long, default_value = "gzip")]
        codec: Codec,

        /// Compression level (overrides [pipeline].level)
        #[arg(long)]
        level: Option<u32>,

        #[arg(long)]
        json: bool,
    },

    /// Decompress a file through the streaming pipeline
    Decompress {
        input: PathBuf,

        /// Output path (defaults to the input path without the codec extension)
        output: Option<PathBuf>,

        /// gzip, deflate, zlib or zstd
        #[arg(long, default_value = "gzip")]
        codec: Codec,

        #[arg(long)]
        json: bool,
    },

    /// Print the configured route table
    Routes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scenario_flags() {
        let args = CliArgs::parse_from(["turnloop", "scenario", "--mode", "blocking", "--json"]);
        match args.command {
            Command::Scenario { mode, json, .. } => {
                assert_eq!(mode, ScenarioMode::Blocking);
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_compress_with_global_flags_after_subcommand() {
        let args = CliArgs::parse_from([
            "turnloop", "compress", "a.txt", "--codec", "zstd", "--log-json",
        ]);
        assert!(args.log_json);
        match args.command {
            Command::Compress { input, output, codec, .. } => {
                assert_eq!(input, PathBuf::from("a.txt"));
                assert!(output.is_none());
                assert_eq!(codec, Codec::Zstd);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
