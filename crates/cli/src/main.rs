mod cli;
mod http;
mod server;

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnloop_compute::scenario::{self, ScenarioConfig, ScenarioReport};
use turnloop_compute::{
    DispatchProbe, Dispatcher, HealthPoller, RouteTable, Scheduler, SchedulerConfig, SystemClock,
    TracingObserver,
};
use turnloop_core::{load_dotenv, Config};
use turnloop_pipeline::{compress_file, decompress_file, Codec, FileReport, PipelineConfig};

use crate::cli::{CliArgs, Command};
use crate::server::HttpFrontend;

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    load_dotenv();

    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&config.log.level, args.log_json || config.log.json);
    if let Some(path) = &args.config {
        info!(path = %path.display(), "loaded config");
    }

    match args.command {
        Command::Serve { host, port } => serve(&config, host, port),
        Command::Scenario {
            mode,
            compute_ms,
            horizon_ms,
            chunk_iterations,
            json,
        } => {
            let mut scenario = ScenarioConfig::new(mode).with_poller(&config.poller);
            if let Some(ms) = compute_ms {
                scenario.compute_duration = Duration::from_millis(ms);
            }
            if let Some(ms) = horizon_ms {
                scenario.horizon = Duration::from_millis(ms);
            }
            if let Some(n) = chunk_iterations {
                scenario.chunk_iterations = n.max(1);
            }
            let report = scenario::run(&scenario).context("scenario failed")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_scenario(&report);
            }
            Ok(())
        }
        Command::Compress {
            input,
            output,
            codec,
            level,
            json,
        } => {
            let output = output.unwrap_or_else(|| compressed_path(&input, codec));
            let level = level.unwrap_or(config.pipeline.level);
            let scheduler = system_scheduler(&config);
            let report = compress_file(
                &scheduler,
                &PipelineConfig::from(&config.pipeline),
                &input,
                &output,
                codec,
                level,
            )
            .with_context(|| format!("failed to compress {}", input.display()))?;
            print_file_report(&report, &output, json)
        }
        Command::Decompress {
            input,
            output,
            codec,
            json,
        } => {
            let output = match output {
                Some(path) => path,
                None => decompressed_path(&input, codec)?,
            };
            let scheduler = system_scheduler(&config);
            let report = decompress_file(
                &scheduler,
                &PipelineConfig::from(&config.pipeline),
                &input,
                &output,
                codec,
            )
            .with_context(|| format!("failed to decompress {}", input.display()))?;
            print_file_report(&report, &output, json)
        }
        Command::Routes => {
            for route in &config.routes {
                println!("{:<20} {:<10} {}", route.key, route.kind.to_string(), route.handler);
            }
            Ok(())
        }
    }
}

fn system_scheduler(config: &Config) -> Scheduler {
    Scheduler::new(
        Rc::new(SystemClock::new()),
        SchedulerConfig::from(&config.scheduler),
    )
}

fn serve(config: &Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    config.log_summary();
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    let scheduler = system_scheduler(config);
    let table = RouteTable::from_config(&config.routes, &config.compute)
        .context("invalid route table")?;
    if !table.contains(&config.poller.route) {
        bail!("poller route {} is not in the route table", config.poller.route);
    }
    let dispatcher = Dispatcher::new(&scheduler, table);

    let frontend = HttpFrontend::bind(&format!("{host}:{port}"), dispatcher.clone())
        .with_context(|| format!("failed to bind {host}:{port}"))?;
    let addr = frontend.local_addr().context("listener has no local address")?;
    scheduler.register_io("http", Box::new(frontend));

    let poller = HealthPoller::new(
        &scheduler,
        DispatchProbe::new(&dispatcher, config.poller.route.clone()),
    )
    .probe_immediately(config.poller.probe_immediately);
    poller.add_observer(TracingObserver::new(config.poller.route.clone()));
    poller.start_with(&config.poller);

    info!(addr = %addr, route = %config.poller.route, "serving");
    scheduler.run_until_idle();
    poller.stop();
    Ok(())
}

fn compressed_path(input: &Path, codec: Codec) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".");
    name.push(codec.extension());
    PathBuf::from(name)
}

fn decompressed_path(input: &Path, codec: Codec) -> Result<PathBuf> {
    match input.extension() {
        Some(ext) if ext == codec.extension() => Ok(input.with_extension("")),
        _ => bail!(
            "cannot derive an output name for {} (expected a .{} file); pass one explicitly",
            input.display(),
            codec.extension()
        ),
    }
}

fn print_scenario(report: &ScenarioReport) {
    println!("mode:            {} ({})", report.mode, report.route);
    match (report.compute_finished_ms, &report.digest) {
        (Some(ms), Some(digest)) => println!("compute:         finished at {ms} ms, sha256 {digest}"),
        _ => println!("compute:         unfinished at the horizon"),
    }
    println!("longest task:    {} ms over {} turns", report.longest_task_ms, report.turns);
    println!(
        "in compute window: {} succeeded, {} failed, {} timed out",
        report.window.succeeded, report.window.failed, report.window.timed_out
    );
    for probe in &report.probes {
        println!(
            "  probe #{:<3} tick {:>6} ms  resolved {:>6} ms  {}",
            probe.attempt, probe.scheduled_at_ms, probe.resolved_at_ms, probe.outcome
        );
    }
}

fn print_file_report(report: &FileReport, output: &Path, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!(
        "{} -> {} ({}): {} bytes in, {} bytes out, {} pauses",
        report.codec,
        output.display(),
        report.output_sha256,
        report.stats.bytes_in,
        report.stats.bytes_out,
        report.stats.pauses
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_output_paths() {
        assert_eq!(
            compressed_path(Path::new("data/log.txt"), Codec::Zstd),
            PathBuf::from("data/log.txt.zst")
        );
        assert_eq!(
            decompressed_path(Path::new("data/log.txt.gz"), Codec::Gzip).unwrap(),
            PathBuf::from("data/log.txt")
        );
        assert!(decompressed_path(Path::new("data/log.txt"), Codec::Gzip).is_err());
        assert_eq!(
            decompressed_path(Path::new("dump.zz"), Codec::Zlib).unwrap(),
            PathBuf::from("dump")
        );
    }
}
