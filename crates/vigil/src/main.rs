mod daemon;

use std::path::{Path, PathBuf};
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use vigil_core::config::ConfigFile;
use vigil_core::{paths, Config};

fn main() {
	let args: Vec<String> = std::env::args().skip(1).collect();
	let mut config_path: Option<PathBuf> = None;
	let mut check = false;

	let mut iter = args.iter();
	while let Some(arg) = iter.next() {
		match arg.as_str() {
			"help" | "--help" | "-h" => {
				print_usage();
				return;
			}
			"version" | "--version" | "-V" => {
				println!("vigil {}", env!("CARGO_PKG_VERSION"));
				return;
			}
			"--check" => check = true,
			"--config" | "-c" => match iter.next() {
				Some(path) => config_path = Some(paths::expand_tilde(path)),
				None => {
					eprintln!("usage: vigil --config <path>");
					std::process::exit(1);
				}
			},
			other => {
				eprintln!("unknown argument: {}", other);
				eprintln!("run 'vigil --help' for usage");
				std::process::exit(1);
			}
		}
	}

	let path = config_path.unwrap_or_else(paths::config_path);
	let file = match ConfigFile::read(&path) {
		Ok(f) => f,
		Err(e) => {
			eprintln!("{}", e);
			std::process::exit(1);
		}
	};
	init_logging(&file.daemon.log_level);
	if !path.exists() {
		tracing::warn!("no configuration at {}, nothing to supervise", path.display());
	}

	let config = match file.resolve(&path) {
		Ok(c) => c,
		Err(e) => {
			tracing::error!("{}", e);
			std::process::exit(1);
		}
	};

	if check {
		print_check(&config, &path);
		return;
	}

	let runtime = match tokio::runtime::Runtime::new() {
		Ok(rt) => rt,
		Err(e) => {
			tracing::error!("failed to start runtime: {}", e);
			std::process::exit(1);
		}
	};
	if let Err(e) = runtime.block_on(daemon::run(config)) {
		tracing::error!("{}", e);
		std::process::exit(1);
	}
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(level: &str) {
	let filter = EnvFilter::try_from_default_env()
		.or_else(|_| EnvFilter::try_new(level))
		.unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_check(config: &Config, path: &Path) {
	let slaves: Vec<serde_json::Value> = config
		.slaves
		.iter()
		.map(|s| {
			serde_json::json!({
				"name": s.name,
				"file_name": s.file_name,
				"arguments": s.arguments,
				"working_directory": s.working_directory,
				"timeout_secs": s.timeout.as_secs(),
				"log_file": s.log_file,
				"flag_file": s.flag_file,
				"restart_delay_secs": s.restart_delay.as_secs(),
			})
		})
		.collect();
	let schedules: Vec<String> = config.schedules.iter().map(|s| s.to_string()).collect();
	let report = serde_json::json!({
		"config": path,
		"service": config.service,
		"strict_hours": config.daemon.strict_hours,
		"cron_timeout_secs": config.scheduler.timeout_secs,
		"slaves": slaves,
		"schedules": schedules,
	});
	match serde_json::to_string_pretty(&report) {
		Ok(text) => println!("{}", text),
		Err(e) => {
			eprintln!("{}", e);
			std::process::exit(1);
		}
	}
}

fn print_usage() {
	eprintln!("{} {} - process supervisor and cron daemon", "vigil".bold(), env!("CARGO_PKG_VERSION"));
	eprintln!();
	eprintln!("usage: {} [options]", "vigil".bold());
	eprintln!();
	eprintln!("{}", "options".cyan().bold());
	eprintln!("  {} <path>   Configuration file (default {})", "--config".bold(), paths::config_path().display());
	eprintln!("  {}          Load the configuration, print it as JSON and exit", "--check".bold());
	eprintln!("  {}           Show this help", "--help".bold());
	eprintln!("  {}        Show the version", "--version".bold());
	eprintln!();
	eprintln!("{}", "environment".cyan().bold());
	eprintln!("  {}         Log filter, overrides [daemon] log_level", "RUST_LOG".bold());
}
