use crate::cron::{CronSchedule, ScheduleOptions};
use crate::error::ConfigError;
use crate::paths::expand_tilde;
use crate::types::{ServiceSettings, SlaveConfig, DEFAULT_RESTART_DELAY_SECS};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// On-disk layout of `config.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
	#[serde(default)]
	pub service: ServiceSettings,
	#[serde(default)]
	pub daemon: DaemonConfig,
	#[serde(default)]
	pub scheduler: SchedulerConfig,
	#[serde(default)]
	pub slaves: BTreeMap<String, SlaveEntry>,
	#[serde(default)]
	pub cron: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
	#[serde(default = "default_log_level")]
	pub log_level: String,
	#[serde(default)]
	pub strict_hours: bool,
	#[serde(default = "default_true")]
	pub pid_file: bool,
}

impl Default for DaemonConfig {
	fn default() -> Self {
		Self {
			log_level: default_log_level(),
			strict_hours: false,
			pid_file: true,
		}
	}
}

fn default_log_level() -> String {
	"info".to_string()
}
fn default_true() -> bool {
	true
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SchedulerConfig {
	#[serde(default)]
	pub timeout_secs: u64,
	pub crontab: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SlaveEntry {
	pub file_name: Option<String>,
	#[serde(default)]
	pub arguments: String,
	pub working_directory: Option<String>,
	#[serde(default)]
	pub timeout_secs: u64,
	pub log_file: Option<String>,
	pub flag_file: Option<String>,
	#[serde(default = "default_restart_delay")]
	pub restart_delay_secs: u64,
}

fn default_restart_delay() -> u64 {
	DEFAULT_RESTART_DELAY_SECS
}

/// Resolved, immutable configuration handed to the daemon.
#[derive(Debug, Clone, Default)]
pub struct Config {
	pub service: ServiceSettings,
	pub daemon: DaemonConfig,
	pub scheduler: SchedulerConfig,
	pub slaves: Vec<SlaveConfig>,
	pub schedules: Vec<CronSchedule>,
}

impl Config {
	pub fn schedule_options(&self) -> ScheduleOptions {
		ScheduleOptions {
			strict_hours: self.daemon.strict_hours,
		}
	}

	/// Timeout for one-shot cron invocations, `None` when disabled.
	pub fn cron_timeout(&self) -> Option<Duration> {
		match self.scheduler.timeout_secs {
			0 => None,
			secs => Some(Duration::from_secs(secs)),
		}
	}
}

/// Loads `path`. A missing file yields the defaults; an unreadable or
/// malformed file is an error. Bad slaves and cron lines are logged and skipped.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
	if !path.exists() {
		tracing::warn!("no configuration at {}, nothing to supervise", path.display());
	}
	ConfigFile::read(path)?.resolve(path)
}

/// Parses configuration text; `path` names the source in errors and anchors
/// a relative `crontab` path.
pub fn from_toml_str(content: &str, path: &Path) -> Result<Config, ConfigError> {
	ConfigFile::parse(content, path)?.resolve(path)
}

impl ConfigFile {
	/// Reads `path` without resolving slaves or schedules; a missing file
	/// yields the defaults.
	pub fn read(path: &Path) -> Result<Self, ConfigError> {
		if !path.exists() {
			return Ok(Self::default());
		}
		let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		Self::parse(&content, path)
	}

	pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
		toml::from_str(content).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Builds the runtime configuration, reading the extra crontab file if
	/// one is named.
	pub fn resolve(self, path: &Path) -> Result<Config, ConfigError> {
		let options = ScheduleOptions {
			strict_hours: self.daemon.strict_hours,
		};

		let slaves = resolve_slaves(&self.slaves);
		tracing::info!("{} slaves configured", slaves.len());

		let mut schedules = parse_crontab(self.cron.iter().map(String::as_str), options, "config");
		if let Some(crontab) = &self.scheduler.crontab {
			let crontab_path = resolve_relative(path, crontab);
			let content =
				std::fs::read_to_string(&crontab_path).map_err(|source| ConfigError::Read {
					path: crontab_path.clone(),
					source,
				})?;
			let source = crontab_path.display().to_string();
			schedules.extend(parse_crontab(content.lines(), options, &source));
		}
		tracing::info!("{} crontab entries configured", schedules.len());

		Ok(Config {
			service: self.service,
			daemon: self.daemon,
			scheduler: self.scheduler,
			slaves,
			schedules,
		})
	}
}

pub fn resolve_slaves(entries: &BTreeMap<String, SlaveEntry>) -> Vec<SlaveConfig> {
	let mut slaves = Vec::new();
	for (name, entry) in entries {
		let file_name = match entry.file_name.as_deref().map(str::trim) {
			Some(f) if !f.is_empty() => f.to_string(),
			_ => {
				tracing::error!(slave = %name, "slave has no file_name, skipped");
				continue;
			}
		};
		slaves.push(SlaveConfig {
			name: name.clone(),
			file_name,
			arguments: entry.arguments.clone(),
			working_directory: entry.working_directory.clone(),
			timeout: Duration::from_secs(entry.timeout_secs),
			log_file: entry.log_file.as_deref().map(expand_tilde),
			flag_file: entry.flag_file.as_deref().map(expand_tilde),
			restart_delay: Duration::from_secs(entry.restart_delay_secs),
		});
	}
	slaves
}

/// Parses crontab lines, stripping `#` comments and blank lines. Lines that
/// fail to parse are logged with their line number and skipped.
pub fn parse_crontab<'a>(
	lines: impl IntoIterator<Item = &'a str>,
	options: ScheduleOptions,
	source: &str,
) -> Vec<CronSchedule> {
	let mut schedules = Vec::new();
	for (number, raw) in lines.into_iter().enumerate() {
		let line = match raw.find('#') {
			Some(pos) => &raw[..pos],
			None => raw,
		};
		let line = line.trim_matches(|c: char| c == ' ' || c == '\t');
		if line.is_empty() {
			continue;
		}
		match CronSchedule::parse_line_with(line, options) {
			Ok(schedule) => schedules.push(schedule),
			Err(e) => {
				tracing::error!("{} line #{} '{}' skipped: {}", source, number + 1, line, e);
			}
		}
	}
	schedules
}

fn resolve_relative(config_path: &Path, target: &str) -> PathBuf {
	let target = expand_tilde(target);
	if target.is_absolute() {
		return target;
	}
	match config_path.parent() {
		Some(dir) => dir.join(target),
		None => target,
	}
}
