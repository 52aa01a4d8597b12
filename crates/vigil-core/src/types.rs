use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Identity of the daemon as seen by the host's service manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
	#[serde(default = "default_service_name")]
	pub name: String,
	#[serde(default = "default_service_title")]
	pub title: String,
	#[serde(default = "default_service_description")]
	pub description: String,
	#[serde(default)]
	pub start_mode: StartMode,
}

impl Default for ServiceSettings {
	fn default() -> Self {
		Self {
			name: default_service_name(),
			title: default_service_title(),
			description: default_service_description(),
			start_mode: StartMode::default(),
		}
	}
}

fn default_service_name() -> String {
	"vigil".to_string()
}
fn default_service_title() -> String {
	"Vigil".to_string()
}
fn default_service_description() -> String {
	"Process supervisor and cron daemon".to_string()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
	#[default]
	Automatic,
	Manual,
	Disabled,
}

/// A long-running child process kept alive by its supervisor.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SlaveConfig {
	pub name: String,
	pub file_name: String,
	pub arguments: String,
	pub working_directory: Option<String>,
	/// Zero disables the timeout.
	pub timeout: Duration,
	/// Extra file the process writes its log to, tailed while it runs.
	pub log_file: Option<PathBuf>,
	/// The run is aborted as soon as this file exists.
	pub flag_file: Option<PathBuf>,
	pub restart_delay: Duration,
}

impl SlaveConfig {
	pub fn new(name: impl Into<String>, file_name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			file_name: file_name.into(),
			arguments: String::new(),
			working_directory: None,
			timeout: Duration::ZERO,
			log_file: None,
			flag_file: None,
			restart_delay: Duration::from_secs(DEFAULT_RESTART_DELAY_SECS),
		}
	}
}

pub const DEFAULT_RESTART_DELAY_SECS: u64 = 5;
