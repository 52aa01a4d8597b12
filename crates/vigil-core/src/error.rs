use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CronError {
	#[error("format error: {0}")]
	Format(String),
	#[error("not supported: {0}")]
	Unsupported(String),
}

impl CronError {
	pub fn is_format(&self) -> bool {
		matches!(self, CronError::Format(_))
	}
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read {}: {source}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to parse {}: {source}", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
}

pub type CronResult<T> = Result<T, CronError>;
