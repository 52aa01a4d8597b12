use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Why a single process run did not complete normally.
#[derive(Debug, Error)]
pub enum RunError {
	#[error("failed to launch {name} '{file_name}': {source}")]
	Spawn {
		name: String,
		file_name: String,
		#[source]
		source: std::io::Error,
	},
	#[error("process {name} timed out after {timeout:?}")]
	TimedOut { name: String, timeout: Duration },
	#[error("process {name} stopped on request, flag file {} exists", .flag_file.display())]
	StopRequested { name: String, flag_file: PathBuf },
	#[error("process {name} killed")]
	Killed { name: String },
	#[error("failed to wait for process {name}: {source}")]
	Wait {
		name: String,
		#[source]
		source: std::io::Error,
	},
}

impl RunError {
	/// True for the timeout and flag-file cases.
	pub fn is_timeout(&self) -> bool {
		matches!(self, RunError::TimedOut { .. } | RunError::StopRequested { .. })
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SupervisorError {
	#[error("slave {0} already started")]
	AlreadyStarted(String),
}
