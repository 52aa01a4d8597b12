use nix::errno::Errno;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinSet;

use vigil_core::{paths, Config};
use vigil_supervisor::{Scheduler, SlaveSupervisor, SupervisorError};

#[derive(Debug, Error)]
pub enum DaemonError {
	#[error("daemon already running (pid {0})")]
	AlreadyRunning(i32),
	#[error("failed to write pid file {}: {source}", .path.display())]
	PidFile {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to install signal handler: {0}")]
	Signal(#[source] std::io::Error),
	#[error(transparent)]
	Supervisor(#[from] SupervisorError),
}

/// Removes the pid file when dropped.
pub struct PidFile {
	path: PathBuf,
}

impl PidFile {
	/// Writes the current pid to `path` unless a live process already owns it.
	pub fn acquire(path: &Path) -> Result<Self, DaemonError> {
		if let Some(pid) = read_pid(path) {
			if pid != std::process::id() as i32 && is_alive(pid) {
				return Err(DaemonError::AlreadyRunning(pid));
			}
			tracing::debug!("removing stale pid file for {}", pid);
		}
		if let Some(dir) = path.parent() {
			std::fs::create_dir_all(dir).map_err(|source| DaemonError::PidFile {
				path: path.to_path_buf(),
				source,
			})?;
		}
		std::fs::write(path, std::process::id().to_string()).map_err(|source| DaemonError::PidFile {
			path: path.to_path_buf(),
			source,
		})?;
		Ok(Self {
			path: path.to_path_buf(),
		})
	}
}

impl Drop for PidFile {
	fn drop(&mut self) {
		let _ = std::fs::remove_file(&self.path);
	}
}

fn read_pid(path: &Path) -> Option<i32> {
	std::fs::read_to_string(path)
		.ok()
		.and_then(|s| s.trim().parse().ok())
		.filter(|pid| *pid > 1)
}

/// A process we may not signal still exists.
fn is_alive(pid: i32) -> bool {
	signal_means_alive(nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None))
}

fn signal_means_alive(result: nix::Result<()>) -> bool {
	matches!(result, Ok(()) | Err(Errno::EPERM))
}

/// Runs every slave and the scheduler until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<(), DaemonError> {
	let _pid_file = if config.daemon.pid_file {
		Some(PidFile::acquire(&paths::pid_path())?)
	} else {
		None
	};
	let mut terminate = signal(SignalKind::terminate()).map_err(DaemonError::Signal)?;

	tracing::info!("{} started (pid {})", config.service.name, std::process::id());

	let mut supervisors: Vec<SlaveSupervisor> =
		config.slaves.iter().cloned().map(SlaveSupervisor::new).collect();
	for supervisor in &mut supervisors {
		supervisor.start()?;
	}

	let cron_timeout = config.cron_timeout().unwrap_or_default();
	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let scheduler = Scheduler::new(config.schedules).with_timeout(cron_timeout);
	let scheduler_task = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

	tokio::select! {
		_ = tokio::signal::ctrl_c() => tracing::info!("interrupted, shutting down"),
		_ = terminate.recv() => tracing::info!("terminated, shutting down"),
	}

	shutdown_tx.send_replace(true);
	if let Err(e) = scheduler_task.await {
		tracing::error!("scheduler failed: {}", e);
	}
	stop_all(supervisors).await;

	tracing::info!("{} stopped", config.service.name);
	Ok(())
}

/// Stops every supervisor concurrently and waits for all of them.
pub async fn stop_all(supervisors: Vec<SlaveSupervisor>) {
	let mut set = JoinSet::new();
	for mut supervisor in supervisors {
		set.spawn(async move {
			supervisor.stop().await;
		});
	}
	while let Some(result) = set.join_next().await {
		if let Err(e) = result {
			tracing::error!("failed to stop slave: {}", e);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::{Duration, Instant};
	use vigil_core::SlaveConfig;

	fn temp_path(name: &str) -> PathBuf {
		let dir = std::env::temp_dir().join(format!("vigil-daemon-{}", std::process::id()));
		std::fs::create_dir_all(&dir).unwrap();
		dir.join(name)
	}

	#[test]
	fn pid_file_is_written_and_removed() {
		let path = temp_path("own.pid");
		{
			let _pid = PidFile::acquire(&path).unwrap();
			let written = std::fs::read_to_string(&path).unwrap();
			assert_eq!(written, std::process::id().to_string());
		}
		assert!(!path.exists());
	}

	#[test]
	fn stale_pid_file_is_replaced() {
		let path = temp_path("stale.pid");
		std::fs::write(&path, "not a pid").unwrap();
		let _pid = PidFile::acquire(&path).unwrap();
		assert_eq!(read_pid(&path), Some(std::process::id() as i32));
	}

	#[test]
	fn live_pid_file_is_refused() {
		let path = temp_path("live.pid");
		let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
		std::fs::write(&path, child.id().to_string()).unwrap();

		let err = PidFile::acquire(&path).err().unwrap();
		assert!(matches!(err, DaemonError::AlreadyRunning(pid) if pid == child.id() as i32));

		child.kill().unwrap();
		child.wait().unwrap();
		let _ = std::fs::remove_file(&path);
	}

	#[test]
	fn process_owned_by_another_user_is_alive() {
		assert!(signal_means_alive(Ok(())));
		assert!(signal_means_alive(Err(Errno::EPERM)));
		assert!(!signal_means_alive(Err(Errno::ESRCH)));
		// init exists whether or not we may signal it
		assert!(is_alive(1));
	}

	#[tokio::test]
	async fn stop_all_stops_in_parallel() {
		let mut supervisors = Vec::new();
		for name in ["a", "b", "c"] {
			let mut config = SlaveConfig::new(name, "/bin/sleep");
			config.arguments = "30".to_string();
			config.restart_delay = Duration::from_millis(10);
			let mut supervisor = SlaveSupervisor::new(config);
			supervisor.start().unwrap();
			supervisors.push(supervisor);
		}
		tokio::time::sleep(Duration::from_millis(300)).await;
		assert!(supervisors.iter().all(|s| s.launches() == 1));

		let started = Instant::now();
		stop_all(supervisors).await;
		assert!(started.elapsed() < Duration::from_secs(5));
	}
}
