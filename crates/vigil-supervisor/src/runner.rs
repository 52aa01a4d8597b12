//! One-shot process execution.
//!
//! A [`ProcessRunner`] launches a single program without a shell, forwards
//! its output to the log and waits for it to exit, time out, or be stopped.
//! Whatever the outcome, the process and every descendant are killed before
//! [`ProcessRunner::run`] returns.

use std::future::pending;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

use vigil_core::SlaveConfig;

use crate::env::{expand_vars, split_args};
use crate::error::RunError;
use crate::output::{pipe_lines, Stream};
use crate::tree::{self, ProcessTable, SystemProcessTable};

const FLAG_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle of a run, observed through [`ProcessRunner::subscribe`].
/// `Terminated` is always the last state, sent exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
	Idle,
	Launching,
	Running { pid: u32 },
	Completed { exit_code: i32 },
	TimedOut,
	Killed,
	Terminated,
}

impl RunState {
	pub fn is_running(&self) -> bool {
		matches!(self, RunState::Running { .. })
	}

	pub fn is_finished(&self) -> bool {
		matches!(
			self,
			RunState::Completed { .. } | RunState::TimedOut | RunState::Killed | RunState::Terminated
		)
	}
}

pub struct ProcessRunner {
	name: String,
	file_name: String,
	arguments: String,
	working_directory: Option<String>,
	timeout: Option<Duration>,
	flag_file: Option<PathBuf>,
	cancel: Option<watch::Receiver<bool>>,
	table: Arc<dyn ProcessTable>,
	state: watch::Sender<RunState>,
}

enum Outcome {
	Exited(std::io::Result<std::process::ExitStatus>),
	TimedOut(Duration),
	StopRequested(PathBuf),
	Cancelled,
}

impl ProcessRunner {
	pub fn new(name: impl Into<String>, file_name: impl Into<String>) -> Self {
		let (state, _) = watch::channel(RunState::Idle);
		Self {
			name: name.into(),
			file_name: file_name.into(),
			arguments: String::new(),
			working_directory: None,
			timeout: None,
			flag_file: None,
			cancel: None,
			table: Arc::new(SystemProcessTable),
			state,
		}
	}

	pub fn from_slave(config: &SlaveConfig) -> Self {
		let mut runner = Self::new(config.name.clone(), config.file_name.clone())
			.arguments(config.arguments.clone())
			.timeout(config.timeout);
		runner.working_directory = config.working_directory.clone();
		runner.flag_file = config.flag_file.clone();
		runner
	}

	pub fn arguments(mut self, arguments: impl Into<String>) -> Self {
		self.arguments = arguments.into();
		self
	}

	pub fn working_directory(mut self, dir: impl Into<String>) -> Self {
		self.working_directory = Some(dir.into());
		self
	}

	/// A zero duration disables the timeout.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = (!timeout.is_zero()).then_some(timeout);
		self
	}

	/// The run is stopped once `path` exists.
	pub fn flag_file(mut self, path: impl Into<PathBuf>) -> Self {
		self.flag_file = Some(path.into());
		self
	}

	/// The run is killed once `cancel` reads `true`.
	pub fn cancel_on(mut self, cancel: watch::Receiver<bool>) -> Self {
		self.cancel = Some(cancel);
		self
	}

	pub fn process_table(mut self, table: Arc<dyn ProcessTable>) -> Self {
		self.table = table;
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn subscribe(&self) -> watch::Receiver<RunState> {
		self.state.subscribe()
	}

	/// Runs the process to completion and returns its exit code. A process
	/// killed by a signal reports `-1`.
	pub async fn run(mut self) -> Result<i32, RunError> {
		let mut guard = RunGuard {
			state: &self.state,
			table: &*self.table,
			pid: None,
			reaped: false,
		};
		self.state.send_replace(RunState::Launching);

		if cancelled_now(&self.cancel) {
			self.state.send_replace(RunState::Killed);
			return Err(RunError::Killed { name: self.name.clone() });
		}
		let flag_file = self
			.flag_file
			.as_ref()
			.map(|f| PathBuf::from(expand_vars(&f.to_string_lossy())));
		if let Some(flag) = flag_file.as_ref().filter(|f| f.exists()) {
			self.state.send_replace(RunState::Killed);
			return Err(RunError::StopRequested {
				name: self.name.clone(),
				flag_file: flag.clone(),
			});
		}

		let file_name = expand_vars(&self.file_name);
		let arguments = split_args(&expand_vars(&self.arguments));
		tracing::debug!("start process {} '{}' {:?}", self.name, file_name, arguments);

		let mut cmd = Command::new(&file_name);
		cmd.args(&arguments)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.process_group(0)
			.kill_on_drop(true);
		if let Some(dir) = &self.working_directory {
			let dir = expand_vars(dir);
			if !dir.is_empty() {
				cmd.current_dir(dir);
			}
		}

		let mut child = cmd.spawn().map_err(|source| RunError::Spawn {
			name: self.name.clone(),
			file_name: file_name.clone(),
			source,
		})?;
		let pid = child.id().unwrap_or(0);
		guard.pid = Some(pid);
		self.state.send_replace(RunState::Running { pid });
		tracing::trace!("wait for exit [{}] {}", pid, self.name);

		let stdout = child
			.stdout
			.take()
			.map(|s| tokio::spawn(pipe_lines(s, Stream::Stdout).in_current_span()));
		let stderr = child
			.stderr
			.take()
			.map(|s| tokio::spawn(pipe_lines(s, Stream::Stderr).in_current_span()));

		let outcome = {
			let completion = async {
				let status = child.wait().await;
				drained(stdout).await;
				drained(stderr).await;
				status
			};
			tokio::pin!(completion);

			let deadline = self.timeout.map(|t| (Instant::now() + t, t));
			let mut flag_poll = tokio::time::interval(FLAG_POLL_INTERVAL);
			loop {
				tokio::select! {
					status = &mut completion => break Outcome::Exited(status),
					timeout = elapsed(deadline) => break Outcome::TimedOut(timeout),
					_ = flag_poll.tick() => {
						if let Some(flag) = flag_file.as_ref().filter(|f| f.exists()) {
							break Outcome::StopRequested(flag.clone());
						}
					}
					_ = cancelled(&mut self.cancel) => break Outcome::Cancelled,
				}
			}
		};

		let result = match outcome {
			Outcome::Exited(Ok(status)) => {
				guard.reaped = true;
				let exit_code = status.code().unwrap_or(-1);
				tracing::trace!("process {} exited with code {}", self.name, exit_code);
				self.state.send_replace(RunState::Completed { exit_code });
				return Ok(exit_code);
			}
			Outcome::Exited(Err(source)) => RunError::Wait {
				name: self.name.clone(),
				source,
			},
			Outcome::TimedOut(timeout) => {
				self.state.send_replace(RunState::TimedOut);
				RunError::TimedOut {
					name: self.name.clone(),
					timeout,
				}
			}
			Outcome::StopRequested(flag_file) => {
				self.state.send_replace(RunState::Killed);
				RunError::StopRequested {
					name: self.name.clone(),
					flag_file,
				}
			}
			Outcome::Cancelled => {
				self.state.send_replace(RunState::Killed);
				RunError::Killed { name: self.name.clone() }
			}
		};

		guard.kill();
		if let Err(e) = child.wait().await {
			tracing::debug!("failed to reap {} [{}]: {}", self.name, pid, e);
		}
		Err(result)
	}
}

/// Kills whatever is left of the run and publishes `Terminated` on every
/// exit path, including a dropped future.
struct RunGuard<'a> {
	state: &'a watch::Sender<RunState>,
	table: &'a dyn ProcessTable,
	pid: Option<u32>,
	reaped: bool,
}

impl RunGuard<'_> {
	fn kill(&mut self) {
		let Some(pid) = self.pid.take() else {
			return;
		};
		if self.reaped {
			tree::kill_group(self.table, pid);
		} else {
			tree::kill_tree(self.table, pid);
		}
	}
}

impl Drop for RunGuard<'_> {
	fn drop(&mut self) {
		self.kill();
		self.state.send_replace(RunState::Terminated);
	}
}

async fn drained(task: Option<JoinHandle<()>>) {
	if let Some(task) = task {
		let _ = task.await;
	}
}

async fn elapsed(deadline: Option<(Instant, Duration)>) -> Duration {
	match deadline {
		Some((at, timeout)) => {
			tokio::time::sleep_until(at).await;
			timeout
		}
		None => pending().await,
	}
}

async fn cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
	match cancel {
		Some(rx) => {
			if rx.wait_for(|stop| *stop).await.is_err() {
				pending::<()>().await;
			}
		}
		None => pending().await,
	}
}

fn cancelled_now(cancel: &Option<watch::Receiver<bool>>) -> bool {
	cancel.as_ref().is_some_and(|rx| *rx.borrow())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn zero_timeout_disables_it() {
		let runner = ProcessRunner::new("t", "/bin/true").timeout(Duration::ZERO);
		assert_eq!(runner.timeout, None);
		let runner = runner.timeout(Duration::from_secs(3));
		assert_eq!(runner.timeout, Some(Duration::from_secs(3)));
	}

	#[test]
	fn built_from_slave_config() {
		let mut slave = SlaveConfig::new("web", "/usr/bin/python3");
		slave.arguments = "-m http.server".to_string();
		slave.working_directory = Some("/srv".to_string());
		slave.flag_file = Some(PathBuf::from("/run/web.stop"));
		let runner = ProcessRunner::from_slave(&slave);
		assert_eq!(runner.name(), "web");
		assert_eq!(runner.arguments, "-m http.server");
		assert_eq!(runner.working_directory.as_deref(), Some("/srv"));
		assert_eq!(runner.timeout, None);
		assert_eq!(runner.flag_file, Some(PathBuf::from("/run/web.stop")));
	}

	#[test]
	fn finished_states() {
		assert!(RunState::Running { pid: 3 }.is_running());
		assert!(!RunState::Launching.is_finished());
		assert!(RunState::TimedOut.is_finished());
		assert!(RunState::Completed { exit_code: 1 }.is_finished());
	}

	#[tokio::test]
	async fn cancelled_before_launch_never_spawns() {
		let (tx, rx) = watch::channel(true);
		let runner = ProcessRunner::new("never", "/nonexistent/program").cancel_on(rx);
		let state = runner.subscribe();
		let err = runner.run().await.unwrap_err();
		assert!(matches!(err, RunError::Killed { .. }));
		assert_eq!(*state.borrow(), RunState::Terminated);
		drop(tx);
	}

	#[tokio::test]
	async fn flag_file_path_expands_environment() {
		let dir = std::env::temp_dir().join(format!("vigil-runner-flag-{}", std::process::id()));
		std::fs::create_dir_all(&dir).unwrap();
		std::fs::write(dir.join("stop.flag"), "").unwrap();
		std::env::set_var("VIGIL_RUNNER_FLAG_DIR", &dir);

		let err = ProcessRunner::new("flagged", "/nonexistent/program")
			.flag_file("${VIGIL_RUNNER_FLAG_DIR}/stop.flag")
			.run()
			.await
			.unwrap_err();
		match err {
			RunError::StopRequested { flag_file, .. } => assert_eq!(flag_file, dir.join("stop.flag")),
			other => panic!("unexpected {}", other),
		}
	}
}
