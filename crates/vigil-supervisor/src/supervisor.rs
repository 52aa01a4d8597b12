use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use vigil_core::SlaveConfig;

use crate::error::{RunError, SupervisorError};
use crate::output::tail_log_file;
use crate::runner::ProcessRunner;
use crate::tree::{ProcessTable, SystemProcessTable};

/// Keeps one slave process alive: wait, launch, run to completion, repeat,
/// until [`SlaveSupervisor::stop`] is called.
pub struct SlaveSupervisor {
	config: Arc<SlaveConfig>,
	table: Arc<dyn ProcessTable>,
	launches: Arc<AtomicU32>,
	cancel: Option<watch::Sender<bool>>,
	handle: Option<JoinHandle<()>>,
	started: bool,
}

impl SlaveSupervisor {
	pub fn new(config: SlaveConfig) -> Self {
		Self {
			config: Arc::new(config),
			table: Arc::new(SystemProcessTable),
			launches: Arc::new(AtomicU32::new(0)),
			cancel: None,
			handle: None,
			started: false,
		}
	}

	pub fn with_process_table(mut self, table: Arc<dyn ProcessTable>) -> Self {
		self.table = table;
		self
	}

	pub fn name(&self) -> &str {
		&self.config.name
	}

	pub fn config(&self) -> &SlaveConfig {
		&self.config
	}

	/// Number of processes launched so far.
	pub fn launches(&self) -> u32 {
		self.launches.load(Ordering::SeqCst)
	}

	/// True while the supervision loop is active.
	pub fn is_started(&self) -> bool {
		self.handle.is_some()
	}

	/// Spawns the supervision loop. A supervisor starts at most once.
	pub fn start(&mut self) -> Result<(), SupervisorError> {
		if self.started {
			return Err(SupervisorError::AlreadyStarted(self.config.name.clone()));
		}
		self.started = true;

		let (cancel_tx, cancel_rx) = watch::channel(false);
		let span = tracing::info_span!("slave", slave = %self.config.name);
		let handle = tokio::spawn(
			supervise(
				Arc::clone(&self.config),
				Arc::clone(&self.table),
				Arc::clone(&self.launches),
				cancel_rx,
			)
			.instrument(span),
		);
		self.cancel = Some(cancel_tx);
		self.handle = Some(handle);
		tracing::info!(slave = %self.config.name, "slave started");
		Ok(())
	}

	/// Kills the running process, if any, and waits for the loop to exit.
	pub async fn stop(&mut self) {
		if let Some(cancel) = self.cancel.take() {
			cancel.send_replace(true);
		}
		if let Some(handle) = self.handle.take() {
			if let Err(e) = handle.await {
				tracing::error!(slave = %self.config.name, "supervision loop failed: {}", e);
			}
			tracing::info!(slave = %self.config.name, "slave stopped");
		}
	}
}

impl Drop for SlaveSupervisor {
	fn drop(&mut self) {
		if let Some(cancel) = self.cancel.take() {
			cancel.send_replace(true);
		}
	}
}

async fn supervise(
	config: Arc<SlaveConfig>,
	table: Arc<dyn ProcessTable>,
	launches: Arc<AtomicU32>,
	mut cancel: watch::Receiver<bool>,
) {
	loop {
		tokio::select! {
			_ = tokio::time::sleep(config.restart_delay) => {}
			_ = cancel.wait_for(|stop| *stop) => break,
		}
		if *cancel.borrow() {
			break;
		}

		let runner = ProcessRunner::from_slave(&config)
			.cancel_on(cancel.clone())
			.process_table(Arc::clone(&table));
		if let Some(log_file) = &config.log_file {
			tokio::spawn(tail_log_file(log_file.clone(), runner.subscribe()).in_current_span());
		}

		let launch = launches.fetch_add(1, Ordering::SeqCst) + 1;
		tracing::debug!("launch #{}", launch);

		// A panicking run must not end the loop.
		match tokio::spawn(runner.run().in_current_span()).await {
			Ok(Ok(code)) => tracing::info!("exited with code {}", code),
			Ok(Err(RunError::Killed { .. })) => tracing::debug!("killed on stop"),
			Ok(Err(e)) => tracing::error!("{}", e),
			Err(e) => tracing::error!("run aborted: {}", e),
		}
	}
	tracing::debug!("supervision loop exited");
}
