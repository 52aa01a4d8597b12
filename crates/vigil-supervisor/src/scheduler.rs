//! Minute-resolution cron scheduler.
//!
//! Every tick compares the current local minute with the last evaluated one
//! and evaluates each minute in between, so a delayed tick never skips a
//! matching minute and no minute fires twice.

use chrono::{DateTime, Local, NaiveDateTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use vigil_core::cron::CronSchedule;

use crate::runner::ProcessRunner;
use crate::tree::{ProcessTable, SystemProcessTable};

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// A schedule due at a given minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Firing {
	pub index: usize,
	pub minute: i64,
}

pub struct Scheduler {
	schedules: Vec<CronSchedule>,
	timeout: Duration,
	table: Arc<dyn ProcessTable>,
}

impl Scheduler {
	pub fn new(schedules: Vec<CronSchedule>) -> Self {
		Self {
			schedules,
			timeout: Duration::ZERO,
			table: Arc::new(SystemProcessTable),
		}
	}

	/// Timeout applied to every fired command; zero means none.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn with_process_table(mut self, table: Arc<dyn ProcessTable>) -> Self {
		self.table = table;
		self
	}

	pub fn schedules(&self) -> &[CronSchedule] {
		&self.schedules
	}

	/// Schedules matching each minute in `(last, current]`, in minute order.
	pub fn due(&self, last: i64, current: i64) -> Vec<Firing> {
		let mut firings = Vec::new();
		for minute in last.saturating_add(1)..=current {
			let Some(time) = minute_time(minute) else {
				continue;
			};
			for (index, schedule) in self.schedules.iter().enumerate() {
				if schedule.matches(&time) {
					firings.push(Firing { index, minute });
				}
			}
		}
		firings
	}

	/// Evaluates the minutes elapsed since `last` and fires what is due.
	/// `last` becomes `current`.
	pub fn tick(&self, last: &mut i64, current: i64) -> Vec<JoinHandle<()>> {
		if current == *last {
			return Vec::new();
		}
		if current < *last {
			tracing::warn!("clock went back {} minutes", *last - current);
		}
		let handles = self
			.due(*last, current)
			.into_iter()
			.filter_map(|firing| self.fire(firing))
			.collect();
		*last = current;
		handles
	}

	/// Launches the command of a due schedule on its own task.
	pub fn fire(&self, firing: Firing) -> Option<JoinHandle<()>> {
		let schedule = self.schedules.get(firing.index)?;
		let Some(command) = schedule.command() else {
			tracing::error!("crontab entry #{} '{}' has no command", firing.index, schedule);
			return None;
		};

		let runner = ProcessRunner::new(format!("cron#{}", firing.index), command.command.clone())
			.arguments(command.arguments.clone())
			.timeout(self.timeout)
			.process_table(Arc::clone(&self.table));
		let span = tracing::info_span!("cron", cron = %format!("#{}", firing.index));
		if let Some(time) = minute_time(firing.minute) {
			tracing::debug!(parent: &span, "due at {}", time.format("%Y-%m-%d %H:%M"));
		}

		Some(tokio::spawn(
			async move {
				match runner.run().await {
					Ok(code) => tracing::info!("exited with code {}", code),
					Err(e) => tracing::error!("{}", e),
				}
			}
			.instrument(span),
		))
	}

	/// Ticks about once a second until `shutdown` reads `true`. The first
	/// tick evaluates only the current minute.
	pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
		let mut last = current_minute() - 1;
		let mut interval = tokio::time::interval(TICK_INTERVAL);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		tracing::info!("scheduler running {} crontab entries", self.schedules.len());

		loop {
			tokio::select! {
				_ = interval.tick() => {
					self.tick(&mut last, current_minute());
				}
				_ = shutdown.wait_for(|stop| *stop) => break,
			}
		}
		tracing::info!("scheduler stopped");
	}
}

/// Local wall-clock minutes since the epoch.
pub fn current_minute() -> i64 {
	minute_index(&Local::now().naive_local())
}

pub fn minute_index(time: &NaiveDateTime) -> i64 {
	time.and_utc().timestamp().div_euclid(60)
}

pub fn minute_time(index: i64) -> Option<NaiveDateTime> {
	DateTime::from_timestamp(index.checked_mul(60)?, 0).map(|t| t.naive_utc())
}
