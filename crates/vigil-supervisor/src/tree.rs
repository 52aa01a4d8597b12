//! Process tree termination.
//!
//! The walk is platform independent: children are discovered through a
//! [`ProcessTable`] and killed depth-first, children before their parent.
//! A process that is already gone (`ESRCH`) is not an error.

use std::collections::HashSet;

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

/// Operating system view needed to terminate a process tree.
pub trait ProcessTable: Send + Sync {
	/// Direct children of `pid`. A vanished `pid` has no children.
	fn children(&self, pid: u32) -> Vec<u32>;

	fn kill(&self, pid: u32) -> Result<(), Errno>;

	/// Signals every member of process group `pgid`.
	fn kill_group(&self, _pgid: u32) -> Result<(), Errno> {
		Ok(())
	}
}

/// The host's process table, signalled with `SIGKILL`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
	fn children(&self, pid: u32) -> Vec<u32> {
		platform::children(pid)
	}

	fn kill(&self, pid: u32) -> Result<(), Errno> {
		kill(to_pid(pid)?, Signal::SIGKILL)
	}

	fn kill_group(&self, pgid: u32) -> Result<(), Errno> {
		killpg(to_pid(pgid)?, Signal::SIGKILL)
	}
}

fn to_pid(pid: u32) -> Result<Pid, Errno> {
	match i32::try_from(pid) {
		Ok(raw) if raw > 1 => Ok(Pid::from_raw(raw)),
		_ => Err(Errno::EINVAL),
	}
}

/// Kills `pid` and all of its descendants, children first, then signals the
/// process group led by `pid` to catch descendants re-parented away from it.
/// Returns the pids that were signalled successfully, in order.
pub fn kill_tree(table: &dyn ProcessTable, pid: u32) -> Vec<u32> {
	let mut killed = Vec::new();
	if pid <= 1 {
		return killed;
	}
	let mut visited = HashSet::new();
	kill_depth_first(table, pid, &mut visited, &mut killed);
	kill_group(table, pid);
	killed
}

/// Signals the process group led by an already reaped `pid`.
pub fn kill_group(table: &dyn ProcessTable, pgid: u32) {
	if pgid <= 1 {
		return;
	}
	match table.kill_group(pgid) {
		Ok(()) | Err(Errno::ESRCH) => {}
		Err(e) => tracing::warn!("failed to kill process group {}: {}", pgid, e),
	}
}

fn kill_depth_first(table: &dyn ProcessTable, pid: u32, visited: &mut HashSet<u32>, killed: &mut Vec<u32>) {
	if pid <= 1 || !visited.insert(pid) {
		return;
	}
	for child in table.children(pid) {
		kill_depth_first(table, child, visited, killed);
	}
	match table.kill(pid) {
		Ok(()) => {
			tracing::trace!("killed process {}", pid);
			killed.push(pid);
		}
		Err(Errno::ESRCH) => {}
		Err(e) => tracing::warn!("failed to kill process {}: {}", pid, e),
	}
}

#[cfg(target_os = "linux")]
mod platform {
	use std::fs;

	pub fn children(pid: u32) -> Vec<u32> {
		let entries = match fs::read_dir("/proc") {
			Ok(e) => e,
			Err(_) => return Vec::new(),
		};
		entries
			.flatten()
			.filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
			.filter(|candidate| parent_of(*candidate) == Some(pid))
			.collect()
	}

	fn parent_of(pid: u32) -> Option<u32> {
		let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
		parse_parent(&stat)
	}

	/// `pid (comm) state ppid ...`; comm may itself contain spaces and parentheses.
	pub(super) fn parse_parent(stat: &str) -> Option<u32> {
		let after_comm = &stat[stat.rfind(')')? + 1..];
		after_comm.split_whitespace().nth(1)?.parse().ok()
	}
}

#[cfg(target_os = "macos")]
mod platform {
	use libproc::processes::{pids_by_type, ProcFilter};

	pub fn children(pid: u32) -> Vec<u32> {
		pids_by_type(ProcFilter::ByParentProcess { ppid: pid })
			.unwrap_or_default()
			.into_iter()
			.filter(|child| *child != 0)
			.collect()
	}
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod platform {
	// Only the process group sweep applies here.
	pub fn children(_pid: u32) -> Vec<u32> {
		Vec::new()
	}
}
