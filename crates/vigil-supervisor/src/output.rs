use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio::sync::watch;

use crate::runner::RunState;

const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
	Stdout,
	Stderr,
}

/// Forwards every non-blank line of `reader` to the log until end of stream.
/// Stdout lines are logged at info, stderr lines at warn.
pub async fn pipe_lines<R: AsyncRead + Unpin>(reader: R, stream: Stream) {
	let mut reader = BufReader::new(reader);
	let mut buf = Vec::new();
	loop {
		buf.clear();
		match reader.read_until(b'\n', &mut buf).await {
			Ok(0) => break,
			Ok(_) => emit(stream, &String::from_utf8_lossy(&buf)),
			Err(e) => {
				tracing::debug!("{:?} closed: {}", stream, e);
				break;
			}
		}
	}
}

fn emit(stream: Stream, line: &str) {
	let line = line.trim_end_matches(['\r', '\n']);
	if line.trim().is_empty() {
		return;
	}
	match stream {
		Stream::Stdout => tracing::info!("{}", line),
		Stream::Stderr => tracing::warn!("{}", line),
	}
}

/// Follows a log file written by the process while its run is `Running`.
/// Starts at the end of the file, rewinds when the file shrinks, and does a
/// final read once the run has left `Running`.
pub async fn tail_log_file(path: PathBuf, mut state: watch::Receiver<RunState>) {
	let started = match state.wait_for(|s| s.is_running() || s.is_finished()).await {
		Ok(s) => s.is_running(),
		Err(_) => false,
	};
	if !started {
		return;
	}
	let mut tail = LogTail::new(path);
	tail.seek_to_end().await;

	let mut interval = tokio::time::interval(TAIL_POLL_INTERVAL);
	while state.borrow_and_update().is_running() {
		tokio::select! {
			_ = interval.tick() => tail.poll().await,
			changed = state.changed() => {
				if changed.is_err() {
					break;
				}
			}
		}
	}
	tail.poll().await;
	tail.flush_partial();
}

struct LogTail {
	path: PathBuf,
	offset: u64,
	partial: Vec<u8>,
}

impl LogTail {
	fn new(path: PathBuf) -> Self {
		Self {
			path,
			offset: 0,
			partial: Vec::new(),
		}
	}

	async fn seek_to_end(&mut self) {
		self.offset = tokio::fs::metadata(&self.path)
			.await
			.map(|m| m.len())
			.unwrap_or(0);
	}

	async fn poll(&mut self) {
		let len = match tokio::fs::metadata(&self.path).await {
			Ok(m) => m.len(),
			Err(_) => return,
		};
		if len < self.offset {
			tracing::debug!("{} truncated, rewinding", self.path.display());
			self.offset = 0;
			self.partial.clear();
		}
		if len == self.offset {
			return;
		}
		if let Err(e) = self.read_from_offset().await {
			tracing::debug!("failed to read {}: {}", self.path.display(), e);
		}
	}

	async fn read_from_offset(&mut self) -> std::io::Result<()> {
		let mut file = File::open(&self.path).await?;
		file.seek(SeekFrom::Start(self.offset)).await?;
		let mut chunk = Vec::new();
		let read = file.read_to_end(&mut chunk).await?;
		self.offset += read as u64;
		self.partial.extend_from_slice(&chunk);

		while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
			let line: Vec<u8> = self.partial.drain(..=pos).collect();
			emit(Stream::Stdout, &String::from_utf8_lossy(&line));
		}
		Ok(())
	}

	fn flush_partial(&mut self) {
		if !self.partial.is_empty() {
			let line = std::mem::take(&mut self.partial);
			emit(Stream::Stdout, &String::from_utf8_lossy(&line));
		}
	}
}
