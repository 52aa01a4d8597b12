//! # vigil-supervisor
//!
//! Process execution for the vigil daemon: one-shot runs with timeouts and
//! full process-tree cleanup, slave supervision loops, and the cron scheduler.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use vigil_core::SlaveConfig;
//! use vigil_supervisor::{ProcessRunner, SlaveSupervisor};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let code = ProcessRunner::new("hello", "/bin/echo")
//!     .arguments("'hello world'")
//!     .timeout(Duration::from_secs(10))
//!     .run()
//!     .await
//!     .unwrap();
//! assert_eq!(code, 0);
//!
//! let mut web = SlaveSupervisor::new(SlaveConfig::new("web", "/usr/bin/python3"));
//! web.start().unwrap();
//! web.stop().await;
//! # }
//! ```

pub mod env;
pub mod error;
pub mod output;
pub mod runner;
pub mod scheduler;
pub mod supervisor;
pub mod tree;

pub use error::{RunError, SupervisorError};
pub use runner::{ProcessRunner, RunState};
pub use scheduler::Scheduler;
pub use supervisor::SlaveSupervisor;
pub use tree::{ProcessTable, SystemProcessTable};
