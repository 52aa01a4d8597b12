//! # vigil-core
//!
//! Crontab schedules and configuration records for the vigil daemon.
//!
//! ```rust
//! use vigil_core::cron::CronSchedule;
//!
//! let schedule: CronSchedule = "*/15 9-17 * * mon-fri /usr/bin/report --short".parse().unwrap();
//! assert!(!schedule.is_daily());
//! assert_eq!(schedule.command().unwrap().command, "/usr/bin/report");
//! ```

pub mod config;
pub mod cron;
pub mod error;
pub mod paths;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, CronError};
pub use types::{ServiceSettings, SlaveConfig, StartMode};
