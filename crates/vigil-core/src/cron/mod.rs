//! Crontab parsing: time fields, commands and whole schedule lines.

mod command;
mod field;
mod schedule;

pub use command::CronCommand;
pub use field::TimeField;
pub use schedule::{CronSchedule, ScheduleOptions, TimeKind};
