use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};

use super::command::CronCommand;
use super::field::TimeField;
use crate::error::{CronError, CronResult};

const MONTH_NAMES: [&str; 12] = [
	"jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];
const SUNDAY_FIRST: [Weekday; 7] = [
	Weekday::Sun,
	Weekday::Mon,
	Weekday::Tue,
	Weekday::Wed,
	Weekday::Thu,
	Weekday::Fri,
	Weekday::Sat,
];

/// Position of a time field in a crontab line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeKind {
	Minute = 0,
	Hour = 1,
	Day = 2,
	Month = 3,
	Weekday = 4,
}

impl TimeKind {
	pub const ALL: [TimeKind; 5] = [
		TimeKind::Minute,
		TimeKind::Hour,
		TimeKind::Day,
		TimeKind::Month,
		TimeKind::Weekday,
	];

	pub fn name(self) -> &'static str {
		match self {
			TimeKind::Minute => "minute",
			TimeKind::Hour => "hour",
			TimeKind::Day => "day",
			TimeKind::Month => "month",
			TimeKind::Weekday => "weekday",
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleOptions {
	/// Bound the hour field to `[0, 23]`. Off by default, which accepts
	/// `[0, 59]` as existing crontabs for this daemon were written against.
	pub strict_hours: bool,
}

impl ScheduleOptions {
	fn hour_max(&self) -> u8 {
		if self.strict_hours {
			23
		} else {
			59
		}
	}
}

/// One crontab entry: five time fields and the command to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
	fields: [TimeField; 5],
	command: Option<CronCommand>,
}

impl CronSchedule {
	/// Parses already split tokens: either `@macro command...` or
	/// `minute hour day month weekday command...`.
	pub fn parse<S: AsRef<str>>(tokens: &[S]) -> CronResult<Self> {
		Self::parse_with(tokens, ScheduleOptions::default())
	}

	pub fn parse_with<S: AsRef<str>>(tokens: &[S], options: ScheduleOptions) -> CronResult<Self> {
		if let Some(first) = tokens.first() {
			let first = first.as_ref().trim().to_lowercase();
			if first.starts_with('@') {
				let mut expanded: Vec<String> =
					expand_macro(&first)?.split(' ').map(String::from).collect();
				expanded.extend(tokens[1..].iter().map(|t| t.as_ref().to_string()));
				return Self::parse_with(&expanded, options);
			}
		}

		if tokens.len() < 5 {
			let line: Vec<&str> = tokens.iter().map(AsRef::as_ref).collect();
			return Err(CronError::Format(format!(
				"expected '@macro' or 'minute hour day month weekday', got '{}'",
				line.join(" ")
			)));
		}

		let command = if tokens.len() > 5 {
			let rest: Vec<&str> = tokens[5..].iter().map(AsRef::as_ref).collect();
			Some(CronCommand::parse(&rest.join(" "))?)
		} else {
			None
		};

		let mut schedule = Self {
			fields: [
				TimeField::new(0, 59),
				TimeField::new(0, options.hour_max()),
				TimeField::new(1, 31),
				TimeField::new(1, 12),
				TimeField::new(0, 6),
			],
			command,
		};
		for (kind, token) in TimeKind::ALL.iter().zip(tokens) {
			schedule.set_field(*kind, token.as_ref())?;
		}
		Ok(schedule)
	}

	/// Splits a crontab line on spaces and tabs and parses it.
	pub fn parse_line(line: &str) -> CronResult<Self> {
		Self::parse_line_with(line, ScheduleOptions::default())
	}

	pub fn parse_line_with(line: &str, options: ScheduleOptions) -> CronResult<Self> {
		let tokens: Vec<&str> = line
			.split([' ', '\t'])
			.filter(|t| !t.is_empty())
			.collect();
		Self::parse_with(&tokens, options)
	}

	pub fn field(&self, kind: TimeKind) -> &TimeField {
		&self.fields[kind as usize]
	}

	/// Replaces one field from its crontab text, accepting month and weekday names.
	pub fn set_field(&mut self, kind: TimeKind, text: &str) -> CronResult<()> {
		let text = text.trim_matches(|c: char| c == ' ' || c == '\t').to_lowercase();
		match kind {
			TimeKind::Month => {
				let text = substitute_names(&text, &MONTH_NAMES, 1, kind)?;
				self.fields[kind as usize].parse(&text)
			}
			TimeKind::Weekday => {
				let text = substitute_names(&text, &WEEKDAY_NAMES, 0, kind)?;
				// 7 is another spelling of Sunday
				let mut raw = TimeField::new(0, 7);
				raw.parse(&text)?;
				let bits = raw.bits();
				self.fields[kind as usize] = TimeField::from_bits(0, 6, (bits & 0x7f) | (bits >> 7));
				Ok(())
			}
			_ => self.fields[kind as usize].parse(&text),
		}
	}

	pub fn command(&self) -> Option<&CronCommand> {
		self.command.as_ref()
	}

	pub fn set_command(&mut self, command: Option<CronCommand>) {
		self.command = command;
	}

	/// True when all five fields contain the corresponding part of `time`.
	pub fn matches(&self, time: &NaiveDateTime) -> bool {
		self.field(TimeKind::Month).contains(time.month())
			&& self.field(TimeKind::Day).contains(time.day())
			&& self
				.field(TimeKind::Weekday)
				.contains(time.weekday().num_days_from_sunday())
			&& self.field(TimeKind::Hour).contains(time.hour())
			&& self.field(TimeKind::Minute).contains(time.minute())
	}

	pub fn is_monthly(&self) -> bool {
		self.field(TimeKind::Month).is_wildcard()
	}

	pub fn is_daily(&self) -> bool {
		self.field(TimeKind::Day).is_wildcard()
			&& self.is_monthly()
			&& self.field(TimeKind::Weekday).is_wildcard()
	}

	pub fn is_hourly(&self) -> bool {
		self.field(TimeKind::Hour).is_wildcard() && self.is_daily()
	}

	pub fn is_minutely(&self) -> bool {
		self.field(TimeKind::Minute).is_wildcard() && self.is_hourly()
	}

	/// Exactly one weekday on every day of every month.
	pub fn is_weekly(&self) -> bool {
		self.field(TimeKind::Weekday).len() == 1
			&& self.field(TimeKind::Day).is_wildcard()
			&& self.is_monthly()
	}

	/// Weekdays this schedule runs at, Sunday first.
	pub fn weekdays(&self) -> Vec<Weekday> {
		self.field(TimeKind::Weekday)
			.values()
			.map(|v| SUNDAY_FIRST[usize::from(v)])
			.collect()
	}

	pub fn set_weekdays(&mut self, days: &[Weekday]) -> CronResult<()> {
		if days.is_empty() {
			return Err(CronError::Format("at least one weekday is required".to_string()));
		}
		let bits = days
			.iter()
			.fold(0u64, |bits, day| bits | (1u64 << day.num_days_from_sunday()));
		self.fields[TimeKind::Weekday as usize] = TimeField::from_bits(0, 6, bits);
		Ok(())
	}
}

impl FromStr for CronSchedule {
	type Err = CronError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse_line(s)
	}
}

impl fmt::Display for CronSchedule {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let fields: Vec<String> = self.fields.iter().map(ToString::to_string).collect();
		f.write_str(&fields.join(" "))?;
		if let Some(command) = &self.command {
			write!(f, " {}", command)?;
		}
		Ok(())
	}
}

fn expand_macro(name: &str) -> CronResult<&'static str> {
	match name {
		"@yearly" | "@annually" => Ok("0 0 1 1 *"),
		"@monthly" => Ok("0 0 1 * *"),
		"@weekly" => Ok("0 0 * * 0"),
		"@daily" | "@midnight" => Ok("0 0 * * *"),
		"@hourly" => Ok("0 * * * *"),
		"@reboot" => Err(CronError::Unsupported("@reboot is not supported".to_string())),
		other => Err(CronError::Format(format!("unknown cron repetition '{}'", other))),
	}
}

fn substitute_names(text: &str, names: &[&str], first: usize, kind: TimeKind) -> CronResult<String> {
	let mut out = String::with_capacity(text.len());
	let mut word = String::new();

	let flush = |word: &mut String, out: &mut String| -> CronResult<()> {
		if word.is_empty() {
			return Ok(());
		}
		let index = names.iter().position(|n| *n == word.as_str()).ok_or_else(|| {
			CronError::Format(format!("unknown {} name '{}'", kind.name(), word))
		})?;
		out.push_str(&(index + first).to_string());
		word.clear();
		Ok(())
	};

	for c in text.chars() {
		if c.is_ascii_alphabetic() {
			word.push(c);
		} else {
			flush(&mut word, &mut out)?;
			out.push(c);
		}
	}
	flush(&mut word, &mut out)?;
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::NaiveDate;

	fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
		NaiveDate::from_ymd_opt(y, mo, d)
			.unwrap()
			.and_hms_opt(h, mi, 0)
			.unwrap()
	}

	fn values(schedule: &CronSchedule, kind: TimeKind) -> Vec<u8> {
		schedule.field(kind).values().collect()
	}

	#[test]
	fn five_fields_and_command() {
		let s = CronSchedule::parse_line("30 4 1,15 * 5 /bin/backup --all").unwrap();
		assert_eq!(values(&s, TimeKind::Minute), vec![30]);
		assert_eq!(values(&s, TimeKind::Hour), vec![4]);
		assert_eq!(values(&s, TimeKind::Day), vec![1, 15]);
		assert!(s.field(TimeKind::Month).is_wildcard());
		assert_eq!(values(&s, TimeKind::Weekday), vec![5]);
		let cmd = s.command().unwrap();
		assert_eq!(cmd.command, "/bin/backup");
		assert_eq!(cmd.arguments, "--all");
	}

	#[test]
	fn five_fields_without_command() {
		let s = CronSchedule::parse(&["*", "*", "*", "*", "*"]).unwrap();
		assert!(s.command().is_none());
		assert!(s.is_minutely());
	}

	#[test]
	fn too_few_fields() {
		let err = CronSchedule::parse(&["*", "*", "*", "*"]).unwrap_err();
		assert!(err.is_format());
		assert!(CronSchedule::parse::<&str>(&[]).is_err());
	}

	#[test]
	fn yearly_macro_equals_expanded_form() {
		let a = CronSchedule::parse_line("0 0 1 1 * /bin/x").unwrap();
		let b = CronSchedule::parse_line("@yearly /bin/x").unwrap();
		let c = CronSchedule::parse_line("@annually /bin/x").unwrap();
		assert_eq!(a, b);
		assert_eq!(a, c);
		assert_eq!(b.command().unwrap().command, "/bin/x");
	}

	#[test]
	fn all_macros_expand() {
		let cases = [
			("@monthly", "0 0 1 * *"),
			("@weekly", "0 0 * * 0"),
			("@daily", "0 0 * * *"),
			("@midnight", "0 0 * * *"),
			("@hourly", "0 * * * *"),
			("@HOURLY", "0 * * * *"),
		];
		for (name, fields) in cases {
			let a = CronSchedule::parse_line(&format!("{} run --now", name)).unwrap();
			let b = CronSchedule::parse_line(&format!("{} run --now", fields)).unwrap();
			assert_eq!(a, b, "{}", name);
		}
	}

	#[test]
	fn reboot_is_unsupported_not_format() {
		let err = CronSchedule::parse_line("@reboot /bin/x").unwrap_err();
		assert!(matches!(err, CronError::Unsupported(_)));
		assert!(!err.is_format());
	}

	#[test]
	fn unknown_macro_is_format_error() {
		let err = CronSchedule::parse_line("@fortnightly /bin/x").unwrap_err();
		assert!(err.is_format());
	}

	#[test]
	fn month_and_weekday_names() {
		let s = CronSchedule::parse_line("0 12 * JAN,mar-May Mon-fri /bin/x").unwrap();
		assert_eq!(values(&s, TimeKind::Month), vec![1, 3, 4, 5]);
		assert_eq!(values(&s, TimeKind::Weekday), vec![1, 2, 3, 4, 5]);

		let err = CronSchedule::parse_line("0 12 * foo * /bin/x").unwrap_err();
		assert!(err.is_format());
	}

	#[test]
	fn weekday_seven_is_sunday() {
		let s = CronSchedule::parse_line("0 0 * * 7 /bin/x").unwrap();
		assert_eq!(values(&s, TimeKind::Weekday), vec![0]);

		let s = CronSchedule::parse_line("0 0 * * 5-7 /bin/x").unwrap();
		assert_eq!(values(&s, TimeKind::Weekday), vec![0, 5, 6]);

		let s = CronSchedule::parse_line("0 0 * * 0-7 /bin/x").unwrap();
		assert!(s.field(TimeKind::Weekday).is_wildcard());
	}

	#[test]
	fn out_of_range_values() {
		assert!(CronSchedule::parse_line("60 * * * * x").is_err());
		assert!(CronSchedule::parse_line("* * 0 * * x").is_err());
		assert!(CronSchedule::parse_line("* * 32 * * x").is_err());
		assert!(CronSchedule::parse_line("* * * 13 * x").is_err());
		assert!(CronSchedule::parse_line("* * * * 8 x").is_err());
	}

	#[test]
	fn huge_step_keeps_only_the_start() {
		let s = CronSchedule::parse_line("5-10/4294967295 * * * * /bin/x").unwrap();
		assert_eq!(values(&s, TimeKind::Minute), vec![5]);
		assert!(CronSchedule::parse_line("1/4294967296 * * * * x").is_err());
	}

	#[test]
	fn hour_bound_is_loose_unless_strict() {
		let loose = CronSchedule::parse_line("0 30 * * * x").unwrap();
		assert_eq!(values(&loose, TimeKind::Hour), vec![30]);
		assert!(CronSchedule::parse_line("0 0-59 * * * x")
			.unwrap()
			.field(TimeKind::Hour)
			.is_wildcard());

		let strict = ScheduleOptions { strict_hours: true };
		assert!(CronSchedule::parse_line_with("0 30 * * * x", strict).is_err());
		assert!(CronSchedule::parse_line_with("0 0-23 * * * x", strict)
			.unwrap()
			.field(TimeKind::Hour)
			.is_wildcard());
	}

	#[test]
	fn tabs_and_quoted_commands() {
		let s = CronSchedule::parse_line("*/5\t*  *\t* *\t'/opt/my tool/run' -v").unwrap();
		assert_eq!(values(&s, TimeKind::Minute).len(), 12);
		let cmd = s.command().unwrap();
		assert_eq!(cmd.command, "/opt/my tool/run");
		assert_eq!(cmd.arguments, "-v");
	}

	#[test]
	fn unbalanced_command_quote_fails() {
		let err = CronSchedule::parse_line("* * * * * 'broken").unwrap_err();
		assert!(err.is_format());
	}

	#[test]
	fn classification() {
		let s = CronSchedule::parse_line("* * * * * x").unwrap();
		assert!(s.is_minutely() && s.is_hourly() && s.is_daily() && s.is_monthly());
		assert!(!s.is_weekly());

		let s = CronSchedule::parse_line("5 * * * * x").unwrap();
		assert!(!s.is_minutely() && s.is_hourly());

		let s = CronSchedule::parse_line("5 3 * * * x").unwrap();
		assert!(!s.is_hourly() && s.is_daily());

		let s = CronSchedule::parse_line("5 3 1 * * x").unwrap();
		assert!(!s.is_daily() && s.is_monthly());

		let s = CronSchedule::parse_line("5 3 1 6 * x").unwrap();
		assert!(!s.is_monthly());
	}

	#[test]
	fn weekly_needs_exactly_one_weekday() {
		let mut s = CronSchedule::parse_line("0 0 * * 3 x").unwrap();
		assert!(s.is_weekly());
		assert!(!s.is_daily());

		s.set_field(TimeKind::Weekday, "3,4").unwrap();
		assert!(!s.is_weekly());

		let s = CronSchedule::parse_line("@weekly x").unwrap();
		assert!(s.is_weekly());

		let s = CronSchedule::parse_line("0 0 1 * 3 x").unwrap();
		assert!(!s.is_weekly());
	}

	#[test]
	fn weekdays_accessors() {
		let mut s = CronSchedule::parse_line("0 0 * * sat,mon,sun x").unwrap();
		assert_eq!(s.weekdays(), vec![Weekday::Sun, Weekday::Mon, Weekday::Sat]);

		s.set_weekdays(&[Weekday::Fri, Weekday::Tue, Weekday::Fri]).unwrap();
		assert_eq!(s.weekdays(), vec![Weekday::Tue, Weekday::Fri]);
		assert_eq!(s.field(TimeKind::Weekday).to_string(), "2,5");

		assert!(s.set_weekdays(&[]).is_err());
		assert_eq!(s.weekdays(), vec![Weekday::Tue, Weekday::Fri]);
	}

	#[test]
	fn matches_requires_all_fields() {
		// 2026-10-18 is a Sunday
		let s = CronSchedule::parse_line("30 14 18 oct sun x").unwrap();
		assert!(s.matches(&at(2026, 10, 18, 14, 30)));
		assert!(!s.matches(&at(2026, 10, 18, 14, 31)));
		assert!(!s.matches(&at(2026, 10, 18, 15, 30)));
		assert!(!s.matches(&at(2026, 11, 18, 14, 30)));
		// Same day of month, but a Monday
		let s = CronSchedule::parse_line("30 14 19 oct sun x").unwrap();
		assert!(!s.matches(&at(2026, 10, 19, 14, 30)));
	}

	#[test]
	fn display_renders_fields_and_command() {
		let s = CronSchedule::parse_line("*/15 0 1,2,3 * mon-fri '/opt/a b' -x").unwrap();
		assert_eq!(s.to_string(), "0,15,30,45 0 1-3 * 1-5 '/opt/a b' -x");
		let again: CronSchedule = s.to_string().parse().unwrap();
		assert_eq!(s, again);
	}
}
