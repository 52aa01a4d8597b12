use std::fmt;

use crate::error::{CronError, CronResult};

/// An integer set inside fixed `[min, max]` bounds, parsed from one crontab
/// field: `*`, `*/15`, `5`, `1-5`, `10-50/10`, `7/2` or a comma list of those.
///
/// Bounds never exceed 63, so membership is a single bit mask.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimeField {
	min: u8,
	max: u8,
	bits: u64,
}

impl TimeField {
	/// Creates a field matching every value in `[min, max]`.
	pub fn new(min: u8, max: u8) -> Self {
		debug_assert!(min <= max && max < 64);
		Self {
			min,
			max,
			bits: full_mask(min, max),
		}
	}

	pub(crate) fn from_bits(min: u8, max: u8, bits: u64) -> Self {
		Self {
			min,
			max,
			bits: bits & full_mask(min, max),
		}
	}

	/// Replaces the membership with the set described by `text`.
	/// On error the previous membership is kept.
	pub fn parse(&mut self, text: &str) -> CronResult<()> {
		let text = text.trim();
		if text.is_empty() {
			return Err(CronError::Format(format!(
				"empty time field, expected a value in [{}, {}]",
				self.min, self.max
			)));
		}

		let mut bits = 0u64;
		for part in text.split(',') {
			bits |= self.parse_part(part).map_err(|reason| {
				CronError::Format(format!("invalid time field '{}': {}", text, reason))
			})?;
		}
		self.bits = bits;
		Ok(())
	}

	pub fn min(&self) -> u8 {
		self.min
	}

	pub fn max(&self) -> u8 {
		self.max
	}

	pub fn contains(&self, value: u32) -> bool {
		value < 64 && self.bits & (1u64 << value) != 0
	}

	/// True when every value in the bounds is a member.
	pub fn is_wildcard(&self) -> bool {
		self.bits == full_mask(self.min, self.max)
	}

	pub fn values(&self) -> impl Iterator<Item = u8> + '_ {
		(self.min..=self.max).filter(move |v| self.contains(u32::from(*v)))
	}

	pub fn len(&self) -> usize {
		self.bits.count_ones() as usize
	}

	pub fn is_empty(&self) -> bool {
		self.bits == 0
	}

	pub(crate) fn bits(&self) -> u64 {
		self.bits
	}

	fn parse_part(&self, part: &str) -> Result<u64, String> {
		let (range, step) = match part.split_once('/') {
			Some((range, step)) => {
				let step = parse_number(step)?;
				if step == 0 {
					return Err("step must be greater than zero".to_string());
				}
				(range, Some(step))
			}
			None => (part, None),
		};

		let (start, end) = if range == "*" {
			(u32::from(self.min), u32::from(self.max))
		} else if let Some((a, b)) = range.split_once('-') {
			(self.bounded(a)?, self.bounded(b)?)
		} else {
			let start = self.bounded(range)?;
			// "a/n" runs from a to the upper bound
			match step {
				Some(_) => (start, u32::from(self.max)),
				None => (start, start),
			}
		};

		if start > end {
			return Err(format!("range {}-{} is reversed", start, end));
		}

		let step = step.unwrap_or(1);
		let mut bits = 0u64;
		let mut value = start;
		while value <= end {
			bits |= 1u64 << value;
			value = match value.checked_add(step) {
				Some(next) => next,
				None => break,
			};
		}
		Ok(bits)
	}

	fn bounded(&self, text: &str) -> Result<u32, String> {
		let value = parse_number(text)?;
		if value < u32::from(self.min) || value > u32::from(self.max) {
			return Err(format!(
				"{} is outside [{}, {}]",
				value, self.min, self.max
			));
		}
		Ok(value)
	}
}

impl fmt::Display for TimeField {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.is_wildcard() {
			return f.write_str("*");
		}

		let mut first = true;
		let mut values = self.values().peekable();
		while let Some(start) = values.next() {
			let mut end = start;
			while values.peek() == Some(&(end + 1)) {
				end += 1;
				values.next();
			}
			if !first {
				f.write_str(",")?;
			}
			first = false;
			if start == end {
				write!(f, "{}", start)?;
			} else {
				write!(f, "{}-{}", start, end)?;
			}
		}
		Ok(())
	}
}

fn parse_number(text: &str) -> Result<u32, String> {
	let text = text.trim();
	if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
		return Err(format!("'{}' is not a number", text));
	}
	text.parse::<u32>().map_err(|e| format!("'{}': {}", text, e))
}

fn full_mask(min: u8, max: u8) -> u64 {
	let upper = if max >= 63 { u64::MAX } else { (1u64 << (max + 1)) - 1 };
	let lower = (1u64 << min) - 1;
	upper & !lower
}
