use std::fmt;
use std::str::FromStr;

use crate::error::{CronError, CronResult};

/// The program and argument string of a crontab line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CronCommand {
	pub command: String,
	pub arguments: String,
}

impl CronCommand {
	/// Splits `text` at the first space outside of quotes. Quote characters are
	/// removed from the command, the arguments are kept verbatim.
	pub fn parse(text: &str) -> CronResult<Self> {
		let mut quotes: Vec<char> = Vec::new();

		for (i, c) in text.char_indices() {
			match c {
				' ' if quotes.is_empty() => {
					return Ok(Self {
						command: strip_quotes(&text[..i]),
						arguments: text[i + 1..].to_string(),
					});
				}
				'\'' | '"' => {
					if quotes.last() == Some(&c) {
						quotes.pop();
					} else {
						quotes.push(c);
					}
				}
				_ => {}
			}
		}

		if !quotes.is_empty() {
			return Err(CronError::Format(format!(
				"unbalanced quotes in command '{}'",
				text
			)));
		}

		Ok(Self {
			command: strip_quotes(text),
			arguments: String::new(),
		})
	}
}

impl FromStr for CronCommand {
	type Err = CronError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl fmt::Display for CronCommand {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "'{}' {}", self.command, self.arguments)
	}
}

fn strip_quotes(text: &str) -> String {
	text.chars().filter(|c| *c != '\'' && *c != '"').collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn plain_command_without_arguments() {
		let cmd = CronCommand::parse("/usr/bin/true").unwrap();
		assert_eq!(cmd.command, "/usr/bin/true");
		assert_eq!(cmd.arguments, "");
	}

	#[test]
	fn splits_at_first_space() {
		let cmd = CronCommand::parse("/bin/backup --fast /srv").unwrap();
		assert_eq!(cmd.command, "/bin/backup");
		assert_eq!(cmd.arguments, "--fast /srv");
	}

	#[test]
	fn quoted_command_with_spaces() {
		let cmd = CronCommand::parse("'/usr/bin/my app' --flag value").unwrap();
		assert_eq!(cmd.command, "/usr/bin/my app");
		assert_eq!(cmd.arguments, "--flag value");

		let cmd = CronCommand::parse("\"/opt/a b/run\"").unwrap();
		assert_eq!(cmd.command, "/opt/a b/run");
		assert_eq!(cmd.arguments, "");
	}

	#[test]
	fn arguments_keep_their_quotes() {
		let cmd = CronCommand::parse("echo 'hello world' \"x\"").unwrap();
		assert_eq!(cmd.command, "echo");
		assert_eq!(cmd.arguments, "'hello world' \"x\"");
	}

	#[test]
	fn nested_quotes_of_the_other_kind() {
		let err = CronCommand::parse("\"it's 'here'\" now").unwrap_err();
		assert!(err.is_format());

		let cmd = CronCommand::parse("\"a 'b' c\" d").unwrap();
		assert_eq!(cmd.command, "a b c");
		assert_eq!(cmd.arguments, "d");
	}

	#[test]
	fn unterminated_quote_is_a_format_error() {
		let err = CronCommand::parse("'unterminated").unwrap_err();
		assert!(matches!(err, CronError::Format(_)));
	}

	#[test]
	fn display_quotes_the_command() {
		let cmd = CronCommand::parse("'/usr/bin/my app' --flag value").unwrap();
		assert_eq!(cmd.to_string(), "'/usr/bin/my app' --flag value");
		assert_eq!(CronCommand::parse(&cmd.to_string()).unwrap(), cmd);
	}
}
