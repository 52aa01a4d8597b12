//! Environment expansion and argument splitting for launched programs.

use vigil_core::paths::expand_tilde;

/// Expands `$NAME`, `${NAME}` and a leading `~/`. Unknown variables are kept verbatim.
pub fn expand_vars(text: &str) -> String {
	let expanded = expand_with(text, |name| std::env::var(name).ok());
	if expanded.starts_with("~/") {
		expand_tilde(&expanded).to_string_lossy().into_owned()
	} else {
		expanded
	}
}

pub(crate) fn expand_with(text: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
	let mut out = String::with_capacity(text.len());
	let mut rest = text;

	while let Some(pos) = rest.find('$') {
		out.push_str(&rest[..pos]);
		let after = &rest[pos + 1..];

		if let Some(braced) = after.strip_prefix('{') {
			if let Some(end) = braced.find('}') {
				let name = &braced[..end];
				if is_name(name) {
					match lookup(name) {
						Some(value) => out.push_str(&value),
						None => out.push_str(&rest[pos..pos + end + 3]),
					}
					rest = &braced[end + 1..];
					continue;
				}
			}
			out.push('$');
			rest = after;
			continue;
		}

		let len = name_len(after);
		if len == 0 {
			out.push('$');
			rest = after;
			continue;
		}
		let name = &after[..len];
		match lookup(name) {
			Some(value) => out.push_str(&value),
			None => {
				out.push('$');
				out.push_str(name);
			}
		}
		rest = &after[len..];
	}

	out.push_str(rest);
	out
}

/// Splits an argument string on unquoted whitespace. Single and double
/// quotes group words and are removed; an unterminated quote runs to the end.
pub fn split_args(text: &str) -> Vec<String> {
	let mut args = Vec::new();
	let mut current = String::new();
	let mut in_word = false;
	let mut quote: Option<char> = None;

	for c in text.chars() {
		match quote {
			Some(q) if c == q => quote = None,
			Some(_) => current.push(c),
			None if c == '\'' || c == '"' => {
				quote = Some(c);
				in_word = true;
			}
			None if c.is_whitespace() => {
				if in_word {
					args.push(std::mem::take(&mut current));
					in_word = false;
				}
			}
			None => {
				current.push(c);
				in_word = true;
			}
		}
	}
	if in_word {
		args.push(current);
	}
	args
}

fn name_len(text: &str) -> usize {
	let mut chars = text.char_indices();
	match chars.next() {
		Some((_, c)) if c == '_' || c.is_ascii_alphabetic() => {}
		_ => return 0,
	}
	chars
		.find(|(_, c)| !(*c == '_' || c.is_ascii_alphanumeric()))
		.map(|(i, _)| i)
		.unwrap_or(text.len())
}

fn is_name(text: &str) -> bool {
	!text.is_empty() && name_len(text) == text.len()
}
