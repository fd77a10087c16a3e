//! Filesystem wildcard expansion of finished words.
//!
//! Words arrive with quoted or escaped characters prefixed by a backslash.
//! Unescaped `*`, `?` and `[` make a word a pattern; anything else, and any
//! pattern that matches nothing, falls back to the word with one level of
//! backslashes removed.

use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;

use glob::{glob_with, MatchOptions};
use log::trace;

pub fn needs_glob(word: &[u8]) -> bool {
	let mut escaped = false;
	for &c in word {
		if escaped {
			escaped = false;
		} else if c == b'\\' {
			escaped = true;
		} else if c == b'*' || c == b'?' || c == b'[' {
			return true;
		}
	}
	false
}

/// Removes escaping backslashes; `\\` becomes a single backslash.
pub fn unescape(word: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(word.len());
	let mut escaped = false;
	for &c in word {
		if !escaped && c == b'\\' {
			escaped = true;
			continue;
		}
		escaped = false;
		out.push(c);
	}
	out
}

/// Rewrites escapes into the bracket form the pattern matcher understands.
fn to_pattern(word: &[u8]) -> Option<String> {
	let mut out = Vec::with_capacity(word.len() + 8);
	let mut escaped = false;
	for &c in word {
		if escaped {
			escaped = false;
			match c {
				b'*' | b'?' | b'[' | b']' => { out.push(b'['); out.push(c); out.push(b']'); },
				_ => out.push(c),
			}
		} else if c == b'\\' {
			escaped = true;
		} else {
			out.push(c);
		}
	}
	String::from_utf8(out).ok()
}

/// Expands one word into its argument list. Never empty.
pub fn expand(word: &[u8]) -> Vec<Vec<u8>> {
	if needs_glob(word) {
		if let Some(pattern) = to_pattern(word) {
			let options = MatchOptions {
				case_sensitive: true,
				require_literal_separator: true,
				require_literal_leading_dot: true,
			};
			if let Ok(paths) = glob_with(&pattern, options) {
				let matches: Vec<Vec<u8>> = paths
					.filter_map(|p| p.ok())
					.map(|p| OsString::from(p).into_vec())
					.collect();
				trace!("glob {:?}: {} matches", pattern, matches.len());
				if !matches.is_empty() {
					return matches;
				}
			}
		}
	}
	vec![unescape(word)]
}
