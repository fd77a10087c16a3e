//! Parameter expansion, field splitting and command substitution.
//!
//! The parser leaves every parameter reference in the word as
//! `MARK name MARK`. `VAR_MARK` references are field-split and globbed when
//! the word is expanded; `QUOTED_VAR_MARK` references come from inside
//! double quotes and are inserted verbatim.

use std::fs::File;
use std::io::{self,Read,Write};
use std::mem;
use std::os::unix::io::AsRawFd;

use log::debug;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::wait::waitpid;
use nix::unistd::{self,ForkResult};

use crate::eval::{self,ExecError};
use crate::globber;
use crate::job;
use crate::session::Session;
use crate::types::Pipeline;

pub const VAR_MARK: u8 = 0x03;
pub const QUOTED_VAR_MARK: u8 = 0x04;

pub fn is_mark(c: u8) -> bool {
	c == VAR_MARK || c == QUOTED_VAR_MARK
}

/// Appends `c`, protecting it from globbing and backslash removal.
pub fn push_quoted(out: &mut Vec<u8>, c: u8) {
	if c == b'*' || c == b'?' || c == b'[' || c == b'\\' {
		out.push(b'\\');
	}
	out.push(c);
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Piece<'a> {
	Literal(u8),
	Reference { quoted: bool, name: &'a [u8] },
}

struct Pieces<'a> {
	text: &'a [u8],
	i: usize,
}

impl<'a> Iterator for Pieces<'a> {
	type Item = Piece<'a>;

	fn next(&mut self) -> Option<Piece<'a>> {
		let c = *self.text.get(self.i)?;
		if !is_mark(c) {
			self.i += 1;
			return Some(Piece::Literal(c));
		}
		let start = self.i + 1;
		let end = self.text[start ..].iter().position(|&b| b == c).map_or(self.text.len(), |p| start + p);
		self.i = end + 1;
		Some(Piece::Reference { quoted: c == QUOTED_VAR_MARK, name: &self.text[start .. end] })
	}
}

fn pieces(text: &[u8]) -> Pieces<'_> {
	Pieces { text: text, i: 0 }
}

pub fn has_references(text: &[u8]) -> bool {
	text.iter().any(|&c| is_mark(c))
}

/// Current value of a parameter; unset parameters expand to nothing.
pub fn lookup_param(session: &Session, name: &[u8]) -> Vec<u8> {
	match name {
		b"?" => session.last_status.to_string().into_bytes(),
		b"$" => session.shell_pid.to_string().into_bytes(),
		b"!" => session.last_bg_pid.map(|p| p.to_string().into_bytes()).unwrap_or_default(),
		b"#" => session.positional.len().saturating_sub(1).to_string().into_bytes(),
		b"*" => {
			let ifs = session.ifs();
			let mut out = vec![];
			for (i, arg) in session.positional.iter().skip(1).enumerate() {
				if i > 0 {
					out.extend(ifs.first());
				}
				out.extend_from_slice(arg);
			}
			out
		},
		&[d] if d.is_ascii_digit() => {
			session.positional.get((d - b'0') as usize).cloned().unwrap_or_default()
		},
		_ => match std::str::from_utf8(name) {
			Ok(name) => session.vars.get(name).map(|v| v.to_owned()).unwrap_or_default(),
			Err(_) => vec![],
		},
	}
}

/// Expands a deferred word into its final arguments: references are
/// substituted, unquoted ones split on `IFS`, and every field is globbed.
pub fn expand_word(session: &Session, text: &[u8], nonnull: bool) -> Vec<Vec<u8>> {
	let ifs = session.ifs();
	let mut fields: Vec<Vec<u8>> = vec![];
	let mut cur: Vec<u8> = vec![];
	// A quoted reference keeps the field alive even when it is empty.
	let mut live = false;
	for piece in pieces(text) {
		match piece {
			Piece::Literal(c) => cur.push(c),
			Piece::Reference { quoted: true, name } => {
				live = true;
				for c in lookup_param(session, name) {
					push_quoted(&mut cur, c);
				}
			},
			Piece::Reference { quoted: false, name } => {
				for c in lookup_param(session, name) {
					if ifs.contains(&c) {
						if !cur.is_empty() || live {
							fields.push(mem::take(&mut cur));
							live = false;
						}
					} else if c == b'\\' {
						cur.extend_from_slice(b"\\\\");
					} else {
						cur.push(c);
					}
				}
			},
		}
	}
	if !cur.is_empty() || live || (fields.is_empty() && nonnull) {
		fields.push(cur);
	}
	fields.iter().flat_map(|f| globber::expand(f)).collect()
}

/// Expands a word as one string with no splitting or globbing, as used for
/// assignment values and here-strings.
pub fn expand_string(session: &Session, text: &[u8]) -> Vec<u8> {
	let mut out = vec![];
	for piece in pieces(text) {
		match piece {
			Piece::Literal(c) => out.push(c),
			Piece::Reference { name, .. } => {
				for c in lookup_param(session, name) {
					push_quoted(&mut out, c);
				}
			},
		}
	}
	globber::unescape(&out)
}

/// Readable form of a word for job listings.
pub fn display(text: &[u8]) -> String {
	let mut out = vec![];
	for piece in pieces(text) {
		match piece {
			Piece::Literal(c) => out.push(c),
			Piece::Reference { name, .. } => {
				out.push(b'$');
				out.extend_from_slice(name);
			},
		}
	}
	String::from_utf8_lossy(&globber::unescape(&out)).into_owned()
}

/// Runs `list` in a forked child and returns everything it wrote to
/// standard output. The trailing newline is kept.
pub fn command_output(session: &mut Session, list: &[Pipeline]) -> Result<Vec<u8>, ExecError> {
	if session.fake {
		return Ok(vec![]);
	}
	let _ = io::stdout().flush();
	let (read_end, write_end) = unistd::pipe2(OFlag::O_CLOEXEC)?;
	match unsafe { unistd::fork() }? {
		ForkResult::Child => {
			drop(read_end);
			if unistd::dup2(write_end.as_raw_fd(), libc::STDOUT_FILENO).is_err() {
				eval::exit_child(1);
			}
			drop(write_end);
			if session.terminal.is_some() {
				job::restore_default_signals();
			}
			session.enter_subshell();
			let status = eval::run_list(session, list);
			eval::exit_child(status)
		},
		ForkResult::Parent { child } => {
			drop(write_end);
			let mut out = vec![];
			File::from(read_end).read_to_end(&mut out)?;
			loop {
				match waitpid(child, None) {
					Err(Errno::EINTR) => continue,
					r => {
						debug!("command substitution {} finished: {:?}", child, r);
						break;
					},
				}
			}
			Ok(out)
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn session() -> Session {
		let mut session = Session::new(vec![b"hush".to_vec(), b"one".to_vec(), b"two".to_vec()]);
		session.vars.unset("IFS").unwrap();
		session
	}

	fn word(parts: &[&[u8]]) -> Vec<u8> {
		parts.concat()
	}

	#[test]
	fn special_parameters() {
		let mut s = session();
		s.last_status = 3;
		assert_eq!(lookup_param(&s, b"?"), b"3".to_vec());
		assert_eq!(lookup_param(&s, b"#"), b"2".to_vec());
		assert_eq!(lookup_param(&s, b"0"), b"hush".to_vec());
		assert_eq!(lookup_param(&s, b"2"), b"two".to_vec());
		assert_eq!(lookup_param(&s, b"7"), b"".to_vec());
		assert_eq!(lookup_param(&s, b"*"), b"one two".to_vec());
		assert_eq!(lookup_param(&s, b"!"), b"".to_vec());
		assert_eq!(lookup_param(&s, b"$"), s.shell_pid.to_string().into_bytes());
	}

	#[test]
	fn unquoted_reference_splits() {
		let mut s = session();
		s.set_var("HUSH_T_SPLIT", b"a  b", false);
		let text = word(&[b"x", &[VAR_MARK], b"HUSH_T_SPLIT", &[VAR_MARK]]);
		assert_eq!(expand_word(&s, &text, false), vec![b"xa".to_vec(), b"b".to_vec()]);
	}

	#[test]
	fn quoted_reference_stays_whole() {
		let mut s = session();
		s.set_var("HUSH_T_QUOTED", b"a  *", false);
		let text = word(&[&[QUOTED_VAR_MARK], b"HUSH_T_QUOTED", &[QUOTED_VAR_MARK]]);
		assert_eq!(expand_word(&s, &text, true), vec![b"a  *".to_vec()]);
	}

	#[test]
	fn empty_references() {
		let s = session();
		let unquoted = word(&[&[VAR_MARK], b"HUSH_T_UNSET", &[VAR_MARK]]);
		assert!(expand_word(&s, &unquoted, false).is_empty());
		let quoted = word(&[&[QUOTED_VAR_MARK], b"HUSH_T_UNSET", &[QUOTED_VAR_MARK]]);
		assert_eq!(expand_word(&s, &quoted, true), vec![vec![]]);
	}

	#[test]
	fn string_expansion_does_not_split() {
		let mut s = session();
		s.set_var("HUSH_T_STR", b"a b*", false);
		let text = word(&[b"v=", &[VAR_MARK], b"HUSH_T_STR", &[VAR_MARK], b"\\*"]);
		assert_eq!(expand_string(&s, &text), b"v=a b**".to_vec());
	}

	#[test]
	fn display_restores_dollar() {
		let text = word(&[b"echo", &[VAR_MARK], b"HOME", &[VAR_MARK]]);
		assert_eq!(display(&text), "echo$HOME");
	}
}
