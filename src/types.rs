use std::fmt;
use std::os::unix::io::RawFd;

use crate::expand;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RedirectType { Input, Output, Append, HereIs, ReadWrite }

impl RedirectType {
	pub fn default_fd(self) -> RawFd {
		match self {
			RedirectType::Input | RedirectType::HereIs => 0,
			RedirectType::Output | RedirectType::Append | RedirectType::ReadWrite => 1,
		}
	}

	pub fn symbol(self) -> &'static str {
		match self {
			RedirectType::Input => "<",
			RedirectType::Output => ">",
			RedirectType::Append => ">>",
			RedirectType::HereIs => "<<",
			RedirectType::ReadWrite => "<>",
		}
	}
}

/// One argument word as it leaves the parser.
///
/// `Plain` words were fully resolved (globbed, de-escaped) when they were
/// finalised. `Deferred` words still carry parameter markers and are
/// expanded each time the command runs.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Arg {
	Plain(Vec<u8>),
	Deferred { text: Vec<u8>, nonnull: bool },
}

impl Arg {
	/// Raw bytes, with markers still in place for deferred words.
	pub fn raw(&self) -> &[u8] {
		match *self {
			Arg::Plain(ref v) => v,
			Arg::Deferred { ref text, .. } => text,
		}
	}
}

impl fmt::Display for Arg {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			Arg::Plain(ref v) => write!(f, "{}", String::from_utf8_lossy(v)),
			Arg::Deferred { ref text, .. } => write!(f, "{}", expand::display(text)),
		}
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum RedirectTarget {
	Path(Arg),
	Dup(RawFd),
	Close,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Redirect {
	pub fd: RawFd,
	pub typ: RedirectType,
	pub target: RedirectTarget,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Connective { Seq, And, Or, Background }

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Reserved { None, If, Then, Elif, Else, Fi, For, While, Until, Do, Done, In }

/// Bit set of reserved words that may legally follow the current one.
pub type Follow = u16;

pub const FOLLOW_END: Follow = 1 << 0;
pub const FOLLOW_START: Follow = 1 << 15;

impl Reserved {
	fn bit(self) -> Follow {
		1 << (self as u16)
	}

	pub fn from_word(word: &[u8]) -> Option<Reserved> {
		Some(match word {
			b"if" => Reserved::If,
			b"then" => Reserved::Then,
			b"elif" => Reserved::Elif,
			b"else" => Reserved::Else,
			b"fi" => Reserved::Fi,
			b"for" => Reserved::For,
			b"while" => Reserved::While,
			b"until" => Reserved::Until,
			b"in" => Reserved::In,
			b"do" => Reserved::Do,
			b"done" => Reserved::Done,
			_ => return None,
		})
	}

	/// Words accepted after this one, plus the START/END markers.
	pub fn follow(self) -> Follow {
		use self::Reserved::*;
		match self {
			If => Then.bit() | FOLLOW_START,
			Then => Elif.bit() | Else.bit() | Fi.bit(),
			Elif => Then.bit(),
			Else => Fi.bit(),
			Fi | Done => FOLLOW_END,
			For => In.bit() | FOLLOW_START,
			While | Until => Do.bit() | FOLLOW_START,
			In => Do.bit(),
			Do => Done.bit(),
			None => 0,
		}
	}

	pub fn accepts(follow: Follow, next: Reserved) -> bool {
		follow & next.bit() != 0
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Group {
	pub list: Vec<Pipeline>,
	pub subshell: bool,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Body {
	Empty,
	Words(Vec<Arg>),
	Group(Group),
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Command {
	pub body: Body,
	pub redirects: Vec<Redirect>,
}

impl Command {
	pub fn new() -> Command {
		Command { body: Body::Empty, redirects: vec![] }
	}

	pub fn is_empty(&self) -> bool {
		self.body == Body::Empty && self.redirects.is_empty()
	}

	pub fn words(&self) -> &[Arg] {
		match self.body {
			Body::Words(ref w) => w,
			_ => &[],
		}
	}
}

impl Default for Command {
	fn default() -> Command {
		Command::new()
	}
}

impl fmt::Display for Command {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self.body {
			Body::Empty => {},
			Body::Words(ref words) => {
				for (i, w) in words.iter().enumerate() {
					if i > 0 { f.write_str(" ")?; }
					write!(f, "{}", w)?;
				}
			},
			Body::Group(ref g) => f.write_str(if g.subshell { "( ... )" } else { "{ ... }" })?,
		}
		Ok(())
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Pipeline {
	pub commands: Vec<Command>,
	pub connective: Connective,
	pub reserved: Reserved,
}

impl Pipeline {
	pub fn is_background(&self) -> bool {
		self.connective == Connective::Background
	}

	/// Human-readable text used for job listings.
	pub fn text(&self) -> String {
		let parts: Vec<String> = self.commands.iter().map(|c| c.to_string()).collect();
		parts.join(" | ")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn follow_masks() {
		assert!(Reserved::accepts(Reserved::If.follow(), Reserved::Then));
		assert!(!Reserved::accepts(Reserved::If.follow(), Reserved::Fi));
		assert!(Reserved::accepts(Reserved::Then.follow(), Reserved::Else));
		assert!(Reserved::accepts(Reserved::For.follow(), Reserved::In));
		assert!(!Reserved::accepts(Reserved::In.follow(), Reserved::Done));
		assert_eq!(Reserved::Done.follow(), FOLLOW_END);
		assert!(Reserved::While.follow() & FOLLOW_START != 0);
	}

	#[test]
	fn pipeline_text() {
		let pipeline = Pipeline {
			commands: vec![
				Command { body: Body::Words(vec![Arg::Plain(b"sleep".to_vec()), Arg::Plain(b"1".to_vec())]), redirects: vec![] },
				Command { body: Body::Words(vec![Arg::Plain(b"cat".to_vec())]), redirects: vec![] },
			],
			connective: Connective::Background,
			reserved: Reserved::None,
		};
		assert_eq!(pipeline.text(), "sleep 1 | cat");
		assert!(pipeline.is_background());
	}
}
