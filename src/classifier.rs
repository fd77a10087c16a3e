//! Byte classification driving the parser's lexical decisions.

pub const DEFAULT_IFS: &[u8] = b" \t\n";

const SYNTAX_CHARS: &[u8] = b"<>;&|(){}#";
const SPECIAL_CHARS: &[u8] = b"\\$'\"`";

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CharClass {
	/// Always part of the current word.
	Ordinary,
	/// Operator characters, literal only inside quotes.
	Syntax,
	/// Field separators from `IFS`, literal only inside quotes.
	Ifs,
	/// Quotes, backslash, `$` and backquote.
	Special,
}

#[derive(Clone)]
pub struct Classifier {
	table: [CharClass; 256],
	ifs: Vec<u8>,
}

impl Classifier {
	pub fn new(ifs: &[u8]) -> Classifier {
		let mut this = Classifier { table: [CharClass::Ordinary; 256], ifs: ifs.to_owned() };
		this.mark(SPECIAL_CHARS, CharClass::Special);
		this.mark(SYNTAX_CHARS, CharClass::Syntax);
		this.mark(ifs, CharClass::Ifs);
		// Statements end at a newline whatever `IFS` holds.
		this.mark(b"\n", CharClass::Ifs);
		this
	}

	/// Table for re-reading command substitution output: only `IFS` splits.
	pub fn substitution(ifs: &[u8]) -> Classifier {
		let mut this = Classifier { table: [CharClass::Ordinary; 256], ifs: ifs.to_owned() };
		this.mark(ifs, CharClass::Ifs);
		this
	}

	fn mark(&mut self, set: &[u8], class: CharClass) {
		for &c in set {
			self.table[c as usize] = class;
		}
	}

	pub fn class(&self, c: u8) -> CharClass {
		self.table[c as usize]
	}

	pub fn ifs(&self) -> &[u8] {
		&self.ifs
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_table() {
		let c = Classifier::new(DEFAULT_IFS);
		assert_eq!(c.class(b'a'), CharClass::Ordinary);
		assert_eq!(c.class(b'*'), CharClass::Ordinary);
		assert_eq!(c.class(b' '), CharClass::Ifs);
		assert_eq!(c.class(b'\n'), CharClass::Ifs);
		assert_eq!(c.class(b';'), CharClass::Syntax);
		assert_eq!(c.class(b'#'), CharClass::Syntax);
		assert_eq!(c.class(b'$'), CharClass::Special);
		assert_eq!(c.class(b'`'), CharClass::Special);
	}

	#[test]
	fn ifs_overrides_syntax() {
		let c = Classifier::new(b":;");
		assert_eq!(c.class(b':'), CharClass::Ifs);
		assert_eq!(c.class(b';'), CharClass::Ifs);
		assert_eq!(c.class(b' '), CharClass::Ordinary);
		assert_eq!(c.ifs(), b":;");
	}

	#[test]
	fn substitution_only_splits() {
		let c = Classifier::substitution(DEFAULT_IFS);
		assert_eq!(c.class(b';'), CharClass::Ordinary);
		assert_eq!(c.class(b'$'), CharClass::Ordinary);
		assert_eq!(c.class(b'\t'), CharClass::Ifs);
	}
}
