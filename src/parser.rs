use std::{error,fmt,mem};
use std::os::unix::io::RawFd;

use log::{debug,trace};

use crate::classifier::{CharClass,Classifier};
use crate::expand::{self,QUOTED_VAR_MARK,VAR_MARK};
use crate::globber;
use crate::input::InputStream;
use crate::session::{self,Session};
use crate::types::*;
use crate::vars;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ParseError {
	Syntax(String),
	UnexpectedEof,
}

impl fmt::Display for ParseError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			ParseError::Syntax(ref msg) => write!(f, "syntax error: {}", msg),
			ParseError::UnexpectedEof => write!(f, "syntax error: unexpected end of file"),
		}
	}
}

impl error::Error for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;

fn syntax<T, S: Into<String>>(msg: S) -> ParseResult<T> {
	Err(ParseError::Syntax(msg.into()))
}

/// The word currently being accumulated.
#[derive(Debug, Default)]
struct WordBuf {
	text: Vec<u8>,
	/// Inside double quotes.
	quote: bool,
	/// Quotes were seen, so an empty word still counts.
	nonnull: bool,
}

impl WordBuf {
	fn push(&mut self, c: u8) {
		if self.quote {
			expand::push_quoted(&mut self.text, c);
		} else {
			self.text.push(c);
		}
	}

	fn is_null(&self) -> bool {
		self.text.is_empty() && !self.nonnull
	}

	fn take(&mut self) -> (Vec<u8>, bool) {
		let nonnull = mem::replace(&mut self.nonnull, false);
		(mem::take(&mut self.text), nonnull)
	}
}

/// One level of compound-statement nesting.
#[derive(Debug)]
struct Frame {
	list: Vec<Pipeline>,
	pipe: Vec<Command>,
	child: Command,
	pending_redirect: Option<(RawFd, RedirectType)>,
	/// Reserved word that opened this frame.
	opener: Reserved,
	state: Reserved,
	follow: Follow,
}

impl Frame {
	fn new() -> Frame {
		Frame {
			list: vec![],
			pipe: vec![],
			child: Command::new(),
			pending_redirect: None,
			opener: Reserved::None,
			state: Reserved::None,
			follow: 0,
		}
	}
}

/// Stack of parse frames; the last one is being filled.
#[derive(Debug)]
struct Context {
	frames: Vec<Frame>,
}

impl Context {
	fn new() -> Context {
		Context { frames: vec![Frame::new()] }
	}

	fn top(&self) -> &Frame {
		let last = self.frames.len() - 1;
		&self.frames[last]
	}

	fn top_mut(&mut self) -> &mut Frame {
		let last = self.frames.len() - 1;
		&mut self.frames[last]
	}

	fn done_command(&mut self) -> ParseResult<()> {
		let top = self.top_mut();
		if top.pending_redirect.is_some() {
			return syntax("missing redirection target");
		}
		if top.child.is_empty() {
			return Ok(());
		}
		let child = mem::take(&mut top.child);
		top.pipe.push(child);
		Ok(())
	}

	fn done_pipe(&mut self, connective: Connective) -> ParseResult<()> {
		self.done_command()?;
		let top = self.top_mut();
		let commands = mem::take(&mut top.pipe);
		// Empty rows carry nothing to run; an empty `in` list is still a list.
		if commands.is_empty() && top.state != Reserved::In {
			return Ok(());
		}
		trace!("done_pipe {:?} {:?} ({} commands)", connective, top.state, commands.len());
		top.list.push(Pipeline { commands: commands, connective: connective, reserved: top.state });
		Ok(())
	}

	/// Closes the statement, failing if a compound construct is still open.
	fn finish(mut self) -> ParseResult<Vec<Pipeline>> {
		if self.frames.len() > 1 {
			return Err(ParseError::UnexpectedEof);
		}
		match self.frames.pop() {
			Some(frame) => Ok(frame.list),
			None => Ok(vec![]),
		}
	}
}

/// Shape checks for a finished `for` construct.
fn check_for_loop(list: &[Pipeline]) -> ParseResult<()> {
	let head = match list.first() {
		Some(head) if head.reserved == Reserved::For => head,
		_ => return syntax("bad for loop variable"),
	};
	let name_ok = match head.commands.as_slice() {
		[cmd] => match cmd.words() {
			[Arg::Plain(name)] => cmd.redirects.is_empty() && vars::is_name(name),
			_ => false,
		},
		_ => false,
	};
	if !name_ok {
		return syntax("bad for loop variable");
	}
	match list.get(1) {
		Some(row) if row.reserved == Reserved::In => {
			let simple = row.commands.len() <= 1
				&& row.commands.iter().all(|c| c.redirects.is_empty() && !matches!(c.body, Body::Group(_)));
			if !simple {
				return syntax("unexpected text after 'in' list");
			}
		},
		_ => return syntax("'for' must be followed by 'in'"),
	}
	if list[2 ..].iter().any(|p| p.reserved == Reserved::In) {
		return syntax("unexpected 'in'");
	}
	Ok(())
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Stop { Trigger, Eof }

pub struct Parser {
	classifier: Classifier,
	/// Re-reading command substitution output: no reserved words.
	replaying: bool,
}

impl Parser {
	pub fn new() -> Parser {
		Parser { classifier: Classifier::new(crate::classifier::DEFAULT_IFS), replaying: false }
	}

	/// Reads one top-level statement. `Ok(None)` means end of input.
	pub fn parse_statement(&mut self, session: &mut Session, input: &mut InputStream) -> ParseResult<Option<Vec<Pipeline>>> {
		self.classifier = Classifier::new(&session.ifs());
		self.replaying = false;
		let mut ctx = Context::new();
		let mut word = WordBuf::default();
		let stop = self.parse_stream(session, &mut word, &mut ctx, input, Some(b'\n'))?;
		if word.quote {
			return Err(ParseError::UnexpectedEof);
		}
		self.done_word(&mut word, &mut ctx)?;
		ctx.done_pipe(Connective::Seq)?;
		let list = ctx.finish()?;
		if stop == Stop::Eof && list.is_empty() {
			return Ok(None);
		}
		debug!("parsed statement: {} pipelines", list.len());
		Ok(Some(list))
	}

	fn reserved_word(&mut self, ctx: &mut Context, text: &[u8]) -> ParseResult<bool> {
		if self.replaying {
			return Ok(false);
		}
		let r = match Reserved::from_word(text) {
			Some(r) => r,
			None => return Ok(false),
		};
		let word = String::from_utf8_lossy(text).into_owned();
		let follow = r.follow();
		if follow & FOLLOW_START != 0 {
			if ctx.top().state == Reserved::In || ctx.top().state == Reserved::For {
				return syntax(format!("unexpected '{}'", word));
			}
			trace!("push frame for '{}'", word);
			let mut frame = Frame::new();
			frame.opener = r;
			ctx.frames.push(frame);
		} else if ctx.top().state == Reserved::None || !Reserved::accepts(ctx.top().follow, r) {
			return syntax(format!("unexpected '{}'", word));
		}
		{
			let top = ctx.top_mut();
			top.state = r;
			top.follow = follow;
		}
		if follow & FOLLOW_END != 0 {
			ctx.done_pipe(Connective::Seq)?;
			let frame = match ctx.frames.pop() {
				Some(frame) => frame,
				None => return syntax(format!("unexpected '{}'", word)),
			};
			if frame.opener == Reserved::For {
				check_for_loop(&frame.list)?;
			}
			trace!("pop frame at '{}'", word);
			ctx.top_mut().child.body = Body::Group(Group { list: frame.list, subshell: false });
		}
		Ok(true)
	}

	fn done_word(&mut self, word: &mut WordBuf, ctx: &mut Context) -> ParseResult<()> {
		if word.is_null() {
			return Ok(());
		}
		let (text, nonnull) = word.take();
		let deferred = expand::has_references(&text);
		if let Some((fd, typ)) = ctx.top_mut().pending_redirect.take() {
			let target = if deferred {
				Arg::Deferred { text: text, nonnull: nonnull }
			} else if typ == RedirectType::HereIs {
				Arg::Plain(globber::unescape(&text))
			} else {
				let mut matches = globber::expand(&text);
				if matches.len() != 1 {
					return syntax("ambiguous redirect");
				}
				Arg::Plain(matches.remove(0))
			};
			ctx.top_mut().child.redirects.push(Redirect { fd: fd, typ: typ, target: RedirectTarget::Path(target) });
			return Ok(());
		}
		let leading = match ctx.top().child.body {
			Body::Group(_) => return syntax("unexpected word after group"),
			Body::Empty => true,
			Body::Words(ref words) => words.iter().all(|w| vars::split_assignment(w.raw()).is_some()),
		};
		if ctx.top().child.body == Body::Empty && !nonnull && self.reserved_word(ctx, &text)? {
			return Ok(());
		}
		let args: Vec<Arg> = if deferred {
			vec![Arg::Deferred { text: text, nonnull: nonnull }]
		} else if leading && vars::split_assignment(&text).is_some() {
			vec![Arg::Plain(globber::unescape(&text))]
		} else {
			globber::expand(&text).into_iter().map(Arg::Plain).collect()
		};
		{
			let child = &mut ctx.top_mut().child;
			match child.body {
				Body::Words(ref mut words) => words.extend(args),
				_ => child.body = Body::Words(args),
			}
		}
		if ctx.top().state == Reserved::For {
			ctx.done_pipe(Connective::Seq)?;
		}
		Ok(())
	}

	fn parse_stream(&mut self, session: &mut Session, word: &mut WordBuf, ctx: &mut Context,
	                input: &mut InputStream, end: Option<u8>) -> ParseResult<Stop> {
		while let Some(ch) = input.get() {
			let class = self.classifier.class(ch);
			let next = if ch == b'\n' { None } else { input.peek() };
			if class == CharClass::Ordinary || (word.quote && (class == CharClass::Syntax || class == CharClass::Ifs)) {
				word.push(ch);
				continue;
			}
			if class == CharClass::Ifs {
				self.done_word(word, ctx)?;
				if end.is_some() && ch == b'\n' {
					ctx.done_pipe(Connective::Seq)?;
				}
			}
			if Some(ch) == end && !word.quote && ctx.top().state == Reserved::None {
				return Ok(Stop::Trigger);
			}
			if class == CharClass::Ifs {
				continue;
			}
			match ch {
				b'#' => {
					if word.is_null() && !word.quote {
						while let Some(c) = input.peek() {
							if c == b'\n' { break; }
							input.get();
						}
					} else {
						word.push(ch);
					}
				},
				b'\\' => match next {
					None => return syntax("backslash at end of input"),
					Some(b'\n') => { input.get(); },
					Some(n) if word.quote && !b"$`\"\\".contains(&n) => word.push(b'\\'),
					Some(n) => {
						input.get();
						word.text.push(b'\\');
						word.text.push(n);
					},
				},
				b'$' => self.handle_dollar(session, word, ctx, input)?,
				b'\'' if word.quote => word.push(ch),
				b'\'' => {
					word.nonnull = true;
					loop {
						match input.get() {
							None => return Err(ParseError::UnexpectedEof),
							Some(b'\'') => break,
							Some(c) => expand::push_quoted(&mut word.text, c),
						}
					}
				},
				b'"' => {
					word.nonnull = true;
					word.quote = !word.quote;
				},
				b'`' => self.command_substitution(session, word, ctx, input, b'`')?,
				b'>' => {
					let fd = redirect_opt_num(word);
					self.done_word(word, ctx)?;
					let typ = match next {
						Some(b'>') => { input.get(); RedirectType::Append },
						Some(b'(') => return syntax("process substitution is not supported"),
						_ => RedirectType::Output,
					};
					setup_redirect(ctx, fd, typ, input)?;
				},
				b'<' => {
					let fd = redirect_opt_num(word);
					self.done_word(word, ctx)?;
					let typ = match next {
						Some(b'<') => { input.get(); RedirectType::HereIs },
						Some(b'>') => { input.get(); RedirectType::ReadWrite },
						Some(b'(') => return syntax("process substitution is not supported"),
						_ => RedirectType::Input,
					};
					setup_redirect(ctx, fd, typ, input)?;
				},
				b';' => {
					self.done_word(word, ctx)?;
					ctx.done_pipe(Connective::Seq)?;
				},
				b'&' => {
					self.done_word(word, ctx)?;
					if next == Some(b'&') {
						input.get();
						ctx.done_pipe(Connective::And)?;
					} else {
						ctx.done_pipe(Connective::Background)?;
					}
				},
				b'|' => {
					self.done_word(word, ctx)?;
					if next == Some(b'|') {
						input.get();
						ctx.done_pipe(Connective::Or)?;
					} else {
						ctx.done_command()?;
					}
				},
				b'(' | b'{' => self.parse_group(session, word, ctx, input, ch)?,
				b')' | b'}' => return syntax(format!("unexpected '{}'", ch as char)),
				_ => return syntax(format!("unexpected '{}'", ch as char)),
			}
		}
		Ok(Stop::Eof)
	}

	fn parse_group(&mut self, session: &mut Session, word: &mut WordBuf, ctx: &mut Context,
	               input: &mut InputStream, ch: u8) -> ParseResult<()> {
		self.done_word(word, ctx)?;
		if ctx.top().child.body != Body::Empty {
			return syntax(format!("unexpected '{}'", ch as char));
		}
		let end = if ch == b'(' { b')' } else { b'}' };
		let mut sub = Context::new();
		if self.parse_stream(session, word, &mut sub, input, Some(end))? == Stop::Eof {
			return Err(ParseError::UnexpectedEof);
		}
		self.done_word(word, &mut sub)?;
		sub.done_pipe(Connective::Seq)?;
		let list = sub.finish()?;
		ctx.top_mut().child.body = Body::Group(Group { list: list, subshell: ch == b'(' });
		Ok(())
	}

	/// Parses the command up to `end`, runs it, and feeds its output back
	/// into the current word.
	fn command_substitution(&mut self, session: &mut Session, word: &mut WordBuf, ctx: &mut Context,
	                        input: &mut InputStream, end: u8) -> ParseResult<()> {
		let mut inner = Context::new();
		let mut inner_word = WordBuf::default();
		let replaying = mem::replace(&mut self.replaying, false);
		let stop = self.parse_stream(session, &mut inner_word, &mut inner, input, Some(end));
		self.replaying = replaying;
		if stop? == Stop::Eof {
			return Err(ParseError::UnexpectedEof);
		}
		self.done_word(&mut inner_word, &mut inner)?;
		inner.done_pipe(Connective::Seq)?;
		let list = inner.finish()?;
		let output = match expand::command_output(session, &list) {
			Ok(output) => output,
			Err(e) => {
				session::report(e);
				vec![]
			},
		};
		trace!("command substitution produced {} bytes", output.len());
		let replay_classifier = Classifier::substitution(self.classifier.ifs());
		let saved = mem::replace(&mut self.classifier, replay_classifier);
		let replaying = mem::replace(&mut self.replaying, true);
		let mut replay = InputStream::from_bytes(output);
		let r = self.parse_stream(session, word, ctx, &mut replay, None);
		self.classifier = saved;
		self.replaying = replaying;
		r.map(|_| ())
	}

	fn handle_dollar(&mut self, session: &mut Session, word: &mut WordBuf, ctx: &mut Context,
	                 input: &mut InputStream) -> ParseResult<()> {
		let mark = if word.quote { QUOTED_VAR_MARK } else { VAR_MARK };
		match input.peek() {
			Some(c) if c.is_ascii_alphabetic() || c == b'_' => {
				word.text.push(mark);
				while let Some(c) = input.peek() {
					if !(c.is_ascii_alphanumeric() || c == b'_') { break; }
					input.get();
					word.text.push(c);
				}
				word.text.push(mark);
			},
			Some(c) if c.is_ascii_digit() || b"$!?#*".contains(&c) => {
				input.get();
				word.text.extend_from_slice(&[mark, c, mark]);
			},
			Some(b'{') => {
				input.get();
				let mut name = vec![];
				loop {
					match input.get() {
						None => return Err(ParseError::UnexpectedEof),
						Some(b'}') => break,
						Some(c) => name.push(c),
					}
				}
				if name.is_empty() || name.iter().any(|&c| expand::is_mark(c)) {
					return syntax("bad substitution");
				}
				word.text.push(mark);
				word.text.extend_from_slice(&name);
				word.text.push(mark);
			},
			Some(b'(') => {
				input.get();
				self.command_substitution(session, word, ctx, input, b')')?;
			},
			Some(c) if c == b'@' || c == b'-' => {
				return syntax(format!("unhandled syntax: ${}", c as char));
			},
			_ => word.push(b'$'),
		}
		Ok(())
	}
}

/// An all-digit word right before `<` or `>` names the file descriptor.
fn redirect_opt_num(word: &mut WordBuf) -> Option<RawFd> {
	if word.nonnull || word.text.is_empty() || !word.text.iter().all(|c| c.is_ascii_digit()) {
		return None;
	}
	let fd = std::str::from_utf8(&word.text).ok()?.parse().ok()?;
	word.text.clear();
	Some(fd)
}

fn setup_redirect(ctx: &mut Context, fd: Option<RawFd>, typ: RedirectType, input: &mut InputStream) -> ParseResult<()> {
	let fd = fd.unwrap_or(typ.default_fd());
	let top = ctx.top_mut();
	if top.pending_redirect.is_some() {
		return syntax("missing redirection target");
	}
	let target = match redirect_dup_num(input)? {
		Some(target) => target,
		None => {
			top.pending_redirect = Some((fd, typ));
			return Ok(());
		},
	};
	trace!("redirect {}{} to {:?}", fd, typ.symbol(), target);
	top.child.redirects.push(Redirect { fd: fd, typ: typ, target: target });
	Ok(())
}

/// Reads a `&N` or `&-` suffix after a redirection operator.
fn redirect_dup_num(input: &mut InputStream) -> ParseResult<Option<RedirectTarget>> {
	if input.peek() != Some(b'&') {
		return Ok(None);
	}
	input.get();
	if input.peek() == Some(b'-') {
		input.get();
		return Ok(Some(RedirectTarget::Close));
	}
	let mut fd: Option<RawFd> = None;
	while let Some(c) = input.peek() {
		if !c.is_ascii_digit() { break; }
		input.get();
		fd = Some(fd.unwrap_or(0).saturating_mul(10).saturating_add((c - b'0') as RawFd));
	}
	match fd {
		Some(fd) => Ok(Some(RedirectTarget::Dup(fd))),
		None => syntax("ambiguous redirect"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(src: &str) -> ParseResult<Vec<Pipeline>> {
		let mut session = Session::new(vec![b"hush".to_vec()]);
		session.vars.unset("IFS").unwrap();
		let mut input = InputStream::from_bytes(src.as_bytes().to_vec());
		Parser::new().parse_statement(&mut session, &mut input).map(|list| list.unwrap_or_default())
	}

	fn plain(words: &[&str]) -> Vec<Arg> {
		words.iter().map(|w| Arg::Plain(w.as_bytes().to_vec())).collect()
	}

	fn group(cmd: &Command) -> &Group {
		match cmd.body {
			Body::Group(ref g) => g,
			ref other => panic!("expected group, got {:?}", other),
		}
	}

	fn is_syntax_error(src: &str) -> bool {
		parse(src).is_err()
	}

	#[test]
	fn simple_command() {
		let list = parse("echo hello  world\n").unwrap();
		assert_eq!(list.len(), 1);
		assert_eq!(list[0].commands.len(), 1);
		assert_eq!(list[0].commands[0].words(), &plain(&["echo", "hello", "world"])[..]);
		assert_eq!(list[0].connective, Connective::Seq);
		assert_eq!(list[0].reserved, Reserved::None);
	}

	#[test]
	fn connectives_and_pipes() {
		let list = parse("a && b || c & d | e; f").unwrap();
		let connectives: Vec<Connective> = list.iter().map(|p| p.connective).collect();
		assert_eq!(connectives, vec![Connective::And, Connective::Or, Connective::Background, Connective::Seq, Connective::Seq]);
		assert_eq!(list[3].commands.len(), 2);
		assert_eq!(list[3].commands[1].words(), &plain(&["e"])[..]);
	}

	#[test]
	fn statement_stops_at_newline() {
		let mut session = Session::new(vec![]);
		let mut input = InputStream::from_bytes(b"echo a\necho b\n".to_vec());
		let mut parser = Parser::new();
		let first = parser.parse_statement(&mut session, &mut input).unwrap().unwrap();
		assert_eq!(first[0].commands[0].words(), &plain(&["echo", "a"])[..]);
		let second = parser.parse_statement(&mut session, &mut input).unwrap().unwrap();
		assert_eq!(second[0].commands[0].words(), &plain(&["echo", "b"])[..]);
		assert_eq!(parser.parse_statement(&mut session, &mut input).unwrap(), None);
	}

	#[test]
	fn quoting() {
		let list = parse("echo '*' \"a  b\" \\* \"\" '$x'").unwrap();
		assert_eq!(list[0].commands[0].words(), &plain(&["echo", "*", "a  b", "*", "", "$x"])[..]);
	}

	#[test]
	fn double_quote_backslashes() {
		let list = parse("echo \"a\\$b\" \"c\\d\" \"it's\"").unwrap();
		assert_eq!(list[0].commands[0].words(), &plain(&["echo", "a$b", "c\\d", "it's"])[..]);
	}

	#[test]
	fn comments_and_continuation() {
		let list = parse("echo a \\\n b # trailing words\n").unwrap();
		assert_eq!(list[0].commands[0].words(), &plain(&["echo", "a", "b"])[..]);
		let list = parse("echo a#b").unwrap();
		assert_eq!(list[0].commands[0].words(), &plain(&["echo", "a#b"])[..]);
	}

	#[test]
	fn parameters_are_deferred() {
		let list = parse("echo $HOME \"$1\" ${x}y $?").unwrap();
		let words = list[0].commands[0].words();
		assert_eq!(words[1], Arg::Deferred { text: [&[VAR_MARK][..], b"HOME", &[VAR_MARK]].concat(), nonnull: false });
		assert_eq!(words[2], Arg::Deferred { text: vec![QUOTED_VAR_MARK, b'1', QUOTED_VAR_MARK], nonnull: true });
		assert_eq!(words[3], Arg::Deferred { text: vec![VAR_MARK, b'x', VAR_MARK, b'y'], nonnull: false });
		assert_eq!(words[4], Arg::Deferred { text: vec![VAR_MARK, b'?', VAR_MARK], nonnull: false });
	}

	#[test]
	fn lone_dollar_is_literal() {
		let list = parse("echo $ a$").unwrap();
		assert_eq!(list[0].commands[0].words(), &plain(&["echo", "$", "a$"])[..]);
	}

	#[test]
	fn redirections() {
		let list = parse("cat <in >>out 2>&1 3>&- 4<>rw <<word").unwrap();
		let redirects = &list[0].commands[0].redirects;
		assert_eq!(list[0].commands[0].words(), &plain(&["cat"])[..]);
		assert_eq!(redirects, &vec![
			Redirect { fd: 0, typ: RedirectType::Input, target: RedirectTarget::Path(Arg::Plain(b"in".to_vec())) },
			Redirect { fd: 1, typ: RedirectType::Append, target: RedirectTarget::Path(Arg::Plain(b"out".to_vec())) },
			Redirect { fd: 2, typ: RedirectType::Output, target: RedirectTarget::Dup(1) },
			Redirect { fd: 3, typ: RedirectType::Output, target: RedirectTarget::Close },
			Redirect { fd: 4, typ: RedirectType::ReadWrite, target: RedirectTarget::Path(Arg::Plain(b"rw".to_vec())) },
			Redirect { fd: 0, typ: RedirectType::HereIs, target: RedirectTarget::Path(Arg::Plain(b"word".to_vec())) },
		]);
	}

	#[test]
	fn digits_only_select_fd() {
		let list = parse("echo a2>f").unwrap();
		assert_eq!(list[0].commands[0].words(), &plain(&["echo", "a2"])[..]);
		assert_eq!(list[0].commands[0].redirects[0].fd, 1);
	}

	#[test]
	fn redirect_errors() {
		assert!(is_syntax_error("echo >"));
		assert!(is_syntax_error("echo > ; ls"));
		assert!(is_syntax_error("echo 2>&x"));
	}

	#[test]
	fn if_statement() {
		let list = parse("if true; then echo yes; elif false\nthen echo no; else echo other; fi").unwrap();
		assert_eq!(list.len(), 1);
		let g = group(&list[0].commands[0]);
		assert!(!g.subshell);
		let states: Vec<Reserved> = g.list.iter().map(|p| p.reserved).collect();
		assert_eq!(states, vec![Reserved::If, Reserved::Then, Reserved::Elif, Reserved::Then, Reserved::Else]);
		assert_eq!(g.list[1].commands[0].words(), &plain(&["echo", "yes"])[..]);
	}

	#[test]
	fn multi_line_if_is_one_statement() {
		let mut session = Session::new(vec![]);
		let mut input = InputStream::from_bytes(b"if true\nthen\n echo y\nfi\necho after\n".to_vec());
		let mut parser = Parser::new();
		let first = parser.parse_statement(&mut session, &mut input).unwrap().unwrap();
		assert_eq!(first.len(), 1);
		assert!(matches!(first[0].commands[0].body, Body::Group(_)));
		let second = parser.parse_statement(&mut session, &mut input).unwrap().unwrap();
		assert_eq!(second[0].commands[0].words(), &plain(&["echo", "after"])[..]);
	}

	#[test]
	fn for_loop() {
		let list = parse("for i in a b; do echo $i; done").unwrap();
		let g = group(&list[0].commands[0]);
		assert_eq!(g.list[0].reserved, Reserved::For);
		assert_eq!(g.list[0].commands[0].words(), &plain(&["i"])[..]);
		assert_eq!(g.list[1].reserved, Reserved::In);
		assert_eq!(g.list[1].commands[0].words(), &plain(&["a", "b"])[..]);
		assert_eq!(g.list[2].reserved, Reserved::Do);
	}

	#[test]
	fn while_and_nesting() {
		let list = parse("while false; do if true; then echo x; fi; done; echo end").unwrap();
		assert_eq!(list.len(), 2);
		let outer = group(&list[0].commands[0]);
		assert_eq!(outer.list[0].reserved, Reserved::While);
		assert_eq!(outer.list[1].reserved, Reserved::Do);
		let inner = group(&outer.list[1].commands[0]);
		assert_eq!(inner.list[0].reserved, Reserved::If);
		assert_eq!(list[1].commands[0].words(), &plain(&["echo", "end"])[..]);
	}

	#[test]
	fn reserved_words_only_at_command_start() {
		let list = parse("echo if then fi").unwrap();
		assert_eq!(list[0].commands[0].words(), &plain(&["echo", "if", "then", "fi"])[..]);
		let list = parse("\"if\"").unwrap();
		assert_eq!(list[0].commands[0].words(), &plain(&["if"])[..]);
	}

	#[test]
	fn groups() {
		let list = parse("(echo a; echo b) > out").unwrap();
		let g = group(&list[0].commands[0]);
		assert!(g.subshell);
		assert_eq!(g.list.len(), 2);
		assert_eq!(list[0].commands[0].redirects.len(), 1);
		let list = parse("{ echo a; } | cat").unwrap();
		assert!(!group(&list[0].commands[0]).subshell);
		assert_eq!(list[0].commands.len(), 2);
	}

	#[test]
	fn reserved_word_errors() {
		assert!(is_syntax_error("then echo"));
		assert!(is_syntax_error("fi"));
		assert!(is_syntax_error("if true; fi"));
		assert!(is_syntax_error("if true; then echo"));
		assert!(is_syntax_error("for i do echo; done"));
		assert!(is_syntax_error("for in a; do echo; done"));
		assert!(is_syntax_error("for a b in c; do echo; done"));
		assert!(is_syntax_error("for i in a; b; do echo; done"));
		assert!(is_syntax_error("if true; then echo; fi extra"));
	}

	#[test]
	fn other_syntax_errors() {
		assert_eq!(parse("echo 'abc"), Err(ParseError::UnexpectedEof));
		assert_eq!(parse("echo \"abc"), Err(ParseError::UnexpectedEof));
		assert!(is_syntax_error("echo )"));
		assert!(is_syntax_error("echo (a)"));
		assert!(is_syntax_error("(echo"));
		assert!(is_syntax_error("echo $@"));
		assert!(is_syntax_error("echo ${"));
		assert!(is_syntax_error("echo \\"));
	}

	#[test]
	fn assignment_words_skip_globbing() {
		let list = parse("X=* echo *.hush-none").unwrap();
		assert_eq!(list[0].commands[0].words(), &plain(&["X=*", "echo", "*.hush-none"])[..]);
	}

	#[test]
	fn syntax_error_recovery() {
		let mut session = Session::new(vec![]);
		let mut input = InputStream::from_bytes(b"echo ) junk\necho ok\n".to_vec());
		let mut parser = Parser::new();
		assert!(parser.parse_statement(&mut session, &mut input).is_err());
		input.discard_line();
		let next = parser.parse_statement(&mut session, &mut input).unwrap().unwrap();
		assert_eq!(next[0].commands[0].words(), &plain(&["echo", "ok"])[..]);
	}
}
