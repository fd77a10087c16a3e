use std::io;
use std::io::BufRead;

use log::debug;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// Line-editing provider: prompt in, one line out, `None` at end of input.
pub trait LineEditor {
	fn read_line(&mut self, prompt: &str) -> Option<String>;
}

pub struct Rustyline {
	editor: DefaultEditor,
}

impl Rustyline {
	pub fn new() -> rustyline::Result<Rustyline> {
		Ok(Rustyline { editor: DefaultEditor::new()? })
	}
}

impl LineEditor for Rustyline {
	fn read_line(&mut self, prompt: &str) -> Option<String> {
		match self.editor.readline(prompt) {
			Ok(line) => {
				if !line.trim().is_empty() {
					let _ = self.editor.add_history_entry(line.as_str());
				}
				Some(line)
			},
			// Ctrl-C abandons the line being typed.
			Err(ReadlineError::Interrupted) => Some(String::new()),
			Err(ReadlineError::Eof) => None,
			Err(e) => {
				debug!("line editor failed: {}", e);
				None
			},
		}
	}
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Prompt { Primary, Continuation }

enum Source {
	Bytes { data: Vec<u8>, pos: usize },
	Reader(Box<dyn BufRead>),
	Interactive { editor: Box<dyn LineEditor>, line: Vec<u8>, pos: usize },
}

/// Pull source of bytes with one byte of lookahead.
pub struct InputStream {
	source: Source,
	peeked: Option<Option<u8>>,
	last: Option<u8>,
	prompt: Prompt,
	prompts: [String; 2],
}

impl InputStream {
	fn with_source(source: Source) -> InputStream {
		InputStream {
			source: source,
			peeked: None,
			last: None,
			prompt: Prompt::Primary,
			prompts: [String::new(), String::new()],
		}
	}

	pub fn from_bytes(data: Vec<u8>) -> InputStream {
		InputStream::with_source(Source::Bytes { data: data, pos: 0 })
	}

	pub fn from_reader<R: BufRead + 'static>(reader: R) -> InputStream {
		InputStream::with_source(Source::Reader(Box::new(reader)))
	}

	pub fn interactive(editor: Box<dyn LineEditor>) -> InputStream {
		InputStream::with_source(Source::Interactive { editor: editor, line: vec![], pos: 0 })
	}

	pub fn is_interactive(&self) -> bool {
		match self.source {
			Source::Interactive { .. } => true,
			_ => false,
		}
	}

	/// Called at the start of every top-level statement.
	pub fn begin_statement(&mut self, primary: String, continuation: String) {
		self.prompt = Prompt::Primary;
		self.prompts = [primary, continuation];
	}

	fn fetch(&mut self) -> Option<u8> {
		match self.source {
			Source::Bytes { ref data, ref mut pos } => {
				let c = data.get(*pos).cloned();
				if c.is_some() { *pos += 1; }
				c
			},
			Source::Reader(ref mut reader) => loop {
				match reader.fill_buf() {
					Ok(buf) => {
						let c = buf.first().cloned();
						if c.is_some() { reader.consume(1); }
						return c;
					},
					Err(e) => if e.kind() != io::ErrorKind::Interrupted {
						debug!("input read failed: {}", e);
						return None;
					},
				}
			},
			Source::Interactive { ref mut editor, ref mut line, ref mut pos } => {
				if *pos >= line.len() {
					let prompt = match self.prompt {
						Prompt::Primary => &self.prompts[0],
						Prompt::Continuation => &self.prompts[1],
					};
					let text = editor.read_line(prompt)?;
					self.prompt = Prompt::Continuation;
					*line = text.into_bytes();
					line.push(b'\n');
					*pos = 0;
				}
				let c = line[*pos];
				*pos += 1;
				Some(c)
			},
		}
	}

	/// Consumes the next byte; `None` is end of input.
	pub fn get(&mut self) -> Option<u8> {
		let c = match self.peeked.take() {
			Some(c) => c,
			None => self.fetch(),
		};
		if c.is_some() { self.last = c; }
		c
	}

	pub fn peek(&mut self) -> Option<u8> {
		if let Some(c) = self.peeked {
			return c;
		}
		let c = self.fetch();
		self.peeked = Some(c);
		c
	}

	/// Drops the remainder of the current line after a syntax error.
	pub fn discard_line(&mut self) {
		if self.last == Some(b'\n') {
			return;
		}
		while let Some(c) = self.get() {
			if c == b'\n' { break; }
		}
	}
}
