use std::{env,error,ffi,fmt,io};
use std::ffi::{CString,OsStr};
use std::fs::{File,OpenOptions};
use std::io::Write;
use std::os::unix::ffi::{OsStrExt,OsStringExt};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd,IntoRawFd,OwnedFd,RawFd};

use log::{debug,trace,warn};
use nix::errno::Errno;
use nix::fcntl::{self,FcntlArg,FdFlag,OFlag};
use nix::sys::wait::waitpid;
use nix::unistd::{self,ForkResult};

use crate::builtin;
use crate::expand;
use crate::input::InputStream;
use crate::job::{self,Job,JobBuilder};
use crate::parser::Parser;
use crate::session::{self,Session};
use crate::types::*;
use crate::vars::{self,Variable};

#[derive(Debug)]
pub enum ExecError {
	Nix(nix::Error),
	Io(io::Error),
	Nul(ffi::NulError),
	Open(String, io::Error),
	AmbiguousRedirect(String),
	NotFound(String),
	CannotExec(String, nix::Error),
}

impl From<nix::Error> for ExecError {
	fn from(e: nix::Error) -> ExecError {
		ExecError::Nix(e)
	}
}

impl From<io::Error> for ExecError {
	fn from(e: io::Error) -> ExecError {
		ExecError::Io(e)
	}
}

impl From<ffi::NulError> for ExecError {
	fn from(e: ffi::NulError) -> ExecError {
		ExecError::Nul(e)
	}
}

impl fmt::Display for ExecError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			ExecError::Nix(ref e) => write!(f, "{}", e),
			ExecError::Io(ref e) => write!(f, "{}", e),
			ExecError::Nul(ref e) => write!(f, "{}", e),
			ExecError::Open(ref path, ref e) => match e.raw_os_error() {
				Some(code) => write!(f, "{}: {}", path, Errno::from_raw(code).desc()),
				None => write!(f, "{}: {}", path, e),
			},
			ExecError::AmbiguousRedirect(ref word) => write!(f, "{}: ambiguous redirect", word),
			ExecError::NotFound(ref name) => write!(f, "{}: not found", name),
			ExecError::CannotExec(ref name, ref e) => write!(f, "cannot exec '{}': {}", name, e.desc()),
		}
	}
}

impl error::Error for ExecError {
	fn source(&self) -> Option<&(dyn error::Error + 'static)> {
		match *self {
			ExecError::Nix(ref e) | ExecError::CannotExec(_, ref e) => Some(e),
			ExecError::Io(ref e) | ExecError::Open(_, ref e) => Some(e),
			ExecError::Nul(ref e) => Some(e),
			ExecError::AmbiguousRedirect(_) | ExecError::NotFound(_) => None,
		}
	}
}

impl ExecError {
	/// Exit status of a stage that failed this way.
	pub fn status(&self) -> i32 {
		match *self {
			ExecError::NotFound(_) => 127,
			ExecError::CannotExec(..) => 126,
			_ => 1,
		}
	}
}

/// Flushes buffered output and leaves a forked child without running
/// the parent's destructors.
pub fn exit_child(status: i32) -> ! {
	let _ = io::stdout().flush();
	unsafe { libc::_exit(status & 0xff) }
}

/// Terminates the shell. A forked subshell only ends itself.
pub fn exit_shell(session: &Session, status: i32) -> ! {
	if session.detached || unistd::getpid() != session.shell_pid {
		exit_child(status);
	}
	let _ = io::stdout().flush();
	job::restore_terminal();
	debug!("exit {}", status);
	std::process::exit(status & 0xff)
}

/// Copies of fds 0-2 taken before an in-process redirect, put back on drop.
struct SavedFds {
	saved: Vec<(RawFd, Option<RawFd>)>,
}

impl SavedFds {
	fn save() -> SavedFds {
		let _ = io::stdout().flush();
		let saved = (0 .. 3)
			.map(|fd| (fd, fcntl::fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(10)).ok()))
			.collect();
		SavedFds { saved: saved }
	}
}

impl Drop for SavedFds {
	fn drop(&mut self) {
		let _ = io::stdout().flush();
		for &(fd, copy) in &self.saved {
			match copy {
				Some(copy) => {
					let _ = unistd::dup2(copy, fd);
					let _ = unistd::close(copy);
				},
				None => {
					let _ = unistd::close(fd);
				},
			}
		}
	}
}

/// Moves `fd` to `target`, clearing close-on-exec when it is already there.
fn install_fd(fd: RawFd, target: RawFd) -> Result<(), ExecError> {
	if fd == target {
		fcntl::fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))?;
	} else {
		unistd::dup2(fd, target)?;
		unistd::close(fd)?;
	}
	Ok(())
}

fn redirect_word(session: &Session, target: &Arg) -> Result<Vec<u8>, ExecError> {
	match *target {
		Arg::Plain(ref path) => Ok(path.clone()),
		Arg::Deferred { ref text, nonnull } => {
			let mut words = expand::expand_word(session, text, nonnull);
			if words.len() != 1 {
				return Err(ExecError::AmbiguousRedirect(target.to_string()));
			}
			Ok(words.remove(0))
		},
	}
}

fn here_string(session: &Session, target: &Arg) -> Result<RawFd, ExecError> {
	let mut text = match *target {
		Arg::Plain(ref v) => v.clone(),
		Arg::Deferred { ref text, .. } => expand::expand_string(session, text),
	};
	text.push(b'\n');
	let (read_end, write_end) = unistd::pipe2(OFlag::O_CLOEXEC)?;
	if text.len() <= libc::PIPE_BUF {
		File::from(write_end).write_all(&text)?;
		return Ok(read_end.into_raw_fd());
	}
	// Larger than the pipe buffer: an orphaned grandchild feeds it.
	match unsafe { unistd::fork() }? {
		ForkResult::Child => {
			drop(read_end);
			if let Ok(ForkResult::Child) = unsafe { unistd::fork() } {
				let status = if File::from(write_end).write_all(&text).is_ok() { 0 } else { 1 };
				unsafe { libc::_exit(status) }
			}
			unsafe { libc::_exit(0) }
		},
		ForkResult::Parent { child } => {
			drop(write_end);
			loop {
				match waitpid(child, None) {
					Err(Errno::EINTR) => continue,
					_ => break,
				}
			}
			trace!("here-string of {} bytes handed to a writer", text.len());
			Ok(read_end.into_raw_fd())
		},
	}
}

pub fn apply_redirects(session: &Session, redirects: &[Redirect]) -> Result<(), ExecError> {
	for redirect in redirects {
		trace!("redirect fd {} {} {:?}", redirect.fd, redirect.typ.symbol(), redirect.target);
		match redirect.target {
			RedirectTarget::Close => {
				let _ = unistd::close(redirect.fd);
			},
			RedirectTarget::Dup(from) => {
				unistd::dup2(from, redirect.fd)?;
			},
			RedirectTarget::Path(ref target) if redirect.typ == RedirectType::HereIs => {
				let fd = here_string(session, target)?;
				install_fd(fd, redirect.fd)?;
			},
			RedirectTarget::Path(ref target) => {
				let path = redirect_word(session, target)?;
				let mut options = OpenOptions::new();
				let _ = match redirect.typ {
					RedirectType::Input | RedirectType::HereIs => options.read(true),
					RedirectType::Output => options.write(true).create(true).truncate(true),
					RedirectType::Append => options.append(true).create(true),
					RedirectType::ReadWrite => options.read(true).write(true),
				};
				options.mode(0o666);
				let file = options.open(OsStr::from_bytes(&path))
					.map_err(|e| ExecError::Open(String::from_utf8_lossy(&path).into_owned(), e))?;
				install_fd(file.into_raw_fd(), redirect.fd)?;
			},
		}
	}
	Ok(())
}

fn expand_args(session: &Session, words: &[Arg]) -> Vec<Vec<u8>> {
	let mut args = vec![];
	for word in words {
		match *word {
			Arg::Plain(ref v) => args.push(v.clone()),
			Arg::Deferred { ref text, nonnull } => args.extend(expand::expand_word(session, text, nonnull)),
		}
	}
	args
}

/// Splits off leading `NAME=value` words, expanding their values.
fn leading_assignments<'a>(session: &Session, words: &'a [Arg]) -> (Vec<(String, Vec<u8>)>, &'a [Arg]) {
	let mut assigns = vec![];
	let mut rest = words;
	while let Some((first, tail)) = rest.split_first() {
		let (name, value) = match vars::split_assignment(first.raw()) {
			Some(pair) => pair,
			None => break,
		};
		let value = match *first {
			Arg::Plain(_) => value.to_vec(),
			Arg::Deferred { .. } => expand::expand_string(session, value),
		};
		assigns.push((String::from_utf8_lossy(name).into_owned(), value));
		rest = tail;
	}
	(assigns, rest)
}

/// Exported assignments that only last for one in-process command.
struct TempVars {
	saved: Vec<(String, Option<Variable>)>,
}

impl TempVars {
	fn apply(session: &mut Session, assigns: &[(String, Vec<u8>)]) -> TempVars {
		let mut saved = vec![];
		for &(ref name, ref value) in assigns {
			let prev = session.vars.lookup(name).cloned();
			if session.set_var(name, value, true) {
				saved.push((name.clone(), prev));
			}
		}
		TempVars { saved: saved }
	}

	fn restore(self, session: &mut Session) {
		for (name, prev) in self.saved.into_iter().rev() {
			if !session.unset_var(&name) {
				continue;
			}
			if let Some(var) = prev {
				session.set_var(&name, &var.value, var.exported);
			}
		}
	}
}

fn exec_external(session: &mut Session, args: &[Vec<u8>]) -> ExecError {
	let name = String::from_utf8_lossy(&args[0]).into_owned();
	let path = match session.search.lookup(&args[0]) {
		Some(path) => path,
		None => return ExecError::NotFound(name),
	};
	let argv: Result<Vec<CString>, ffi::NulError> = args.iter().map(|a| CString::new(a.as_slice())).collect();
	let argv = match argv {
		Ok(argv) => argv,
		Err(e) => return e.into(),
	};
	let envp: Result<Vec<CString>, ffi::NulError> = env::vars_os()
		.map(|(mut k, v)| { k.push("="); k.push(v); CString::new(k.into_vec()) })
		.collect();
	let envp = match envp {
		Ok(envp) => envp,
		Err(e) => return e.into(),
	};
	let _ = io::stdout().flush();
	match unistd::execve(&path, &argv, &envp) {
		Err(Errno::ENOENT) => ExecError::NotFound(name),
		Err(e) => ExecError::CannotExec(name, e),
		Ok(never) => match never {},
	}
}

/// Replaces the process with the named program; returns only on failure.
pub fn exec_program(session: &mut Session, args: &[Vec<u8>]) -> i32 {
	let e = exec_external(session, args);
	session::report(&e);
	e.status()
}

fn dispatch(session: &mut Session, name: &[u8], nofork_only: bool) -> Option<builtin::Builtin> {
	if let Some(b) = builtin::match_builtin(name) {
		return Some(b);
	}
	match session.applets.find(name) {
		Some(applet) if applet.nofork || !nofork_only => Some(applet.main),
		_ => None,
	}
}

/// Body of one forked pipeline stage.
fn exec_words(session: &mut Session, words: &[Arg]) -> i32 {
	let (assigns, words) = leading_assignments(session, words);
	for &(ref name, ref value) in &assigns {
		session.set_var(name, value, true);
	}
	let args = expand_args(session, words);
	let name = match args.first() {
		Some(name) => name.clone(),
		None => return 0,
	};
	match dispatch(session, &name, false) {
		Some(entry) => entry(session, &args[1 ..]),
		None => exec_program(session, &args),
	}
}

fn run_stage(session: &mut Session, command: &Command) -> ! {
	if session.terminal.is_some() {
		job::restore_default_signals();
	}
	session.enter_subshell();
	if let Err(e) = apply_redirects(session, &command.redirects) {
		session::report(&e);
		exit_child(1);
	}
	let status = match command.body {
		Body::Empty => 0,
		Body::Group(ref group) => run_list(session, &group.list),
		Body::Words(ref words) => exec_words(session, words),
	};
	exit_child(status)
}

fn spawn_commands(session: &mut Session, pipeline: &Pipeline, builder: &mut JobBuilder) -> Result<(), ExecError> {
	let last = pipeline.commands.len() - 1;
	let mut stdin_pipe: Option<OwnedFd> = None;
	for (i, command) in pipeline.commands.iter().enumerate() {
		let (next_stdin, stdout_pipe) = if i < last {
			let (read_end, write_end) = unistd::pipe2(OFlag::O_CLOEXEC)?;
			(Some(read_end), Some(write_end))
		} else {
			(None, None)
		};
		match builder.push_fork()? {
			ForkResult::Parent { child } => {
				trace!("stage {} of '{}' is pid {}", i, pipeline.text(), child);
			},
			ForkResult::Child => {
				drop(next_stdin);
				if let Some(fd) = stdin_pipe.take() {
					if unistd::dup2(fd.as_raw_fd(), libc::STDIN_FILENO).is_err() {
						exit_child(1);
					}
				}
				if let Some(fd) = stdout_pipe {
					if unistd::dup2(fd.as_raw_fd(), libc::STDOUT_FILENO).is_err() {
						exit_child(1);
					}
				}
				run_stage(session, command);
			},
		}
		stdin_pipe = next_stdin;
	}
	Ok(())
}

fn spawn_pipeline(session: &mut Session, pipeline: &Pipeline) -> i32 {
	let background = pipeline.is_background();
	let _ = io::stdout().flush();
	let mut builder = JobBuilder::new(pipeline.commands.len(), pipeline.text(), session.terminal, !background);
	if let Err(e) = spawn_commands(session, pipeline, &mut builder) {
		session::report(&e);
	}
	if builder.is_empty() {
		return 1;
	}
	let job = builder.build();
	if background {
		let leader = job.leader();
		let text = job.text.clone();
		let id = session.jobs.insert(job);
		println!("[{}] {} {}", id, leader, text);
		session.last_bg_pid = Some(leader);
		0
	} else {
		job::wait_foreground(session, job)
	}
}

fn finish_in_process(session: &mut Session, pipeline: &Pipeline, status: i32) -> i32 {
	if session.detached {
		// The split-off half of a suspended builtin.
		exit_child(status);
	}
	match session.suspended.take() {
		Some(pid) => {
			let id = session.jobs.insert(Job::suspended(pid, pipeline.text()));
			println!("{}", job::format_status(id, "Stopped", &pipeline.text()));
			0
		},
		None => status,
	}
}

/// Runs a lone foreground command inside the shell process when it can.
fn run_in_process(session: &mut Session, pipeline: &Pipeline, command: &Command) -> Option<i32> {
	let (assigns, words) = leading_assignments(session, command.words());
	let args = expand_args(session, words);

	if args.is_empty() {
		// Redirects on their own still create or truncate their files.
		if !command.redirects.is_empty() {
			let _saved = SavedFds::save();
			if let Err(e) = apply_redirects(session, &command.redirects) {
				session::report(&e);
				return Some(1);
			}
		}
		let mut status = 0;
		for (name, value) in assigns {
			if !session.set_var(&name, &value, false) {
				status = 1;
			}
		}
		return Some(status);
	}

	if args.len() == 1 && args[0] == b"exec" && !command.redirects.is_empty() {
		debug!("applying redirects to the shell");
		return Some(match apply_redirects(session, &command.redirects) {
			Ok(()) => 0,
			Err(e) => {
				session::report(&e);
				1
			},
		});
	}

	let entry = dispatch(session, &args[0], true)?;
	let saved = if command.redirects.is_empty() { None } else { Some(SavedFds::save()) };
	if let Err(e) = apply_redirects(session, &command.redirects) {
		drop(saved);
		session::report(&e);
		return Some(1);
	}
	let temp = TempVars::apply(session, &assigns);
	let status = {
		let _cancel = job::Cancellable::arm(session);
		entry(session, &args[1 ..])
	};
	temp.restore(session);
	drop(saved);
	Some(finish_in_process(session, pipeline, status))
}

fn run_group_here(session: &mut Session, command: &Command, group: &Group) -> i32 {
	let _saved = if command.redirects.is_empty() { None } else { Some(SavedFds::save()) };
	if let Err(e) = apply_redirects(session, &command.redirects) {
		session::report(&e);
		return 1;
	}
	run_list(session, &group.list)
}

pub fn run_pipeline(session: &mut Session, pipeline: &Pipeline) -> i32 {
	if pipeline.commands.is_empty() {
		return session.last_status;
	}
	if pipeline.commands.len() == 1 && !pipeline.is_background() {
		let command = &pipeline.commands[0];
		match command.body {
			Body::Group(ref group) if !group.subshell => return run_group_here(session, command, group),
			Body::Group(_) => {},
			_ => if let Some(status) = run_in_process(session, pipeline, command) {
				return status;
			},
		}
	}
	spawn_pipeline(session, pipeline)
}

/// Splits rows into runs that share a reserved-word tag.
fn sections(list: &[Pipeline]) -> Vec<(Reserved, &[Pipeline])> {
	let mut out: Vec<(Reserved, &[Pipeline])> = vec![];
	let mut start = 0;
	for i in 1 ..= list.len() {
		if i == list.len() || list[i].reserved != list[start].reserved {
			out.push((list[start].reserved, &list[start .. i]));
			start = i;
		}
	}
	out
}

/// Plain `;`, `&&`, `||` and `&` chains.
fn run_sequence(session: &mut Session, list: &[Pipeline]) -> i32 {
	let mut status = 0;
	let mut previous = Connective::Seq;
	for pipeline in list {
		let eligible = match previous {
			Connective::Seq | Connective::Background => true,
			Connective::And => status == 0,
			Connective::Or => status != 0,
		};
		if eligible {
			status = run_pipeline(session, pipeline);
			session.last_status = status;
			job::reap(session);
		}
		previous = pipeline.connective;
	}
	status
}

fn run_if(session: &mut Session, list: &[Pipeline]) -> i32 {
	let sections = sections(list);
	let mut i = 0;
	while i < sections.len() {
		match sections[i] {
			(Reserved::If, rows) | (Reserved::Elif, rows) => {
				let body = match sections.get(i + 1) {
					Some(&(Reserved::Then, body)) => body,
					_ => &[],
				};
				if run_sequence(session, rows) == 0 {
					return if body.is_empty() { 0 } else { run_sequence(session, body) };
				}
				i += 2;
			},
			(Reserved::Else, rows) => return run_sequence(session, rows),
			_ => i += 1,
		}
	}
	0
}

fn rows_tagged(list: &[Pipeline], tag: Reserved) -> &[Pipeline] {
	sections(list).into_iter().find(|&(t, _)| t == tag).map_or(&[][..], |(_, rows)| rows)
}

fn run_for(session: &mut Session, list: &[Pipeline]) -> i32 {
	let name = match list[0].commands.first().map(|c| c.words()) {
		Some([Arg::Plain(name)]) => String::from_utf8_lossy(name).into_owned(),
		_ => return 1,
	};
	let mut values = vec![];
	for row in rows_tagged(list, Reserved::In) {
		for command in &row.commands {
			values.extend(expand_args(session, command.words()));
		}
	}
	let body = rows_tagged(list, Reserved::Do);
	let mut status = 0;
	for value in values {
		if !session.set_var(&name, &value, false) {
			return 1;
		}
		status = run_sequence(session, body);
		if session.interrupted {
			break;
		}
	}
	status
}

fn run_loop(session: &mut Session, list: &[Pipeline]) -> i32 {
	let until = list[0].reserved == Reserved::Until;
	let condition = rows_tagged(list, list[0].reserved);
	let body = rows_tagged(list, Reserved::Do);
	let mut status = 0;
	loop {
		let test = run_sequence(session, condition);
		if session.interrupted || (test == 0) == until {
			break;
		}
		status = run_sequence(session, body);
		if session.interrupted {
			break;
		}
	}
	status
}

/// Runs a parsed list, dispatching compound constructs on their first row.
pub fn run_list(session: &mut Session, list: &[Pipeline]) -> i32 {
	match list.first().map(|p| p.reserved) {
		None => 0,
		Some(Reserved::If) => run_if(session, list),
		Some(Reserved::For) => run_for(session, list),
		Some(Reserved::While) | Some(Reserved::Until) => run_loop(session, list),
		Some(_) => run_sequence(session, list),
	}
}

/// Reads and runs statements until the input is exhausted.
pub fn run_stream(session: &mut Session, input: &mut InputStream) -> i32 {
	let mut parser = Parser::new();
	loop {
		if input.is_interactive() {
			job::reap(session);
			let (primary, continuation) = session.prompts();
			input.begin_statement(primary, continuation);
		}
		match parser.parse_statement(session, input) {
			Ok(None) => break,
			Ok(Some(list)) => {
				trace!("statement: {:?}", list);
				if session.fake {
					continue;
				}
				session.interrupted = false;
				run_list(session, &list);
			},
			Err(e) => {
				warn!("discarding statement: {}", e);
				session::report(&e);
				input.discard_line();
				session.last_status = 2;
				session.saw_syntax_error = true;
			},
		}
	}
	session.last_status
}
