use std::{env,io};
use std::fs::File;
use std::io::{BufReader,Write};
use std::os::unix::ffi::{OsStrExt,OsStringExt};

use log::debug;
use nix::errno::Errno;
use nix::sys::stat::{self,Mode};
use nix::unistd;

use crate::eval;
use crate::input::InputStream;
use crate::job::{self,State};
use crate::session::{self,Session};
use crate::vars;

pub type Builtin = fn(&mut Session, &[Vec<u8>]) -> i32;

struct BuiltinCommand {
	name: &'static str,
	descr: &'static str,
	func: Builtin,
}

const BUILTINS: &[BuiltinCommand] = &[
	BuiltinCommand { name: "bg", descr: "Resume a job in the background", func: builtin_bg },
	BuiltinCommand { name: "cd", descr: "Change working directory", func: builtin_cd },
	BuiltinCommand { name: "env", descr: "Print all environment variables", func: builtin_env },
	BuiltinCommand { name: "eval", descr: "Construct and run shell command", func: builtin_eval },
	BuiltinCommand { name: "exec", descr: "Exec command, replacing this shell with the exec'd process", func: builtin_exec },
	BuiltinCommand { name: "exit", descr: "Exit from shell", func: builtin_exit },
	BuiltinCommand { name: "export", descr: "Set environment variable", func: builtin_export },
	BuiltinCommand { name: "fg", descr: "Bring job into the foreground", func: builtin_fg },
	BuiltinCommand { name: "jobs", descr: "Lists the active jobs", func: builtin_jobs },
	BuiltinCommand { name: "pwd", descr: "Print current directory", func: builtin_pwd },
	BuiltinCommand { name: "read", descr: "Input environment variable", func: builtin_read },
	BuiltinCommand { name: "readonly", descr: "Mark variables read-only", func: builtin_readonly },
	BuiltinCommand { name: "set", descr: "Set shell variables or positional parameters", func: builtin_set },
	BuiltinCommand { name: "shift", descr: "Shift positional parameters", func: builtin_shift },
	BuiltinCommand { name: "source", descr: "Source-in and run commands in a file", func: builtin_source },
	BuiltinCommand { name: "umask", descr: "Sets file creation mask", func: builtin_umask },
	BuiltinCommand { name: "unset", descr: "Unset environment variable", func: builtin_unset },
	BuiltinCommand { name: ".", descr: "Source-in and run commands in a file", func: builtin_source },
	BuiltinCommand { name: "help", descr: "List shell built-in commands", func: builtin_help },
];

pub fn match_builtin(name: &[u8]) -> Option<Builtin> {
	BUILTINS.iter().find(|b| b.name.as_bytes() == name).map(|b| b.func)
}

fn lossy(bytes: &[u8]) -> String {
	String::from_utf8_lossy(bytes).into_owned()
}

fn print_lines<I: IntoIterator<Item = Vec<u8>>>(lines: I) -> i32 {
	let stdout = io::stdout();
	let mut out = stdout.lock();
	for mut line in lines {
		line.push(b'\n');
		if out.write_all(&line).is_err() {
			return 1;
		}
	}
	match out.flush() {
		Ok(()) => 0,
		Err(_) => 1,
	}
}

fn builtin_cd(session: &mut Session, args: &[Vec<u8>]) -> i32 {
	let dir = match args.first() {
		Some(dir) => dir.clone(),
		None => match session.vars.get("HOME") {
			Some(home) => home.to_owned(),
			None => {
				session::report("cd: HOME not set");
				return 1;
			},
		},
	};
	match unistd::chdir(&dir[..]) {
		Ok(()) => {
			debug!("cd {}", lossy(&dir));
			0
		},
		Err(e) => {
			session::report(format_args!("cd: {}: {}", lossy(&dir), e.desc()));
			1
		},
	}
}

fn builtin_pwd(_: &mut Session, _: &[Vec<u8>]) -> i32 {
	match env::current_dir() {
		Ok(dir) => print_lines(vec![dir.into_os_string().into_vec()]),
		Err(e) => {
			session::report(format_args!("pwd: {}", e));
			1
		},
	}
}

fn environment_lines() -> Vec<Vec<u8>> {
	env::vars_os().map(|(k, v)| {
		let mut line = k.into_vec();
		line.push(b'=');
		line.extend_from_slice(v.as_bytes());
		line
	}).collect()
}

fn builtin_env(_: &mut Session, _: &[Vec<u8>]) -> i32 {
	print_lines(environment_lines())
}

fn builtin_export(session: &mut Session, args: &[Vec<u8>]) -> i32 {
	if args.is_empty() {
		return print_lines(environment_lines());
	}
	let mut status = 0;
	for arg in args {
		match vars::split_assignment(arg) {
			Some((name, value)) => {
				if !session.set_var(&lossy(name), value, true) {
					status = 1;
				}
			},
			None if vars::is_name(arg) => {
				// Exporting an unset name is not an error.
				session.vars.export(&lossy(arg));
			},
			None => {
				session::report(format_args!("export: {}: bad variable name", lossy(arg)));
				status = 1;
			},
		}
	}
	status
}

fn builtin_readonly(session: &mut Session, args: &[Vec<u8>]) -> i32 {
	if args.is_empty() {
		let lines = session.vars.iter()
			.filter(|v| v.readonly)
			.map(|v| [&b"readonly "[..], v.name.as_bytes(), b"=", &v.value[..]].concat());
		return print_lines(lines.collect::<Vec<_>>());
	}
	let mut status = 0;
	for arg in args {
		let (name, value) = match vars::split_assignment(arg) {
			Some((name, value)) => (lossy(name), Some(value)),
			None => (lossy(arg), None),
		};
		let ok = match value {
			Some(value) => session.set_var(&name, value, false),
			None if session.vars.lookup(&name).is_some() => true,
			None => session.set_var(&name, b"", false),
		};
		if !ok || !session.vars.set_readonly(&name) {
			status = 1;
		}
	}
	status
}

fn builtin_unset(session: &mut Session, args: &[Vec<u8>]) -> i32 {
	let mut status = 0;
	for arg in args {
		if !session.unset_var(&lossy(arg)) {
			status = 1;
		}
	}
	status
}

fn builtin_set(session: &mut Session, args: &[Vec<u8>]) -> i32 {
	let first = match args.first() {
		Some(first) => first,
		None => {
			let lines = session.vars.iter().map(|v| [v.name.as_bytes(), b"=", &v.value[..]].concat());
			return print_lines(lines.collect::<Vec<_>>());
		},
	};
	if let Some((name, value)) = vars::split_assignment(first) {
		return if session.set_var(&lossy(name), value, false) { 0 } else { 1 };
	}
	let params = if first == b"--" { &args[1 ..] } else { args };
	session.positional.truncate(1);
	session.positional.extend(params.iter().cloned());
	0
}

fn builtin_shift(session: &mut Session, args: &[Vec<u8>]) -> i32 {
	let n = match args.first() {
		Some(arg) => match std::str::from_utf8(arg).ok().and_then(|s| s.parse::<usize>().ok()) {
			Some(n) => n,
			None => {
				session::report(format_args!("shift: {}: bad number", lossy(arg)));
				return 1;
			},
		},
		None => 1,
	};
	let count = session.positional.len().saturating_sub(1);
	if n > count {
		return 1;
	}
	session.positional.drain(1 ..= n);
	0
}

fn builtin_read(session: &mut Session, args: &[Vec<u8>]) -> i32 {
	let mut line = vec![];
	let mut seen_any = false;
	let mut byte = [0u8; 1];
	loop {
		if job::checkpoint(session).is_err() {
			return 130;
		}
		match unistd::read(libc::STDIN_FILENO, &mut byte) {
			Ok(0) => break,
			Ok(_) => {
				seen_any = true;
				if byte[0] == b'\n' {
					break;
				}
				line.push(byte[0]);
			},
			Err(Errno::EINTR) => continue,
			Err(e) => {
				session::report(format_args!("read: {}", e.desc()));
				return 1;
			},
		}
	}
	if let Some(name) = args.first() {
		if !session.set_var(&lossy(name), &line, false) {
			return 1;
		}
	}
	if seen_any { 0 } else { 1 }
}

fn builtin_umask(_: &mut Session, args: &[Vec<u8>]) -> i32 {
	let arg = match args.first() {
		Some(arg) => arg,
		None => {
			let current = stat::umask(Mode::empty());
			stat::umask(current);
			return print_lines(vec![format!("{:03o}", current.bits()).into_bytes()]);
		},
	};
	match std::str::from_utf8(arg).ok().and_then(|s| u32::from_str_radix(s, 8).ok()) {
		Some(bits) if bits <= 0o777 => {
			stat::umask(Mode::from_bits_truncate(bits as libc::mode_t));
			0
		},
		_ => {
			session::report(format_args!("umask: {}: bad mask", lossy(arg)));
			1
		},
	}
}

fn builtin_exec(session: &mut Session, args: &[Vec<u8>]) -> i32 {
	if args.is_empty() {
		return 0;
	}
	eval::exec_program(session, args)
}

fn builtin_eval(session: &mut Session, args: &[Vec<u8>]) -> i32 {
	if args.is_empty() {
		return 0;
	}
	let text = args.join(&b' ');
	let mut input = InputStream::from_bytes(text);
	eval::run_stream(session, &mut input)
}

fn builtin_source(session: &mut Session, args: &[Vec<u8>]) -> i32 {
	let path = match args.first() {
		Some(path) => path,
		None => {
			session::report("source: filename argument required");
			return 1;
		},
	};
	let file = match File::open(std::ffi::OsStr::from_bytes(path)) {
		Ok(file) => file,
		Err(e) => {
			session::report(format_args!("cannot open '{}': {}", lossy(path), e));
			return 1;
		},
	};
	let mut input = InputStream::from_reader(BufReader::new(file));
	eval::run_stream(session, &mut input)
}

fn builtin_exit(session: &mut Session, args: &[Vec<u8>]) -> i32 {
	let status = match args.first() {
		None => session.last_status,
		Some(arg) => match std::str::from_utf8(arg).ok().and_then(|s| s.parse::<i32>().ok()) {
			Some(n) => n,
			None => {
				session::report(format_args!("exit: {}: numeric argument required", lossy(arg)));
				255
			},
		},
	};
	eval::exit_shell(session, status)
}

fn builtin_jobs(session: &mut Session, _: &[Vec<u8>]) -> i32 {
	let lines = session.jobs.iter().map(|job| {
		let state = if job.state() == State::Stopped { "Stopped" } else { "Running" };
		job::format_status(job.id, state, &job.text).into_bytes()
	});
	print_lines(lines.collect::<Vec<_>>())
}

/// Parses a `%N` or `N` job reference, defaulting to the latest job.
fn find_job(session: &Session, name: &str, args: &[Vec<u8>]) -> Option<usize> {
	let arg = match args.first() {
		Some(arg) => arg,
		None => {
			let last = session.jobs.last().map(|job| job.id);
			if last.is_none() {
				session::report(format_args!("{}: no current job", name));
			}
			return last;
		},
	};
	let digits = arg.strip_prefix(b"%").unwrap_or(&arg[..]);
	let id = match std::str::from_utf8(digits).ok().and_then(|s| s.parse::<usize>().ok()) {
		Some(id) => id,
		None => {
			session::report(format_args!("{}: bad argument '{}'", name, lossy(arg)));
			return None;
		},
	};
	if session.jobs.get(id).is_none() {
		session::report(format_args!("{}: {}: no such job", name, id));
		return None;
	}
	Some(id)
}

fn builtin_fg(session: &mut Session, args: &[Vec<u8>]) -> i32 {
	let id = match find_job(session, "fg", args) {
		Some(id) => id,
		None => return 1,
	};
	let mut job = match session.jobs.remove(id) {
		Some(job) => job,
		None => return 1,
	};
	debug!("fg [{}] pgrp {}", id, job.pgrp);
	if let Some(terminal) = session.terminal {
		let _ = job::tcsetpgrp(terminal.fd, job.pgrp);
	}
	match job.resume() {
		Ok(()) => {},
		Err(Errno::ESRCH) => return 0,
		Err(e) => session::report(format_args!("fg: kill (SIGCONT): {}", e.desc())),
	}
	job::wait_foreground(session, job)
}

fn builtin_bg(session: &mut Session, args: &[Vec<u8>]) -> i32 {
	let id = match find_job(session, "bg", args) {
		Some(id) => id,
		None => return 1,
	};
	let r = match session.jobs.remove(id) {
		Some(mut job) => {
			let r = job.resume();
			if r != Err(Errno::ESRCH) {
				session.jobs.insert(job);
			}
			r
		},
		None => return 1,
	};
	match r {
		Ok(()) | Err(Errno::ESRCH) => 0,
		Err(e) => {
			session::report(format_args!("bg: kill (SIGCONT): {}", e.desc()));
			1
		},
	}
}

fn builtin_help(_: &mut Session, _: &[Vec<u8>]) -> i32 {
	let mut lines = vec![vec![], b"Built-in commands:".to_vec(), b"-------------------".to_vec()];
	lines.extend(BUILTINS.iter().map(|b| format!("{}\t{}", b.name, b.descr).into_bytes()));
	lines.push(vec![]);
	print_lines(lines)
}
