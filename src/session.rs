use std::{env,fmt,io};
use std::io::Write;
use std::os::unix::io::RawFd;

use nix::unistd::{self,Pid};

use crate::applet::{AppletDispatch,AppletTable};
use crate::classifier::DEFAULT_IFS;
use crate::job::JobTable;
use crate::search::SearchCache;
use crate::vars::VarStore;

const VERSION_VAR: &str = "HUSH_VERSION";
const VERSION: &[u8] = b"0.01";
const DEFAULT_PS2: &str = "> ";

/// Writes `hush: MSG` to standard error.
pub fn report<T: fmt::Display>(msg: T) {
	let mut stderr = io::stderr();
	let _ = writeln!(stderr, "hush: {}", msg);
	let _ = stderr.flush();
}

/// The controlling terminal when running interactively.
#[derive(Debug, Clone, Copy)]
pub struct Terminal {
	pub fd: RawFd,
	pub shell_pgrp: Pid,
}

/// All interpreter state. Forked children get their own copy.
pub struct Session {
	pub vars: VarStore,
	pub jobs: JobTable,
	pub search: SearchCache,
	pub applets: Box<dyn AppletDispatch>,
	/// `$0` followed by `$1`, `$2`, ...
	pub positional: Vec<Vec<u8>>,
	pub last_status: i32,
	pub last_bg_pid: Option<Pid>,
	pub shell_pid: Pid,
	pub terminal: Option<Terminal>,
	/// Parse but never execute.
	pub fake: bool,
	pub saw_syntax_error: bool,
	/// Set when a foreground job died of SIGINT; loops stop on it.
	pub interrupted: bool,
	/// True in a child split off from a suspended in-process builtin.
	pub detached: bool,
	/// Set by a builtin that was suspended and moved into a child.
	pub suspended: Option<Pid>,
}

impl Session {
	pub fn new(positional: Vec<Vec<u8>>) -> Session {
		let mut vars = VarStore::from_environment();
		if vars.set(VERSION_VAR, VERSION, true).is_ok() {
			vars.set_readonly(VERSION_VAR);
		}
		Session {
			vars: vars,
			jobs: JobTable::new(),
			search: SearchCache::new(),
			applets: Box::new(AppletTable::new()),
			positional: positional,
			last_status: 0,
			last_bg_pid: None,
			shell_pid: unistd::getpid(),
			terminal: None,
			fake: false,
			saw_syntax_error: false,
			interrupted: false,
			detached: false,
			suspended: None,
		}
	}

	pub fn ifs(&self) -> Vec<u8> {
		match self.vars.get("IFS") {
			Some(ifs) => ifs.to_owned(),
			None => DEFAULT_IFS.to_owned(),
		}
	}

	/// Assigns a variable, reporting a rejected assignment.
	pub fn set_var(&mut self, name: &str, value: &[u8], export: bool) -> bool {
		if let Err(e) = self.vars.set(name, value, export) {
			report(e);
			return false;
		}
		if name == "PATH" {
			self.search.clear();
		}
		true
	}

	pub fn unset_var(&mut self, name: &str) -> bool {
		if let Err(e) = self.vars.unset(name) {
			report(e);
			return false;
		}
		if name == "PATH" {
			self.search.clear();
		}
		true
	}

	/// Primary and continuation prompt strings.
	pub fn prompts(&self) -> (String, String) {
		let primary = match self.vars.get("PS1") {
			Some(ps1) => String::from_utf8_lossy(ps1).into_owned(),
			None => {
				let cwd = env::current_dir().map(|p| p.display().to_string()).unwrap_or_default();
				let sign = if unistd::geteuid().is_root() { '#' } else { '$' };
				format!("{} {} ", cwd, sign)
			},
		};
		let continuation = match self.vars.get("PS2") {
			Some(ps2) => String::from_utf8_lossy(ps2).into_owned(),
			None => DEFAULT_PS2.to_owned(),
		};
		(primary, continuation)
	}

	/// Process group that owns the terminal between jobs.
	pub fn shell_pgrp(&self) -> Pid {
		self.terminal.map_or(self.shell_pid, |t| t.shell_pgrp)
	}

	/// Adjusts a freshly forked copy: no terminal control and no job table.
	pub fn enter_subshell(&mut self) {
		self.terminal = None;
		self.jobs = JobTable::new();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn version_is_readonly() {
		let mut session = Session::new(vec![b"hush".to_vec()]);
		assert_eq!(session.vars.get("HUSH_VERSION"), Some(&b"0.01"[..]));
		assert!(!session.set_var("HUSH_VERSION", b"9", false));
		assert_eq!(session.vars.get("HUSH_VERSION"), Some(&b"0.01"[..]));
	}

	#[test]
	fn ifs_default_and_override() {
		let mut session = Session::new(vec![]);
		session.vars.unset("IFS").unwrap();
		assert_eq!(session.ifs(), b" \t\n".to_vec());
		assert!(session.set_var("IFS", b":", false));
		assert_eq!(session.ifs(), b":".to_vec());
	}

	#[test]
	fn prompts_follow_variables() {
		let mut session = Session::new(vec![]);
		session.set_var("PS1", b"hush% ", false);
		session.set_var("PS2", b"..", false);
		assert_eq!(session.prompts(), ("hush% ".to_owned(), "..".to_owned()));
	}
}
