//! Commands that are built into the binary but behave like external
//! programs. No-fork applets run inside the shell process when they are a
//! lone foreground command; otherwise they run in a forked child.

use std::io::{self,Write};

use crate::job;
use crate::session::Session;

pub type AppletMain = fn(&mut Session, &[Vec<u8>]) -> i32;

#[derive(Clone, Copy)]
pub struct Applet {
	pub name: &'static str,
	/// Safe to run in the shell process itself.
	pub nofork: bool,
	pub main: AppletMain,
}

pub trait AppletDispatch {
	fn find(&self, name: &[u8]) -> Option<Applet>;
}

fn applet_echo(session: &mut Session, args: &[Vec<u8>]) -> i32 {
	let (newline, args) = match args.first() {
		Some(first) if first == b"-n" => (false, &args[1 ..]),
		_ => (true, args),
	};
	let stdout = io::stdout();
	for (i, arg) in args.iter().enumerate() {
		if job::checkpoint(session).is_err() {
			return 130;
		}
		let mut out = stdout.lock();
		if i > 0 && out.write_all(b" ").is_err() {
			return 1;
		}
		if out.write_all(arg).is_err() {
			return 1;
		}
	}
	let mut out = stdout.lock();
	if newline && out.write_all(b"\n").is_err() {
		return 1;
	}
	match out.flush() {
		Ok(()) => 0,
		Err(_) => 1,
	}
}

fn applet_true(_: &mut Session, _: &[Vec<u8>]) -> i32 {
	0
}

fn applet_false(_: &mut Session, _: &[Vec<u8>]) -> i32 {
	1
}

const APPLETS: &[Applet] = &[
	Applet { name: "echo", nofork: true, main: applet_echo },
	Applet { name: "false", nofork: true, main: applet_false },
	Applet { name: "true", nofork: true, main: applet_true },
];

/// The applets compiled into this binary.
#[derive(Debug, Default)]
pub struct AppletTable;

impl AppletTable {
	pub fn new() -> AppletTable {
		AppletTable
	}
}

impl AppletDispatch for AppletTable {
	fn find(&self, name: &[u8]) -> Option<Applet> {
		APPLETS.iter().find(|a| a.name.as_bytes() == name).copied()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn table_lookup() {
		let table = AppletTable::new();
		let echo = table.find(b"echo").expect("echo applet");
		assert!(echo.nofork);
		assert!(table.find(b"cat").is_none());
	}

	#[test]
	fn true_and_false() {
		let mut session = Session::new(vec![]);
		let table = AppletTable::new();
		assert_eq!(table.find(b"true").map(|a| (a.main)(&mut session, &[])), Some(0));
		assert_eq!(table.find(b"false").map(|a| (a.main)(&mut session, &[])), Some(1));
	}
}
