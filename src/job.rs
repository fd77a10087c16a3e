use std::io::{self,Write};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32,Ordering};

use log::{debug,trace,warn};
use nix::errno::Errno;
use nix::sys::signal::{self,SaFlags,SigAction,SigHandler,SigSet,Signal};
use nix::sys::wait::{waitpid,WaitPidFlag,WaitStatus};
use nix::unistd::{self,ForkResult,Pid};

use crate::session::{self,Session,Terminal};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum State { Active, Stopped, Terminated }

pub trait WaitStatusExt {
	fn state(self) -> State;
	/// Shell exit status: the exit code, or 128 plus the signal number.
	fn code(self) -> i32;
}

impl WaitStatusExt for WaitStatus {
	fn state(self) -> State {
		match self {
			WaitStatus::Exited(..) | WaitStatus::Signaled(..) => State::Terminated,
			WaitStatus::Continued(..) | WaitStatus::StillAlive => State::Active,
			_ => State::Stopped,
		}
	}

	fn code(self) -> i32 {
		match self {
			WaitStatus::Exited(_, code) => code,
			WaitStatus::Signaled(_, sig, _) => 128 + sig as i32,
			_ => 0,
		}
	}
}

pub fn tcsetpgrp(fd: RawFd, pgrp: Pid) -> nix::Result<()> {
	Errno::result(unsafe { libc::tcsetpgrp(fd, pgrp.as_raw()) }).map(drop)
}

pub fn tcgetpgrp(fd: RawFd) -> nix::Result<Pid> {
	Errno::result(unsafe { libc::tcgetpgrp(fd) }).map(Pid::from_raw)
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Process {
	pub pid: Pid,
	pub status: WaitStatus,
}

#[derive(Debug)]
pub struct Job {
	/// Job number, assigned when the job enters the table.
	pub id: usize,
	pub pgrp: Pid,
	/// True when the processes were put in their own process group.
	pub own_group: bool,
	pub processes: Vec<Process>,
	pub text: String,
}

impl Job {
	/// A builtin that was stopped and split off into process `pid`.
	pub fn suspended(pid: Pid, text: String) -> Job {
		Job {
			id: 0,
			pgrp: pid,
			own_group: true,
			processes: vec![Process { pid: pid, status: WaitStatus::Stopped(pid, Signal::SIGTSTP) }],
			text: text,
		}
	}

	pub fn state(&self) -> State {
		self.processes.iter().map(|pr| pr.status.state()).min().unwrap_or(State::Terminated)
	}

	/// Status of the rightmost stage that has terminated, 0 if none has.
	pub fn exit_code(&self) -> i32 {
		self.processes.iter().rev()
			.find(|pr| pr.status.state() == State::Terminated)
			.map_or(0, |pr| pr.status.code())
	}

	pub fn interrupted(&self) -> bool {
		self.processes.iter().any(|pr| match pr.status {
			WaitStatus::Signaled(_, Signal::SIGINT, _) => true,
			_ => false,
		})
	}

	fn update(&mut self, pid: Pid, status: WaitStatus) -> bool {
		match self.processes.iter_mut().find(|pr| pr.pid == pid) {
			Some(pr) => {
				trace!("job [{}] pid {} -> {:?}", self.id, pid, status);
				pr.status = status;
				true
			},
			None => false,
		}
	}

	/// Sends SIGCONT and marks the stopped stages running again.
	pub fn resume(&mut self) -> nix::Result<()> {
		if self.own_group {
			signal::killpg(self.pgrp, Signal::SIGCONT)?;
		} else {
			for pr in self.processes.iter().filter(|pr| pr.status.state() != State::Terminated) {
				signal::kill(pr.pid, Signal::SIGCONT)?;
			}
		}
		for pr in self.processes.iter_mut() {
			if pr.status.state() == State::Stopped {
				pr.status = WaitStatus::StillAlive;
			}
		}
		Ok(())
	}

	pub fn leader(&self) -> Pid {
		self.processes.first().map_or(self.pgrp, |pr| pr.pid)
	}
}

pub fn format_status(id: usize, status: &str, text: &str) -> String {
	format!("[{}] {:<22} {:.40}", id, status, text)
}

fn announce(line: String) {
	let mut stdout = io::stdout();
	let _ = writeln!(stdout, "{}", line);
	let _ = stdout.flush();
}

#[derive(Debug)]
pub struct JobBuilder {
	imp: Job,
	terminal: Option<Terminal>,
	foreground: bool,
}

impl JobBuilder {
	pub fn new(size_hint: usize, text: String, terminal: Option<Terminal>, foreground: bool) -> JobBuilder {
		JobBuilder {
			imp: Job {
				id: 0,
				pgrp: Pid::from_raw(0),
				own_group: terminal.is_some(),
				processes: Vec::with_capacity(size_hint),
				text: text,
			},
			terminal: terminal,
			foreground: foreground,
		}
	}

	pub fn push_fork(&mut self) -> nix::Result<ForkResult> {
		let job = &mut self.imp;
		let first = job.processes.is_empty();

		let r = unsafe { unistd::fork() }?;
		match r {
			ForkResult::Parent { child: pid } => {
				if first {
					job.pgrp = pid;
				}
				if job.own_group {
					let _ = unistd::setpgid(pid, job.pgrp);
				}
				job.processes.push(Process { pid: pid, status: WaitStatus::StillAlive });
			},
			ForkResult::Child => {
				if let Some(terminal) = self.terminal {
					let pgrp = if first { Pid::from_raw(0) } else { job.pgrp };
					let _ = unistd::setpgid(Pid::from_raw(0), pgrp);
					if self.foreground {
						let _ = tcsetpgrp(terminal.fd, unistd::getpgrp());
					}
				}
			},
		}
		Ok(r)
	}

	pub fn is_empty(&self) -> bool {
		self.imp.processes.is_empty()
	}

	pub fn build(self) -> Job {
		debug!("job spawned: pgrp {} pids {:?}", self.imp.pgrp,
		       self.imp.processes.iter().map(|pr| pr.pid.as_raw()).collect::<Vec<_>>());
		self.imp
	}
}

/// Background and stopped jobs, in the order they were created.
#[derive(Debug, Default)]
pub struct JobTable {
	jobs: Vec<Job>,
}

impl JobTable {
	pub fn new() -> JobTable {
		JobTable { jobs: vec![] }
	}

	/// Adds a job under the smallest unused job number and returns it.
	pub fn insert(&mut self, mut job: Job) -> usize {
		let id = (1 ..).find(|id| self.jobs.iter().all(|j| j.id != *id)).unwrap_or(1);
		job.id = id;
		debug!("job [{}] registered: {}", id, job.text);
		self.jobs.push(job);
		id
	}

	pub fn get(&self, id: usize) -> Option<&Job> {
		self.jobs.iter().find(|j| j.id == id)
	}

	pub fn remove(&mut self, id: usize) -> Option<Job> {
		let idx = self.jobs.iter().position(|j| j.id == id)?;
		Some(self.jobs.remove(idx))
	}

	/// The most recently created job.
	pub fn last(&self) -> Option<&Job> {
		self.jobs.last()
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Job> {
		self.jobs.iter()
	}

	pub fn is_empty(&self) -> bool {
		self.jobs.is_empty()
	}

	fn update(&mut self, pid: Pid, status: WaitStatus) -> bool {
		self.jobs.iter_mut().any(|job| job.update(pid, status))
	}

	fn take_finished(&mut self) -> Vec<Job> {
		let (done, alive): (Vec<Job>, Vec<Job>) = std::mem::take(&mut self.jobs).into_iter()
			.partition(|job| job.state() == State::Terminated);
		self.jobs = alive;
		done
	}
}

fn give_terminal(session: &Session, pgrp: Pid) {
	if let Some(terminal) = session.terminal {
		if let Err(e) = tcsetpgrp(terminal.fd, pgrp) {
			warn!("tcsetpgrp({}): {}", pgrp, e);
		}
	}
}

/// Hands the terminal to `job` and waits until every stage has exited or
/// the whole job has stopped. A stopped job moves into the job table.
pub fn wait_foreground(session: &mut Session, mut job: Job) -> i32 {
	give_terminal(session, job.pgrp);
	loop {
		match job.state() {
			State::Terminated => {
				if job.interrupted() {
					session.interrupted = true;
				}
				give_terminal(session, session.shell_pgrp());
				return job.exit_code();
			},
			State::Stopped => {
				let code = job.exit_code();
				let text = job.text.clone();
				let id = session.jobs.insert(job);
				announce(format_status(id, "Stopped", &text));
				give_terminal(session, session.shell_pgrp());
				return code;
			},
			State::Active => {},
		}
		match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WUNTRACED)) {
			Ok(status) => {
				let pid = match status.pid() {
					Some(pid) => pid,
					None => continue,
				};
				if !job.update(pid, status) && !session.jobs.update(pid, status) {
					trace!("reaped unknown child {}", pid);
				}
			},
			Err(Errno::EINTR) => continue,
			Err(e) => {
				// Nothing left to wait for; treat the stragglers as gone.
				warn!("waitpid: {}", e);
				for pr in job.processes.iter_mut().filter(|pr| pr.status.state() != State::Terminated) {
					pr.status = WaitStatus::Exited(pr.pid, 0);
				}
			},
		}
	}
}

/// Collects status changes without blocking and reports finished jobs.
pub fn reap(session: &mut Session) {
	if session.jobs.is_empty() {
		return;
	}
	loop {
		match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED)) {
			Ok(WaitStatus::StillAlive) => break,
			Ok(status) => {
				if let Some(pid) = status.pid() {
					session.jobs.update(pid, status);
				}
			},
			Err(Errno::EINTR) => continue,
			Err(_) => break,
		}
	}
	for job in session.jobs.take_finished() {
		debug!("job [{}] finished", job.id);
		announce(format_status(job.id, "Done", &job.text));
	}
}

const FATAL_SIGNALS: [Signal; 9] = [
	Signal::SIGILL, Signal::SIGTRAP, Signal::SIGABRT, Signal::SIGFPE, Signal::SIGBUS,
	Signal::SIGSEGV, Signal::SIGHUP, Signal::SIGPIPE, Signal::SIGALRM,
];
const JOBCTRL_SIGNALS: [Signal; 3] = [Signal::SIGTSTP, Signal::SIGTTIN, Signal::SIGTTOU];
const INTERACTIVE_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGQUIT, Signal::SIGTERM];

// Read from signal handlers.
static TERMINAL_FD: AtomicI32 = AtomicI32::new(-1);
static SAVED_PGRP: AtomicI32 = AtomicI32::new(0);
static PENDING_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Gives the terminal back to whoever owned it before the shell started.
pub fn restore_terminal() {
	let fd = TERMINAL_FD.load(Ordering::SeqCst);
	let pgrp = SAVED_PGRP.load(Ordering::SeqCst);
	if fd >= 0 && pgrp > 0 {
		unsafe { libc::tcsetpgrp(fd, pgrp); }
	}
}

extern "C" fn sigexit(sig: libc::c_int) {
	restore_terminal();
	unsafe {
		libc::signal(sig, libc::SIG_DFL);
		libc::raise(sig);
		libc::_exit(128 + sig);
	}
}

fn set_handlers(signals: &[Signal], handler: SigHandler) {
	for &sig in signals {
		if let Err(e) = unsafe { signal::signal(sig, handler) } {
			warn!("signal({:?}): {}", sig, e);
		}
	}
}

/// Takes over the controlling terminal for an interactive session.
pub fn setup_job_control() -> nix::Result<Terminal> {
	loop {
		let fg = tcgetpgrp(libc::STDIN_FILENO)?;
		let own = unistd::getpgrp();
		if fg == own {
			break;
		}
		signal::killpg(own, Signal::SIGTTIN)?;
	}
	let fd = Errno::result(unsafe { libc::fcntl(libc::STDIN_FILENO, libc::F_DUPFD_CLOEXEC, 255) })?;
	let saved = tcgetpgrp(fd)?;
	TERMINAL_FD.store(fd, Ordering::SeqCst);
	SAVED_PGRP.store(saved.as_raw(), Ordering::SeqCst);

	set_handlers(&JOBCTRL_SIGNALS, SigHandler::SigIgn);
	set_handlers(&INTERACTIVE_SIGNALS, SigHandler::SigIgn);
	set_handlers(&FATAL_SIGNALS, SigHandler::Handler(sigexit));

	let pid = unistd::getpid();
	// Fails for a session leader, which already leads its own group.
	let _ = unistd::setpgid(pid, pid);
	let pgrp = unistd::getpgrp();
	tcsetpgrp(fd, pgrp)?;
	debug!("job control on fd {}: shell pgrp {}, saved pgrp {}", fd, pgrp, saved);
	Ok(Terminal { fd: fd, shell_pgrp: pgrp })
}

/// Resets every signal the interactive shell changed; used in children.
pub fn restore_default_signals() {
	set_handlers(&JOBCTRL_SIGNALS, SigHandler::SigDfl);
	set_handlers(&INTERACTIVE_SIGNALS, SigHandler::SigDfl);
	set_handlers(&FATAL_SIGNALS, SigHandler::SigDfl);
}

extern "C" fn note_signal(sig: libc::c_int) {
	PENDING_SIGNAL.store(sig, Ordering::SeqCst);
}

/// The running builtin must stop at once.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Cancelled;

/// While alive, Ctrl-C and Ctrl-Z are recorded for `checkpoint` instead of
/// being ignored. Only armed on an interactive terminal.
pub struct Cancellable {
	armed: bool,
}

impl Cancellable {
	pub fn arm(session: &Session) -> Cancellable {
		PENDING_SIGNAL.store(0, Ordering::SeqCst);
		if session.terminal.is_none() || session.detached {
			return Cancellable { armed: false };
		}
		// No SA_RESTART, so a blocking read returns EINTR.
		let action = SigAction::new(SigHandler::Handler(note_signal), SaFlags::empty(), SigSet::empty());
		for &sig in &[Signal::SIGINT, Signal::SIGTSTP] {
			if let Err(e) = unsafe { signal::sigaction(sig, &action) } {
				warn!("sigaction({:?}): {}", sig, e);
			}
		}
		Cancellable { armed: true }
	}
}

impl Drop for Cancellable {
	fn drop(&mut self) {
		if self.armed {
			set_handlers(&[Signal::SIGINT, Signal::SIGTSTP], SigHandler::SigIgn);
		}
		PENDING_SIGNAL.store(0, Ordering::SeqCst);
	}
}

/// Suspension point for in-process builtins.
///
/// Ctrl-C cancels the builtin. Ctrl-Z splits the rest of the builtin off
/// into a stopped child process: the child returns `Ok` and carries on once
/// continued, while the parent records the child in `session.suspended` and
/// gets `Err(Cancelled)`.
pub fn checkpoint(session: &mut Session) -> Result<(), Cancelled> {
	match PENDING_SIGNAL.swap(0, Ordering::SeqCst) {
		libc::SIGINT => {
			debug!("builtin interrupted");
			Err(Cancelled)
		},
		libc::SIGTSTP => {
			let _ = io::stdout().flush();
			match unsafe { unistd::fork() } {
				Ok(ForkResult::Child) => {
					let _ = unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0));
					restore_default_signals();
					let _ = signal::raise(Signal::SIGTSTP);
					session.enter_subshell();
					session.detached = true;
					Ok(())
				},
				Ok(ForkResult::Parent { child }) => {
					let _ = unistd::setpgid(child, child);
					debug!("builtin suspended into pid {}", child);
					session.suspended = Some(child);
					Err(Cancelled)
				},
				Err(e) => {
					session::report(format_args!("fork: {}", e));
					Err(Cancelled)
				},
			}
		},
		_ => Ok(()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn job(statuses: &[WaitStatus]) -> Job {
		Job {
			id: 0,
			pgrp: Pid::from_raw(100),
			own_group: false,
			processes: statuses.iter().enumerate()
				.map(|(i, &s)| Process { pid: Pid::from_raw(100 + i as i32), status: s })
				.collect(),
			text: "a | b".to_owned(),
		}
	}

	#[test]
	fn job_state_is_least_advanced_stage() {
		let p = Pid::from_raw(100);
		let q = Pid::from_raw(101);
		assert_eq!(job(&[WaitStatus::Exited(p, 0), WaitStatus::StillAlive]).state(), State::Active);
		assert_eq!(job(&[WaitStatus::Exited(p, 0), WaitStatus::Stopped(q, Signal::SIGTSTP)]).state(), State::Stopped);
		assert_eq!(job(&[WaitStatus::Exited(p, 0), WaitStatus::Exited(q, 1)]).state(), State::Terminated);
	}

	#[test]
	fn exit_code_comes_from_rightmost_finished_stage() {
		let p = Pid::from_raw(100);
		let q = Pid::from_raw(101);
		assert_eq!(job(&[WaitStatus::Exited(p, 3), WaitStatus::Exited(q, 1)]).exit_code(), 1);
		assert_eq!(job(&[WaitStatus::Exited(p, 3), WaitStatus::Stopped(q, Signal::SIGTSTP)]).exit_code(), 3);
		assert_eq!(job(&[WaitStatus::StillAlive, WaitStatus::Stopped(q, Signal::SIGTSTP)]).exit_code(), 0);
		let killed = job(&[WaitStatus::Exited(p, 0), WaitStatus::Signaled(q, Signal::SIGINT, false)]);
		assert_eq!(killed.exit_code(), 130);
		assert!(killed.interrupted());
	}

	#[test]
	fn job_numbers_reuse_smallest_free_slot() {
		let mut table = JobTable::new();
		assert_eq!(table.insert(job(&[WaitStatus::StillAlive])), 1);
		assert_eq!(table.insert(job(&[WaitStatus::StillAlive])), 2);
		assert_eq!(table.insert(job(&[WaitStatus::StillAlive])), 3);
		assert!(table.remove(2).is_some());
		assert_eq!(table.insert(job(&[WaitStatus::StillAlive])), 2);
		assert_eq!(table.last().map(|j| j.id), Some(2));
		assert_eq!(table.iter().map(|j| j.id).collect::<Vec<_>>(), vec![1, 3, 2]);
	}

	#[test]
	fn finished_jobs_leave_the_table() {
		let mut table = JobTable::new();
		table.insert(job(&[WaitStatus::StillAlive]));
		table.insert(job(&[WaitStatus::StillAlive]));
		assert!(table.update(Pid::from_raw(100), WaitStatus::Exited(Pid::from_raw(100), 0)));
		assert!(!table.update(Pid::from_raw(555), WaitStatus::Exited(Pid::from_raw(555), 0)));
		let done = table.take_finished();
		assert_eq!(done.len(), 1);
		assert_eq!(done[0].id, 1);
		assert_eq!(table.iter().count(), 1);
	}

	#[test]
	fn checkpoint_reports_pending_interrupt() {
		let mut session = Session::new(vec![]);
		note_signal(libc::SIGINT);
		assert_eq!(checkpoint(&mut session), Err(Cancelled));
		assert_eq!(checkpoint(&mut session), Ok(()));
		assert!(session.suspended.is_none());
	}

	#[test]
	fn status_line_format() {
		assert_eq!(format_status(1, "Running", "sleep 1"), format!("[1] Running{} sleep 1", " ".repeat(15)));
		let long = "x".repeat(60);
		assert_eq!(format_status(2, "Done", &long), format!("[2] Done{} {}", " ".repeat(18), "x".repeat(40)));
	}
}
