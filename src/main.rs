mod applet;
mod builtin;
mod classifier;
mod eval;
mod expand;
mod globber;
mod input;
mod job;
mod parser;
mod search;
mod session;
mod types;
mod vars;

use std::{env,io,process};
use std::fs::File;
use std::io::{BufReader,IsTerminal,Write};
use std::os::unix::ffi::OsStringExt;

use anyhow::{anyhow,Context,Result};
use argh::FromArgs;
use log::{debug,warn};
use nix::sys::signal::{self,SigHandler,Signal};
use simplelog::{ColorChoice,Config,LevelFilter,TermLogger,TerminalMode,WriteLogger};

use crate::input::{InputStream,Rustyline};
use crate::session::Session;

const LOG_LEVEL_VAR: &str = "HUSH_LOG";
const LOG_FILE_VAR: &str = "HUSH_LOG_FILE";

#[derive(FromArgs)]
/// A small POSIX-style command interpreter with job control.
struct Cli {
	#[argh(option, short = 'c')]
	/// run SCRIPT; the remaining arguments become $0, $1, ...
	command: Option<String>,

	#[argh(switch, short = 'i')]
	/// accepted for compatibility, no effect
	interactive: bool,

	#[argh(switch, short = 'f')]
	/// parse every statement but execute nothing
	fake: bool,

	#[argh(positional, greedy)]
	/// script file followed by its arguments
	args: Vec<String>,
}

fn init_logging() -> Result<()> {
	let level = match env::var(LOG_LEVEL_VAR) {
		Ok(level) => level,
		Err(_) => return Ok(()),
	};
	let filter: LevelFilter = level.parse()
		.map_err(|_| anyhow!("{}: unknown log level '{}'", LOG_LEVEL_VAR, level))?;
	match env::var_os(LOG_FILE_VAR) {
		Some(path) => {
			let file = File::create(&path)
				.with_context(|| format!("cannot open log file '{}'", path.to_string_lossy()))?;
			WriteLogger::init(filter, Config::default(), file)?;
		},
		None => TermLogger::init(filter, Config::default(), TerminalMode::Stderr, ColorChoice::Auto)?,
	}
	Ok(())
}

fn run() -> Result<i32> {
	let cli: Cli = argh::from_env();
	init_logging()?;
	debug!("starting: command={} interactive flag={} fake={}", cli.command.is_some(), cli.interactive, cli.fake);

	// Rust leaves SIGPIPE ignored, which every exec'd child would inherit.
	unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigDfl) }.context("cannot reset SIGPIPE")?;

	let mut interactive = false;
	let (positional, mut input) = if let Some(script) = cli.command {
		let mut positional: Vec<Vec<u8>> = cli.args.into_iter().map(String::into_bytes).collect();
		if positional.is_empty() {
			positional.push(b"hush".to_vec());
		}
		(positional, InputStream::from_bytes(script.into_bytes()))
	} else if let Some(path) = cli.args.first() {
		let file = File::open(path).with_context(|| format!("cannot open '{}'", path))?;
		let positional = cli.args.iter().map(|a| a.clone().into_bytes()).collect();
		(positional, InputStream::from_reader(BufReader::new(file)))
	} else {
		let argv0 = env::args_os().next().map_or_else(|| b"hush".to_vec(), OsStringExt::into_vec);
		if io::stdin().is_terminal() && io::stdout().is_terminal() {
			interactive = true;
			let editor = Rustyline::new().context("cannot start line editor")?;
			(vec![argv0], InputStream::interactive(Box::new(editor)))
		} else {
			(vec![argv0], InputStream::from_reader(BufReader::new(io::stdin())))
		}
	};

	let mut session = Session::new(positional);
	session.fake = cli.fake;
	if interactive {
		match job::setup_job_control() {
			Ok(terminal) => session.terminal = Some(terminal),
			Err(e) => warn!("job control disabled: {}", e),
		}
	}

	let status = eval::run_stream(&mut session, &mut input);
	if session.saw_syntax_error && !interactive {
		return Ok(2);
	}
	Ok(status)
}

fn main() {
	let status = match run() {
		Ok(status) => status,
		Err(e) => {
			let _ = writeln!(io::stderr(), "hush: {:#}", e);
			1
		},
	};
	let _ = io::stdout().flush();
	job::restore_terminal();
	process::exit(status & 0xff)
}
