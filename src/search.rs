use std::collections::HashMap;
use std::ffi::{CString,OsStr};
use std::os::unix::ffi::{OsStrExt,OsStringExt};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::{env,fs};

const PATH_KEY: &str = "PATH";

/// Remembers where each command name was found on `PATH`.
#[derive(Debug, Default)]
pub struct SearchCache {
	imp: HashMap<Vec<u8>, CString>,
}

fn is_executable(path: &Path) -> bool {
	match fs::metadata(path) {
		Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
		Err(_) => false,
	}
}

impl SearchCache {
	pub fn new() -> SearchCache {
		SearchCache { imp: HashMap::new() }
	}

	pub fn clear(&mut self) {
		self.imp.clear();
	}

	fn search(name: &[u8]) -> Option<CString> {
		let path = env::var_os(PATH_KEY)?;
		for dir in env::split_paths(&path) {
			let candidate = dir.join(OsStr::from_bytes(name));
			if is_executable(&candidate) {
				return CString::new(candidate.into_os_string().into_vec()).ok();
			}
		}
		None
	}

	/// Resolves a command name. Names containing `/` are used as given.
	pub fn lookup(&mut self, name: &[u8]) -> Option<CString> {
		if name.contains(&b'/') {
			return CString::new(name).ok();
		}
		if let Some(path) = self.imp.get(name) {
			return Some(path.clone());
		}
		let path = SearchCache::search(name)?;
		self.imp.insert(name.to_owned(), path.clone());
		Some(path)
	}
}
