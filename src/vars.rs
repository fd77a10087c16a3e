use std::{env,error,fmt};
use std::ffi::OsStr;
use std::os::unix::ffi::{OsStrExt,OsStringExt};

use log::debug;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum VarError {
	ReadOnly(String),
	BadName(String),
}

impl fmt::Display for VarError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			VarError::ReadOnly(ref name) => write!(f, "{}: readonly variable", name),
			VarError::BadName(ref name) => write!(f, "{}: bad variable name", name),
		}
	}
}

impl error::Error for VarError {}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Variable {
	pub name: String,
	pub value: Vec<u8>,
	pub exported: bool,
	pub readonly: bool,
}

/// `NAME` must start with a letter or `_` and continue with alphanumerics or `_`.
pub fn is_name(name: &[u8]) -> bool {
	match name.split_first() {
		Some((&first, rest)) => (first.is_ascii_alphabetic() || first == b'_')
			&& rest.iter().all(|&c| c.is_ascii_alphanumeric() || c == b'_'),
		None => false,
	}
}

/// Splits `NAME=value`, returning `None` unless the text is an assignment.
pub fn split_assignment(word: &[u8]) -> Option<(&[u8], &[u8])> {
	let eq = word.iter().position(|&c| c == b'=')?;
	let (name, value) = (&word[.. eq], &word[eq + 1 ..]);
	if is_name(name) { Some((name, value)) } else { None }
}

/// Ordered shell variable table mirrored into the process environment for
/// exported entries.
#[derive(Debug, Clone, Default)]
pub struct VarStore {
	vars: Vec<Variable>,
}

impl VarStore {
	pub fn new() -> VarStore {
		VarStore { vars: vec![] }
	}

	/// Seeds the table from the inherited environment without writing back.
	pub fn from_environment() -> VarStore {
		let mut store = VarStore::new();
		for (k, v) in env::vars_os() {
			let name = match k.into_string() {
				Ok(name) => name,
				Err(_) => continue,
			};
			if !is_name(name.as_bytes()) { continue; }
			store.vars.push(Variable { name: name, value: v.into_vec(), exported: true, readonly: false });
		}
		store
	}

	pub fn lookup(&self, name: &str) -> Option<&Variable> {
		self.vars.iter().find(|v| v.name == name)
	}

	pub fn get(&self, name: &str) -> Option<&[u8]> {
		self.lookup(name).map(|v| &v.value[..])
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Variable> {
		self.vars.iter()
	}

	/// Assigns a value. `export` adds the export flag; an already exported
	/// variable stays exported and its environment entry is refreshed.
	pub fn set(&mut self, name: &str, value: &[u8], export: bool) -> Result<(), VarError> {
		if !is_name(name.as_bytes()) {
			return Err(VarError::BadName(name.to_owned()));
		}
		let var = match self.vars.iter().position(|v| v.name == name) {
			Some(i) => {
				let var = &mut self.vars[i];
				if var.readonly {
					debug!("rejected assignment to readonly {}", name);
					return Err(VarError::ReadOnly(name.to_owned()));
				}
				var.value = value.to_owned();
				var.exported |= export;
				var
			},
			None => {
				self.vars.push(Variable { name: name.to_owned(), value: value.to_owned(), exported: export, readonly: false });
				let last = self.vars.len() - 1;
				&mut self.vars[last]
			},
		};
		if var.exported {
			env::set_var(&var.name, OsStr::from_bytes(&var.value));
		}
		Ok(())
	}

	/// Marks an existing variable exported. Returns false if it does not exist.
	pub fn export(&mut self, name: &str) -> bool {
		match self.vars.iter_mut().find(|v| v.name == name) {
			Some(var) => {
				var.exported = true;
				env::set_var(&var.name, OsStr::from_bytes(&var.value));
				true
			},
			None => false,
		}
	}

	pub fn set_readonly(&mut self, name: &str) -> bool {
		match self.vars.iter_mut().find(|v| v.name == name) {
			Some(var) => { var.readonly = true; true },
			None => false,
		}
	}

	pub fn unset(&mut self, name: &str) -> Result<(), VarError> {
		let i = match self.vars.iter().position(|v| v.name == name) {
			Some(i) => i,
			None => return Ok(()),
		};
		if self.vars[i].readonly {
			return Err(VarError::ReadOnly(name.to_owned()));
		}
		let var = self.vars.remove(i);
		if var.exported {
			env::remove_var(&var.name);
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn names_and_assignments() {
		assert!(is_name(b"PATH"));
		assert!(is_name(b"_x1"));
		assert!(!is_name(b"1x"));
		assert!(!is_name(b""));
		assert_eq!(split_assignment(b"A=b=c"), Some((&b"A"[..], &b"b=c"[..])));
		assert_eq!(split_assignment(b"A="), Some((&b"A"[..], &b""[..])));
		assert_eq!(split_assignment(b"=x"), None);
		assert_eq!(split_assignment(b"a-b=x"), None);
		assert_eq!(split_assignment(b"plain"), None);
	}

	#[test]
	fn set_and_replace() {
		let mut store = VarStore::new();
		store.set("HUSH_TEST_LOCAL", b"1", false).unwrap();
		store.set("HUSH_TEST_LOCAL", b"2", false).unwrap();
		assert_eq!(store.get("HUSH_TEST_LOCAL"), Some(&b"2"[..]));
		assert_eq!(store.iter().count(), 1);
		assert!(env::var_os("HUSH_TEST_LOCAL").is_none());
	}

	#[test]
	fn export_writes_environment() {
		let mut store = VarStore::new();
		store.set("HUSH_TEST_EXPORTED", b"5", true).unwrap();
		assert_eq!(env::var("HUSH_TEST_EXPORTED").unwrap(), "5");
		store.set("HUSH_TEST_EXPORTED", b"6", false).unwrap();
		assert_eq!(env::var("HUSH_TEST_EXPORTED").unwrap(), "6");
		store.unset("HUSH_TEST_EXPORTED").unwrap();
		assert!(env::var_os("HUSH_TEST_EXPORTED").is_none());
	}

	#[test]
	fn readonly_rejects_changes() {
		let mut store = VarStore::new();
		store.set("HUSH_TEST_RO", b"keep", false).unwrap();
		assert!(store.set_readonly("HUSH_TEST_RO"));
		assert_eq!(store.set("HUSH_TEST_RO", b"other", false), Err(VarError::ReadOnly("HUSH_TEST_RO".to_owned())));
		assert_eq!(store.unset("HUSH_TEST_RO"), Err(VarError::ReadOnly("HUSH_TEST_RO".to_owned())));
		assert_eq!(store.get("HUSH_TEST_RO"), Some(&b"keep"[..]));
	}

	#[test]
	fn export_unknown_name() {
		let mut store = VarStore::new();
		assert!(!store.export("HUSH_TEST_MISSING"));
		assert!(store.set("9bad", b"x", false).is_err());
	}
}
