use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::FleetError;

pub const DEFAULT_RESTART_COOLDOWN: Duration = Duration::from_secs(5);

/// Immutable description of one managed process.
///
/// An empty `depends_on` marks the base process. `max_restarts == 0` means
/// the process may be restarted without limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
	pub name: String,
	pub executable: PathBuf,
	pub args: Vec<String>,
	pub depends_on: String,
	pub max_restarts: u32,
	pub restart_cooldown: Duration,
	pub env: BTreeMap<String, String>,
}

impl ProcessSpec {
	pub fn new(name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
		Self {
			name: name.into(),
			executable: executable.into(),
			args: Vec::new(),
			depends_on: String::new(),
			max_restarts: 0,
			restart_cooldown: DEFAULT_RESTART_COOLDOWN,
			env: BTreeMap::new(),
		}
	}

	pub fn args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.args = args.into_iter().map(Into::into).collect();
		self
	}

	pub fn depends_on(mut self, name: impl Into<String>) -> Self {
		self.depends_on = name.into();
		self
	}

	pub fn max_restarts(mut self, max: u32) -> Self {
		self.max_restarts = max;
		self
	}

	pub fn restart_cooldown(mut self, cooldown: Duration) -> Self {
		self.restart_cooldown = cooldown;
		self
	}

	pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.env.insert(key.into(), value.into());
		self
	}

	pub fn is_base(&self) -> bool {
		self.depends_on.is_empty()
	}
}

/// Checks the star-shaped dependency layout and returns the index of the
/// single base process.
pub fn validate_fleet(specs: &[&ProcessSpec]) -> Result<usize, FleetError> {
	let bases: Vec<usize> = specs
		.iter()
		.enumerate()
		.filter(|(_, s)| s.is_base())
		.map(|(i, _)| i)
		.collect();

	let base = match bases.as_slice() {
		[] => return Err(FleetError::NoBaseProcess),
		[only] => *only,
		_ => {
			return Err(FleetError::MultipleBaseProcesses {
				names: bases.iter().map(|&i| specs[i].name.clone()).collect(),
			})
		}
	};

	let names: HashSet<&str> = specs.iter().map(|s| s.name.as_str()).collect();
	let base_name = specs[base].name.as_str();

	for spec in specs.iter().filter(|s| !s.is_base()) {
		if !names.contains(spec.depends_on.as_str()) {
			return Err(FleetError::UnknownDependency {
				name: spec.name.clone(),
				depends_on: spec.depends_on.clone(),
			});
		}
		if spec.depends_on != base_name {
			return Err(FleetError::NestedDependency {
				name: spec.name.clone(),
				depends_on: spec.depends_on.clone(),
			});
		}
	}

	Ok(base)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn base() -> ProcessSpec {
		ProcessSpec::new("dbus", "dbus-daemon")
	}

	#[test]
	fn builder_defaults() {
		let spec = ProcessSpec::new("web", "/bin/web").args(["--port", "80"]);
		assert!(spec.is_base());
		assert_eq!(spec.args, vec!["--port", "80"]);
		assert_eq!(spec.max_restarts, 0);
		assert_eq!(spec.restart_cooldown, DEFAULT_RESTART_COOLDOWN);
	}

	#[test]
	fn finds_single_base() {
		let b = base();
		let vnc = ProcessSpec::new("vnc", "x11vnc").depends_on("dbus");
		let proxy = ProcessSpec::new("proxy", "rfbproxy").depends_on("dbus");
		assert_eq!(validate_fleet(&[&vnc, &b, &proxy]), Ok(1));
	}

	#[test]
	fn rejects_missing_base() {
		let a = ProcessSpec::new("a", "a").depends_on("b");
		let b = ProcessSpec::new("b", "b").depends_on("a");
		assert_eq!(validate_fleet(&[&a, &b]), Err(FleetError::NoBaseProcess));
		assert_eq!(validate_fleet(&[]), Err(FleetError::NoBaseProcess));
	}

	#[test]
	fn rejects_two_bases() {
		let a = ProcessSpec::new("a", "a");
		let b = ProcessSpec::new("b", "b");
		assert_eq!(
			validate_fleet(&[&a, &b]),
			Err(FleetError::MultipleBaseProcesses { names: vec!["a".into(), "b".into()] })
		);
	}

	#[test]
	fn rejects_unknown_and_nested_dependencies() {
		let b = base();
		let ghost = ProcessSpec::new("vnc", "x11vnc").depends_on("xvfb");
		assert!(matches!(
			validate_fleet(&[&b, &ghost]),
			Err(FleetError::UnknownDependency { .. })
		));

		let vnc = ProcessSpec::new("vnc", "x11vnc").depends_on("dbus");
		let proxy = ProcessSpec::new("proxy", "rfbproxy").depends_on("vnc");
		assert_eq!(
			validate_fleet(&[&b, &vnc, &proxy]),
			Err(FleetError::NestedDependency { name: "proxy".into(), depends_on: "vnc".into() })
		);
	}
}
