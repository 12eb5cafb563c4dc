//! Error types for the supervisor.
//!
//! - [`SupervisorError`] is returned synchronously from [`register`](crate::Supervisor::register)
//!   and [`start`](crate::Supervisor::start).
//! - [`FleetError`] describes a registered process set that cannot be started.
//! - [`ProcessError`] covers per-process failures that the monitor tasks handle
//!   internally. They are logged, never returned to a caller.
//! - [`ConfigError`] comes from loading a fleet file.

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
	#[error("process {name:?} is already registered")]
	DuplicateName { name: String },

	#[error("supervisor has already been started")]
	AlreadyStarted,

	#[error("supervisor is stopping")]
	Stopping,

	#[error("invalid fleet: {0}")]
	Config(#[from] FleetError),

	#[error("failed to start base process {name:?}: {source}")]
	Spawn {
		name: String,
		#[source]
		source: io::Error,
	},
}

/// Problems with the dependency layout of the registered processes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FleetError {
	#[error("no base process found (every process declares a dependency)")]
	NoBaseProcess,

	#[error("more than one base process: {names:?}")]
	MultipleBaseProcesses { names: Vec<String> },

	#[error("{name:?} depends on unknown process {depends_on:?}")]
	UnknownDependency { name: String, depends_on: String },

	#[error("{name:?} depends on {depends_on:?}, which is not the base process")]
	NestedDependency { name: String, depends_on: String },
}

#[derive(Error, Debug)]
pub enum ProcessError {
	#[error("spawn failed: {0}")]
	Spawn(#[source] io::Error),

	#[error("exited abnormally: {0}")]
	Exit(ExitStatus),

	#[error("wait failed: {0}")]
	Wait(#[source] io::Error),

	#[error("dependency {depends_on:?} is not running")]
	DependencyUnavailable { depends_on: String },
}

impl ProcessError {
	/// Short stable label for log fields.
	pub fn as_label(&self) -> &'static str {
		match self {
			ProcessError::Spawn(_) => "spawn_error",
			ProcessError::Exit(_) => "runtime_exit",
			ProcessError::Wait(_) => "wait_error",
			ProcessError::DependencyUnavailable { .. } => "dependency_unavailable",
		}
	}
}

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("failed to parse {path}: {source}")]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
}
