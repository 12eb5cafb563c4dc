//! Fleet file (TOML) loading.
//!
//! ```toml
//! [supervisor]
//! warmup_ms = 500
//! grace_period_ms = 5000
//!
//! [[relay.tag]]
//! key = "playground_id"
//! env = "paas_playground_id"
//!
//! [[process]]
//! name = "dbus"
//! executable = "/usr/bin/dbus-daemon"
//! args = ["--session", "--nofork"]
//!
//! [[process]]
//! name = "rfbproxy"
//! executable = "/usr/local/bin/rfbproxy"
//! depends_on = "dbus"
//! max_restarts = 3
//! env = { RUST_LOG = "info" }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::relay::RelayTags;
use crate::shutdown::ShutdownTimeouts;
use crate::spec::{ProcessSpec, DEFAULT_RESTART_COOLDOWN};
use crate::supervisor::SupervisorConfig;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FleetConfig {
	#[serde(default)]
	pub supervisor: TimingConfig,
	#[serde(default)]
	pub relay: RelayConfig,
	#[serde(default, rename = "process")]
	pub processes: Vec<ProcessEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
	#[serde(default = "default_warmup_ms")]
	pub warmup_ms: u64,
	#[serde(default = "default_spawn_retry_ms")]
	pub spawn_retry_ms: u64,
	#[serde(default = "default_grace_period_ms")]
	pub grace_period_ms: u64,
	#[serde(default = "default_base_pause_ms")]
	pub base_pause_ms: u64,
	#[serde(default = "default_terminate_window_ms")]
	pub terminate_window_ms: u64,
}

impl Default for TimingConfig {
	fn default() -> Self {
		Self {
			warmup_ms: default_warmup_ms(),
			spawn_retry_ms: default_spawn_retry_ms(),
			grace_period_ms: default_grace_period_ms(),
			base_pause_ms: default_base_pause_ms(),
			terminate_window_ms: default_terminate_window_ms(),
		}
	}
}

fn default_warmup_ms() -> u64 {
	500
}
fn default_spawn_retry_ms() -> u64 {
	3000
}
fn default_grace_period_ms() -> u64 {
	5000
}
fn default_base_pause_ms() -> u64 {
	1000
}
fn default_terminate_window_ms() -> u64 {
	2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
	#[serde(default = "default_tags", rename = "tag")]
	pub tags: Vec<TagEntry>,
}

impl Default for RelayConfig {
	fn default() -> Self {
		Self { tags: default_tags() }
	}
}

/// A relay tag whose value is read from an environment variable.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TagEntry {
	pub key: String,
	pub env: String,
}

fn default_tags() -> Vec<TagEntry> {
	vec![
		TagEntry {
			key: "playground_id".into(),
			env: "paas_playground_id".into(),
		},
		TagEntry {
			key: "docker_id".into(),
			env: "paas_docker_id".into(),
		},
	]
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessEntry {
	pub name: String,
	pub executable: PathBuf,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default)]
	pub depends_on: String,
	#[serde(default)]
	pub max_restarts: u32,
	pub restart_cooldown_ms: Option<u64>,
	#[serde(default)]
	pub env: BTreeMap<String, String>,
}

impl From<ProcessEntry> for ProcessSpec {
	fn from(entry: ProcessEntry) -> Self {
		ProcessSpec {
			name: entry.name,
			executable: entry.executable,
			args: entry.args,
			depends_on: entry.depends_on,
			max_restarts: entry.max_restarts,
			restart_cooldown: entry
				.restart_cooldown_ms
				.map(Duration::from_millis)
				.unwrap_or(DEFAULT_RESTART_COOLDOWN),
			env: entry.env,
		}
	}
}

impl FleetConfig {
	pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
		toml::from_str(content).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}

	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		Self::parse(&content, path)
	}

	/// Supervisor settings with relay tags resolved from the environment and
	/// output going to the host's stdout/stderr.
	pub fn supervisor_config(&self) -> SupervisorConfig {
		let t = &self.supervisor;
		let mapping: Vec<(&str, &str)> = self
			.relay
			.tags
			.iter()
			.map(|tag| (tag.key.as_str(), tag.env.as_str()))
			.collect();

		SupervisorConfig {
			warmup: Duration::from_millis(t.warmup_ms),
			spawn_retry_delay: Duration::from_millis(t.spawn_retry_ms),
			shutdown: ShutdownTimeouts {
				grace_period: Duration::from_millis(t.grace_period_ms),
				base_pause: Duration::from_millis(t.base_pause_ms),
				terminate_window: Duration::from_millis(t.terminate_window_ms),
			},
			tags: RelayTags::from_env(&mapping),
			..SupervisorConfig::default()
		}
	}

	pub fn specs(&self) -> Vec<ProcessSpec> {
		self.processes.iter().cloned().map(ProcessSpec::from).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const SAMPLE: &str = r#"
[supervisor]
warmup_ms = 100
grace_period_ms = 250

[[relay.tag]]
key = "cluster"
env = "PROCHERD_TEST_CLUSTER_UNSET"

[[process]]
name = "dbus"
executable = "/usr/bin/dbus-daemon"
args = ["--session", "--nofork"]

[[process]]
name = "rfbproxy"
executable = "/usr/local/bin/rfbproxy"
depends_on = "dbus"
max_restarts = 3
restart_cooldown_ms = 750
env = { RUST_LOG = "info" }
"#;

	#[test]
	fn parses_processes_and_timings() {
		let config = FleetConfig::parse(SAMPLE, Path::new("fleet.toml")).unwrap();
		assert_eq!(config.supervisor.warmup_ms, 100);
		assert_eq!(config.supervisor.terminate_window_ms, 2000);

		let specs = config.specs();
		assert_eq!(specs.len(), 2);
		assert!(specs[0].is_base());
		assert_eq!(specs[0].restart_cooldown, DEFAULT_RESTART_COOLDOWN);
		assert_eq!(specs[1].depends_on, "dbus");
		assert_eq!(specs[1].max_restarts, 3);
		assert_eq!(specs[1].restart_cooldown, Duration::from_millis(750));
		assert_eq!(specs[1].env.get("RUST_LOG").map(String::as_str), Some("info"));

		let sup = config.supervisor_config();
		assert_eq!(sup.warmup, Duration::from_millis(100));
		assert_eq!(sup.shutdown.grace_period, Duration::from_millis(250));
		assert_eq!(sup.tags.prefix("dbus"), "cluster=,process_name=dbus");
	}

	#[test]
	fn empty_file_uses_defaults() {
		let config = FleetConfig::parse("", Path::new("empty.toml")).unwrap();
		assert!(config.processes.is_empty());
		assert_eq!(config.relay.tags, default_tags());
		assert_eq!(config.supervisor.grace_period_ms, 5000);
	}

	#[test]
	fn reports_parse_errors_with_path() {
		let err = FleetConfig::parse("[[process]]\nname = 3", Path::new("bad.toml")).unwrap_err();
		assert!(matches!(err, ConfigError::Parse { .. }));
		assert!(err.to_string().contains("bad.toml"));
	}

	#[test]
	fn bundled_example_is_a_valid_fleet() {
		let content = include_str!("../../../procherd.example.toml");
		let config = FleetConfig::parse(content, Path::new("procherd.example.toml")).unwrap();
		let specs = config.specs();
		let refs: Vec<&ProcessSpec> = specs.iter().collect();
		assert_eq!(crate::spec::validate_fleet(&refs), Ok(0));
	}

	#[test]
	fn load_reads_from_disk() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("fleet.toml");
		std::fs::write(&path, SAMPLE).unwrap();
		assert_eq!(FleetConfig::load(&path).unwrap().processes.len(), 2);

		let missing = FleetConfig::load(&dir.path().join("missing.toml")).unwrap_err();
		assert!(matches!(missing, ConfigError::Read { .. }));
	}
}
