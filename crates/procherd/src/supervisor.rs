use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::SupervisorError;
use crate::monitor::{self, Generation};
use crate::relay::{RelayTags, Sink};
use crate::shutdown::{self, ShutdownReport, ShutdownTimeouts};
use crate::signal::ProcessSignal;
use crate::spec::{self, ProcessSpec};
use crate::state::{ManagedProcess, MonitorState, ProcessStatus, TerminationReason};

pub struct SupervisorConfig {
	/// How long the base process gets to initialize before dependents launch.
	pub warmup: Duration,
	/// Pause after a failed spawn before it counts as a failed attempt.
	pub spawn_retry_delay: Duration,
	pub shutdown: ShutdownTimeouts,
	pub tags: RelayTags,
	pub stdout: Sink,
	pub stderr: Sink,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			warmup: Duration::from_millis(500),
			spawn_retry_delay: Duration::from_secs(3),
			shutdown: ShutdownTimeouts::default(),
			tags: RelayTags::default(),
			stdout: Sink::stdout(),
			stderr: Sink::stderr(),
		}
	}
}

struct Fleet {
	processes: Vec<Arc<ManagedProcess>>,
	started: bool,
	stopping: bool,
}

/// Owns the registered processes and their monitor tasks.
pub struct Supervisor {
	fleet: RwLock<Fleet>,
	/// Held by start while it launches or dispatches monitors.
	dispatch: Mutex<()>,
	cancel: CancellationToken,
	tracker: TaskTracker,
	config: SupervisorConfig,
}

impl Supervisor {
	pub fn new(config: SupervisorConfig) -> Arc<Self> {
		Arc::new(Self {
			fleet: RwLock::new(Fleet {
				processes: Vec::new(),
				started: false,
				stopping: false,
			}),
			dispatch: Mutex::new(()),
			cancel: CancellationToken::new(),
			tracker: TaskTracker::new(),
			config,
		})
	}

	pub fn config(&self) -> &SupervisorConfig {
		&self.config
	}

	pub(crate) fn cancel_token(&self) -> &CancellationToken {
		&self.cancel
	}

	pub async fn register(&self, spec: ProcessSpec) -> Result<(), SupervisorError> {
		let mut fleet = self.fleet.write().await;
		if fleet.started || fleet.stopping {
			return Err(SupervisorError::AlreadyStarted);
		}
		if fleet.processes.iter().any(|p| p.spec.name == spec.name) {
			return Err(SupervisorError::DuplicateName { name: spec.name });
		}
		fleet.processes.push(Arc::new(ManagedProcess::new(spec)));
		Ok(())
	}

	/// Launches the base process, waits out the warm-up, then dispatches a
	/// monitor for the base and one per dependent. Returns once everything
	/// has been dispatched.
	pub async fn start(self: &Arc<Self>) -> Result<(), SupervisorError> {
		let (base, dependents) = {
			let mut fleet = self.fleet.write().await;
			if fleet.stopping {
				return Err(SupervisorError::Stopping);
			}
			if fleet.started {
				return Err(SupervisorError::AlreadyStarted);
			}
			let specs: Vec<&ProcessSpec> = fleet.processes.iter().map(|p| &p.spec).collect();
			let base_idx = spec::validate_fleet(&specs)?;
			fleet.started = true;

			let base = Arc::clone(&fleet.processes[base_idx]);
			let dependents: Vec<_> = fleet
				.processes
				.iter()
				.enumerate()
				.filter(|(i, _)| *i != base_idx)
				.map(|(_, p)| Arc::clone(p))
				.collect();
			(base, dependents)
		};

		{
			let _dispatching = self.dispatch.lock().await;
			if self.cancel.is_cancelled() {
				self.tracker.close();
				return Err(SupervisorError::Stopping);
			}

			tracing::info!(process = %base.name(), "starting base process");
			base.set_state(MonitorState::Launching).await;
			let (child, _) = match monitor::launch(self, &base).await {
				Ok(launched) => launched,
				Err(source) => {
					self.tracker.close();
					return Err(SupervisorError::Spawn {
						name: base.name().to_string(),
						source,
					});
				}
			};
			let sup = Arc::clone(self);
			self.tracker
				.spawn(monitor::run(sup, Arc::clone(&base), Generation::Running(child)));
		}

		// The base's monitor reaps it the moment it exits, so the liveness
		// snapshot each dependent takes sees an exit during warm-up.
		tokio::select! {
			_ = tokio::time::sleep(self.config.warmup) => {}
			_ = self.cancel.cancelled() => {}
		}

		let _dispatching = self.dispatch.lock().await;
		if self.cancel.is_cancelled() {
			tracing::info!("stop requested during warm-up, dependents not started");
			for process in &dependents {
				process.set_state(MonitorState::Terminated(TerminationReason::Stopped)).await;
			}
		} else {
			for process in dependents {
				let sup = Arc::clone(self);
				self.tracker.spawn(monitor::dispatch_dependent(sup, process));
			}
		}
		self.tracker.close();

		Ok(())
	}

	/// Blocks until every monitor task has returned.
	pub async fn wait(&self) {
		if !self.fleet.read().await.started {
			return;
		}
		self.tracker.wait().await;
	}

	/// Stops the whole fleet. Only the first call runs the shutdown sequence
	/// and gets a report; later calls return `None` immediately.
	pub async fn stop(&self) -> Option<ShutdownReport> {
		let processes = {
			let mut fleet = self.fleet.write().await;
			if fleet.stopping {
				return None;
			}
			fleet.stopping = true;
			fleet.processes.clone()
		};

		tracing::info!("stopping all processes");
		self.cancel.cancel();
		for process in &processes {
			process.stop.close();
		}
		// an in-flight start finishes dispatching before the tracker is sealed
		drop(self.dispatch.lock().await);
		self.tracker.close();

		let report = shutdown::escalate(&processes, &self.tracker, &self.config.shutdown).await;

		for process in &processes {
			process.wait_relays().await;
		}
		tracing::info!(phase = ?report.phase, "all processes stopped");
		Some(report)
	}

	/// Closes the stop signal of every dependent of `base` and sends SIGTERM
	/// to those holding a live process. Returns the names signalled.
	pub async fn cascade_terminate(&self, base: &str) -> Vec<String> {
		let dependents: Vec<Arc<ManagedProcess>> = {
			let fleet = self.fleet.read().await;
			fleet
				.processes
				.iter()
				.filter(|p| p.spec.depends_on == base)
				.cloned()
				.collect()
		};

		if !dependents.is_empty() {
			tracing::info!(base, "base process ended, stopping its dependents");
		}

		let mut signalled = Vec::new();
		for dep in dependents {
			dep.stop.close();
			match dep.signal(ProcessSignal::Terminate).await {
				Some((pid, Ok(()))) => {
					tracing::info!(process = %dep.name(), pid, "sent SIGTERM to dependent");
					signalled.push(dep.name().to_string());
				}
				Some((pid, Err(e))) => {
					tracing::debug!(process = %dep.name(), pid, error = %e, "SIGTERM to dependent failed");
				}
				None => {}
			}
		}
		signalled
	}

	pub async fn is_stopping(&self) -> bool {
		self.fleet.read().await.stopping
	}

	pub async fn process(&self, name: &str) -> Option<Arc<ManagedProcess>> {
		let fleet = self.fleet.read().await;
		fleet.processes.iter().find(|p| p.spec.name == name).cloned()
	}

	pub async fn status(&self) -> Vec<ProcessStatus> {
		let processes = self.fleet.read().await.processes.clone();
		let mut result = Vec::with_capacity(processes.len());
		for process in &processes {
			result.push(process.status().await);
		}
		result
	}
}
