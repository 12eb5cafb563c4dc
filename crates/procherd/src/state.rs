use tokio::sync::Mutex;

use crate::relay::OutputRelay;
use crate::signal::{self, ProcessSignal, StopSignal};
use crate::spec::ProcessSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
	/// Exited successfully; clean exits are never restarted.
	Clean,
	/// Restart budget used up.
	Exhausted,
	/// Stop signal or fleet cancellation ended monitoring.
	Stopped,
	/// Dependency had no live process when this one was dispatched.
	DependencyUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
	NotStarted,
	Launching,
	Running { pid: u32 },
	RestartPending,
	Terminated(TerminationReason),
}

impl MonitorState {
	pub fn is_running(&self) -> bool {
		matches!(self, MonitorState::Running { .. })
	}

	pub fn is_terminated(&self) -> bool {
		matches!(self, MonitorState::Terminated(_))
	}
}

/// Point-in-time view of one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStatus {
	pub name: String,
	pub depends_on: String,
	pub state: MonitorState,
	pub pid: Option<u32>,
	pub restarts: u32,
	pub launches: u32,
	pub stop_requested: bool,
}

/// Mutable per-process fields, guarded by the process's own lock.
#[derive(Debug)]
pub(crate) struct ProcessRuntime {
	pub pid: Option<u32>,
	pub restarts: u32,
	pub launches: u32,
	pub relays: Vec<OutputRelay>,
	pub state: MonitorState,
}

/// A registered process: its immutable spec, stop signal and runtime state.
#[derive(Debug)]
pub struct ManagedProcess {
	pub(crate) spec: ProcessSpec,
	pub(crate) stop: StopSignal,
	pub(crate) runtime: Mutex<ProcessRuntime>,
}

impl ManagedProcess {
	pub(crate) fn new(spec: ProcessSpec) -> Self {
		Self {
			spec,
			stop: StopSignal::new(),
			runtime: Mutex::new(ProcessRuntime {
				pid: None,
				restarts: 0,
				launches: 0,
				relays: Vec::new(),
				state: MonitorState::NotStarted,
			}),
		}
	}

	pub fn spec(&self) -> &ProcessSpec {
		&self.spec
	}

	pub fn name(&self) -> &str {
		&self.spec.name
	}

	pub fn stop_signal(&self) -> &StopSignal {
		&self.stop
	}

	/// PID of the current generation, if it still answers a liveness probe.
	pub async fn live_pid(&self) -> Option<u32> {
		let runtime = self.runtime.lock().await;
		runtime.pid.filter(|&pid| signal::is_alive(pid))
	}

	/// Sends `sig` to the current generation. Returns `None` when no process
	/// is held. Sending under the lock keeps the PID from being cleared and
	/// reused mid-send.
	pub(crate) async fn signal(&self, sig: ProcessSignal) -> Option<(u32, nix::Result<()>)> {
		let runtime = self.runtime.lock().await;
		runtime.pid.map(|pid| (pid, signal::send_signal(pid, sig)))
	}

	/// Probes the current generation and force-kills it if it is still alive.
	pub(crate) async fn kill_if_alive(&self) -> Option<(u32, nix::Result<()>)> {
		let runtime = self.runtime.lock().await;
		runtime
			.pid
			.filter(|&pid| signal::is_alive(pid))
			.map(|pid| (pid, signal::send_signal(pid, ProcessSignal::Kill)))
	}

	pub(crate) async fn mark_exited(&self) {
		self.runtime.lock().await.pid = None;
	}

	pub(crate) async fn set_state(&self, state: MonitorState) {
		self.runtime.lock().await.state = state;
	}

	pub(crate) async fn wait_relays(&self) {
		let relays = std::mem::take(&mut self.runtime.lock().await.relays);
		for relay in &relays {
			relay.wait().await;
		}
	}

	pub async fn status(&self) -> ProcessStatus {
		let runtime = self.runtime.lock().await;
		ProcessStatus {
			name: self.spec.name.clone(),
			depends_on: self.spec.depends_on.clone(),
			state: runtime.state,
			pid: runtime.pid,
			restarts: runtime.restarts,
			launches: runtime.launches,
			stop_requested: self.stop.is_closed(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn monitor_state_predicates() {
		assert!(MonitorState::Running { pid: 1 }.is_running());
		assert!(!MonitorState::RestartPending.is_running());
		assert!(MonitorState::Terminated(TerminationReason::Clean).is_terminated());
		assert!(!MonitorState::NotStarted.is_terminated());
	}

	#[tokio::test]
	async fn fresh_process_status() {
		let mp = ManagedProcess::new(ProcessSpec::new("vnc", "x11vnc").depends_on("dbus"));
		let status = mp.status().await;
		assert_eq!(status.name, "vnc");
		assert_eq!(status.depends_on, "dbus");
		assert_eq!(status.state, MonitorState::NotStarted);
		assert_eq!(status.pid, None);
		assert!(!status.stop_requested);
		assert_eq!(mp.live_pid().await, None);
		assert!(mp.signal(ProcessSignal::Terminate).await.is_none());
	}
}
