//! Fleet shutdown escalation.
//!
//! Phases run in order, each bounded by its own timeout:
//!
//! ```text
//! AwaitVoluntaryExit  -- grace_period --> Terminate (dependents, pause, base)
//! Terminate           -- terminate_window --> Kill (whatever still answers a probe)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;

use crate::signal::ProcessSignal;
use crate::state::ManagedProcess;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownTimeouts {
	/// How long monitors get to exit on their own.
	pub grace_period: Duration,
	/// Pause between terminating dependents and terminating the base.
	pub base_pause: Duration,
	/// How long SIGTERM gets before SIGKILL.
	pub terminate_window: Duration,
}

impl Default for ShutdownTimeouts {
	fn default() -> Self {
		Self {
			grace_period: Duration::from_secs(5),
			base_pause: Duration::from_secs(1),
			terminate_window: Duration::from_secs(2),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
	AwaitVoluntaryExit,
	Terminate,
	Kill,
}

/// What a stop sequence had to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
	/// Last phase entered.
	pub phase: ShutdownPhase,
	/// Processes sent SIGTERM, in send order.
	pub terminated: Vec<String>,
	/// Processes sent SIGKILL.
	pub killed: Vec<String>,
}

impl ShutdownReport {
	fn new() -> Self {
		Self {
			phase: ShutdownPhase::AwaitVoluntaryExit,
			terminated: Vec::new(),
			killed: Vec::new(),
		}
	}

	pub fn was_graceful(&self) -> bool {
		self.phase == ShutdownPhase::AwaitVoluntaryExit
	}
}

/// Runs the escalation over `processes` until `tracker` reports every
/// monitor finished, or the kill phase has been carried out.
pub(crate) async fn escalate(
	processes: &[Arc<ManagedProcess>],
	tracker: &TaskTracker,
	timeouts: &ShutdownTimeouts,
) -> ShutdownReport {
	let mut report = ShutdownReport::new();

	if tokio::time::timeout(timeouts.grace_period, tracker.wait()).await.is_ok() {
		tracing::info!("all processes exited gracefully");
		return report;
	}

	tracing::warn!(grace = ?timeouts.grace_period, "grace period elapsed, sending SIGTERM");
	report.phase = ShutdownPhase::Terminate;

	let (bases, dependents): (Vec<_>, Vec<_>) = processes.iter().partition(|p| p.spec.is_base());
	terminate_all(&dependents, &mut report).await;
	tokio::time::sleep(timeouts.base_pause).await;
	terminate_all(&bases, &mut report).await;

	if tokio::time::timeout(timeouts.terminate_window, tracker.wait()).await.is_ok() {
		tracing::info!("all processes exited after SIGTERM");
		return report;
	}

	tracing::warn!("some processes ignored SIGTERM, killing");
	report.phase = ShutdownPhase::Kill;

	for process in processes {
		match process.kill_if_alive().await {
			Some((pid, Ok(()))) => {
				tracing::warn!(process = %process.name(), pid, "sent SIGKILL");
				report.killed.push(process.name().to_string());
			}
			Some((pid, Err(e))) => {
				tracing::debug!(process = %process.name(), pid, error = %e, "SIGKILL failed");
			}
			None => {}
		}
	}

	// SIGKILL cannot be ignored; give monitors a bounded window to reap
	if tokio::time::timeout(timeouts.terminate_window, tracker.wait()).await.is_err() {
		tracing::warn!("monitors still running after SIGKILL");
	}

	report
}

async fn terminate_all(processes: &[&Arc<ManagedProcess>], report: &mut ShutdownReport) {
	for process in processes {
		match process.signal(ProcessSignal::Terminate).await {
			Some((pid, Ok(()))) => {
				tracing::info!(process = %process.name(), pid, "sent SIGTERM");
				report.terminated.push(process.name().to_string());
			}
			Some((pid, Err(e))) => {
				tracing::debug!(process = %process.name(), pid, error = %e, "SIGTERM failed");
			}
			None => {}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::spec::ProcessSpec;

	fn quick() -> ShutdownTimeouts {
		ShutdownTimeouts {
			grace_period: Duration::from_millis(50),
			base_pause: Duration::from_millis(10),
			terminate_window: Duration::from_millis(50),
		}
	}

	#[test]
	fn phases_are_ordered() {
		assert!(ShutdownPhase::AwaitVoluntaryExit < ShutdownPhase::Terminate);
		assert!(ShutdownPhase::Terminate < ShutdownPhase::Kill);
	}

	#[tokio::test]
	async fn empty_tracker_is_graceful() {
		let tracker = TaskTracker::new();
		tracker.close();
		let report = escalate(&[], &tracker, &quick()).await;
		assert!(report.was_graceful());
		assert!(report.terminated.is_empty());
	}

	#[tokio::test]
	async fn stuck_monitor_without_processes_reaches_kill_phase() {
		let tracker = TaskTracker::new();
		let (release, hold) = tokio::sync::oneshot::channel::<()>();
		tracker.spawn(async move {
			let _ = hold.await;
		});
		tracker.close();

		let processes = vec![
			Arc::new(ManagedProcess::new(ProcessSpec::new("base", "true"))),
			Arc::new(ManagedProcess::new(ProcessSpec::new("dep", "true").depends_on("base"))),
		];
		let report = escalate(&processes, &tracker, &quick()).await;
		assert_eq!(report.phase, ShutdownPhase::Kill);
		// nothing held a pid, so nothing was signalled
		assert!(report.terminated.is_empty());
		assert!(report.killed.is_empty());

		let _ = release.send(());
		tracker.wait().await;
	}

	#[tokio::test]
	async fn kill_phase_returns_after_monitors_reap() {
		let process = Arc::new(ManagedProcess::new(ProcessSpec::new("base", "sh")));
		let mut child = tokio::process::Command::new("sh")
			.args(["-c", "trap '' TERM; exec sleep 30"])
			.spawn()
			.unwrap();
		process.runtime.lock().await.pid = child.id();

		let tracker = TaskTracker::new();
		let monitor = Arc::clone(&process);
		tracker.spawn(async move {
			let _ = child.wait().await;
			monitor.mark_exited().await;
		});
		tracker.close();

		// let the shell install its trap before the sequence starts
		tokio::time::sleep(Duration::from_millis(200)).await;

		let timeouts = ShutdownTimeouts {
			terminate_window: Duration::from_millis(500),
			..quick()
		};
		let report = escalate(&[Arc::clone(&process)], &tracker, &timeouts).await;
		assert_eq!(report.phase, ShutdownPhase::Kill);
		assert_eq!(report.terminated, vec!["base".to_string()]);
		assert_eq!(report.killed, vec!["base".to_string()]);
		assert_eq!(process.status().await.pid, None);
	}
}
