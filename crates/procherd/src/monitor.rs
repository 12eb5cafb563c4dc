//! Per-process monitor task.
//!
//! ```text
//! Launching -> Running -> RestartPending -> Launching ...
//!                      -> Terminated(Clean | Exhausted | Stopped)
//! ```
//!
//! A monitor owns its `Child`. Other parties reach the process only through
//! the PID recorded in the runtime state and the process's stop signal.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::process::{Child, Command};

use crate::error::ProcessError;
use crate::policy::{self, AttemptOutcome, RestartDecision};
use crate::relay::{OutputRelay, Stream};
use crate::signal::{self, ProcessSignal};
use crate::state::{ManagedProcess, MonitorState, TerminationReason};
use crate::supervisor::Supervisor;

/// The generation a monitor starts from.
pub(crate) enum Generation {
	/// Nothing launched yet.
	Pending,
	/// Launched by the caller and handed over.
	Running(Child),
}

enum Attempt {
	Exited(io::Result<ExitStatus>),
	SpawnFailed(io::Error),
	Stopped,
}

/// Dispatches a dependent: launches it only if its dependency holds a live
/// process right now. The check is a snapshot and is not re-validated.
pub(crate) async fn dispatch_dependent(supervisor: Arc<Supervisor>, process: Arc<ManagedProcess>) {
	let depends_on = &process.spec.depends_on;
	let live = match supervisor.process(depends_on).await {
		Some(dep) => dep.live_pid().await.is_some(),
		None => false,
	};

	if !live {
		let err = ProcessError::DependencyUnavailable {
			depends_on: depends_on.clone(),
		};
		tracing::warn!(process = %process.name(), kind = err.as_label(), "not starting: {}", err);
		process
			.set_state(MonitorState::Terminated(TerminationReason::DependencyUnavailable))
			.await;
		return;
	}

	run(supervisor, process, Generation::Pending).await;
}

pub(crate) async fn run(supervisor: Arc<Supervisor>, process: Arc<ManagedProcess>, first: Generation) {
	let name = process.name().to_string();
	let mut next = first;

	loop {
		let attempt = match std::mem::replace(&mut next, Generation::Pending) {
			Generation::Pending => launch_and_supervise(&supervisor, &process).await,
			Generation::Running(child) => supervise(&supervisor, &process, child).await,
		};

		let (outcome, failure) = match attempt {
			Attempt::Stopped => {
				tracing::info!(process = %name, "monitor stopped");
				process.set_state(MonitorState::Terminated(TerminationReason::Stopped)).await;
				return;
			}
			Attempt::Exited(Ok(status)) if status.success() => (AttemptOutcome::Clean, None),
			Attempt::Exited(Ok(status)) => (AttemptOutcome::Failed, Some(ProcessError::Exit(status))),
			Attempt::Exited(Err(e)) => (AttemptOutcome::Failed, Some(ProcessError::Wait(e))),
			Attempt::SpawnFailed(e) => (AttemptOutcome::Failed, Some(ProcessError::Spawn(e))),
		};

		if supervisor.is_stopping().await || process.stop.is_closed() {
			process.set_state(MonitorState::Terminated(TerminationReason::Stopped)).await;
			return;
		}

		if let Some(err) = &failure {
			tracing::warn!(process = %name, kind = err.as_label(), "{}", err);
		}

		let (decision, cooldown) = {
			let mut runtime = process.runtime.lock().await;
			let decision = policy::decide(outcome, process.spec.max_restarts, runtime.restarts);
			match decision {
				RestartDecision::Restart { attempt } => {
					runtime.restarts = attempt;
					runtime.state = MonitorState::RestartPending;
				}
				RestartDecision::Finished => {
					runtime.state = MonitorState::Terminated(TerminationReason::Clean);
				}
				RestartDecision::Exhausted => {
					runtime.state = MonitorState::Terminated(TerminationReason::Exhausted);
				}
			}
			(decision, process.spec.restart_cooldown)
		};

		match decision {
			RestartDecision::Restart { attempt } => {
				tracing::info!(process = %name, attempt, cooldown = ?cooldown, "restarting");
				if !sleep_unless_stopped(&supervisor, &process, cooldown).await {
					process.set_state(MonitorState::Terminated(TerminationReason::Stopped)).await;
					return;
				}
			}
			RestartDecision::Finished => {
				tracing::info!(process = %name, "exited cleanly");
				if process.spec.is_base() {
					supervisor.cascade_terminate(&name).await;
				}
				return;
			}
			RestartDecision::Exhausted => {
				tracing::warn!(
					process = %name,
					max_restarts = process.spec.max_restarts,
					"restart budget exhausted, giving up"
				);
				if process.spec.is_base() {
					supervisor.cascade_terminate(&name).await;
				}
				return;
			}
		}
	}
}

async fn launch_and_supervise(supervisor: &Supervisor, process: &ManagedProcess) -> Attempt {
	if supervisor.cancel_token().is_cancelled() || process.stop.is_closed() {
		return Attempt::Stopped;
	}
	process.set_state(MonitorState::Launching).await;

	match launch(supervisor, process).await {
		Ok((child, superseded)) => {
			// previous generation's output must be fully written first
			for relay in &superseded {
				relay.wait().await;
			}
			supervise(supervisor, process, child).await
		}
		Err(e) => {
			tracing::warn!(process = %process.name(), error = %e, "spawn failed");
			if sleep_unless_stopped(supervisor, process, supervisor.config().spawn_retry_delay).await {
				Attempt::SpawnFailed(e)
			} else {
				Attempt::Stopped
			}
		}
	}
}

/// Spawns a new generation with fresh relays and records it as running.
/// Returns the child and the relays of the generation it replaces.
pub(crate) async fn launch(
	supervisor: &Supervisor,
	process: &ManagedProcess,
) -> io::Result<(Child, Vec<OutputRelay>)> {
	let spec = &process.spec;
	let mut child = Command::new(&spec.executable)
		.args(&spec.args)
		.envs(&spec.env)
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.spawn()?;

	let pid = child.id().unwrap_or(0);
	let config = supervisor.config();
	let prefix = config.tags.prefix(&spec.name);

	let mut relays = Vec::with_capacity(2);
	if let Some(stdout) = child.stdout.take() {
		relays.push(OutputRelay::spawn(stdout, config.stdout.clone(), prefix.clone(), Stream::Stdout));
	}
	if let Some(stderr) = child.stderr.take() {
		relays.push(OutputRelay::spawn(stderr, config.stderr.clone(), prefix, Stream::Stderr));
	}

	let superseded = {
		let mut runtime = process.runtime.lock().await;
		runtime.pid = Some(pid);
		runtime.launches += 1;
		runtime.state = MonitorState::Running { pid };

		// a stop that landed while we were spawning found no pid to signal
		if process.stop.is_closed() || supervisor.cancel_token().is_cancelled() {
			tracing::info!(process = %spec.name, pid, "stop requested during launch, sending SIGTERM");
			if let Err(e) = signal::send_signal(pid, ProcessSignal::Terminate) {
				tracing::debug!(process = %spec.name, pid, error = %e, "SIGTERM failed");
			}
		}
		std::mem::replace(&mut runtime.relays, relays)
	};

	tracing::info!(process = %spec.name, pid, "started");
	Ok((child, superseded))
}

async fn supervise(supervisor: &Supervisor, process: &ManagedProcess, mut child: Child) -> Attempt {
	let exited = tokio::select! {
		status = child.wait() => Some(status),
		_ = process.stop.closed() => None,
		_ = supervisor.cancel_token().cancelled() => None,
	};

	match exited {
		Some(status) => {
			process.mark_exited().await;
			Attempt::Exited(status)
		}
		None => {
			// reap the child before giving up the handle
			let status = child.wait().await;
			process.mark_exited().await;
			tracing::debug!(process = %process.name(), ?status, "exited after stop");
			Attempt::Stopped
		}
	}
}

/// Sleeps for `duration`; returns `false` if the stop signal or fleet
/// cancellation fired first.
async fn sleep_unless_stopped(
	supervisor: &Supervisor,
	process: &ManagedProcess,
	duration: std::time::Duration,
) -> bool {
	tokio::select! {
		_ = tokio::time::sleep(duration) => true,
		_ = process.stop.closed() => false,
		_ = supervisor.cancel_token().cancelled() => false,
	}
}
