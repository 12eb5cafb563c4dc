use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::sync::watch;

/// One-shot stop flag for a single process.
///
/// Closing is an atomic check-and-set, so concurrent closers cannot
/// double-close it and exactly one of them observes `true` from [`close`](Self::close).
#[derive(Debug)]
pub struct StopSignal {
	tx: watch::Sender<bool>,
}

impl StopSignal {
	pub fn new() -> Self {
		let (tx, _) = watch::channel(false);
		Self { tx }
	}

	/// Closes the signal. Returns `false` if it was already closed.
	pub fn close(&self) -> bool {
		self.tx.send_if_modified(|closed| {
			if *closed {
				false
			} else {
				*closed = true;
				true
			}
		})
	}

	pub fn is_closed(&self) -> bool {
		*self.tx.borrow()
	}

	/// Resolves once the signal is closed.
	pub async fn closed(&self) {
		let mut rx = self.tx.subscribe();
		let _ = rx.wait_for(|closed| *closed).await;
	}
}

impl Default for StopSignal {
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
	Terminate,
	Kill,
	/// Liveness query; delivers nothing to the process.
	Probe,
}

pub fn send_signal(pid: u32, signal: ProcessSignal) -> nix::Result<()> {
	// pid 0 would address our own process group, and anything above
	// i32::MAX would wrap to a negative pid and address a group too
	let raw = match i32::try_from(pid) {
		Ok(raw) if raw > 0 => raw,
		_ => return Err(Errno::ESRCH),
	};
	let sig = match signal {
		ProcessSignal::Terminate => Some(Signal::SIGTERM),
		ProcessSignal::Kill => Some(Signal::SIGKILL),
		ProcessSignal::Probe => None,
	};
	kill(Pid::from_raw(raw), sig)
}

pub fn is_alive(pid: u32) -> bool {
	send_signal(pid, ProcessSignal::Probe).is_ok()
}
