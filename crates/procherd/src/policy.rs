//! Restart decision for a process whose latest attempt has ended.

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
	/// Exited with a success status.
	Clean,
	/// Exited abnormally, could not be waited on, or failed to spawn.
	Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
	/// Restart; carries the counter value after this restart.
	Restart { attempt: u32 },
	/// Clean exit. Never restarted.
	Finished,
	/// Budget used up.
	Exhausted,
}

/// Decides what happens after an attempt, given the budget (`0` = unbounded)
/// and the number of restarts already performed.
pub fn decide(outcome: AttemptOutcome, max_restarts: u32, restarts: u32) -> RestartDecision {
	match outcome {
		AttemptOutcome::Clean => RestartDecision::Finished,
		AttemptOutcome::Failed if max_restarts > 0 && restarts >= max_restarts => {
			RestartDecision::Exhausted
		}
		AttemptOutcome::Failed => RestartDecision::Restart {
			attempt: restarts.saturating_add(1),
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bounded_budget_allows_exactly_n_restarts() {
		let mut restarts = 0;
		for _ in 0..3 {
			match decide(AttemptOutcome::Failed, 3, restarts) {
				RestartDecision::Restart { attempt } => restarts = attempt,
				other => panic!("unexpected {:?}", other),
			}
		}
		assert_eq!(restarts, 3);
		assert_eq!(decide(AttemptOutcome::Failed, 3, restarts), RestartDecision::Exhausted);
	}

	#[test]
	fn zero_budget_is_unbounded() {
		let mut restarts = 0;
		for _ in 0..100 {
			match decide(AttemptOutcome::Failed, 0, restarts) {
				RestartDecision::Restart { attempt } => restarts = attempt,
				other => panic!("unexpected {:?}", other),
			}
		}
		assert_eq!(restarts, 100);
	}

	#[test]
	fn clean_exit_never_restarts() {
		assert_eq!(decide(AttemptOutcome::Clean, 5, 0), RestartDecision::Finished);
		assert_eq!(decide(AttemptOutcome::Clean, 0, 0), RestartDecision::Finished);
	}
}
