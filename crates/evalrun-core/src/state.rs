use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};

use crate::error::EvalError;
use crate::types::RunStatus;

/// Status of one run, shared between the scheduler and observers.
///
/// Transitions are compare-and-swap and only move forward:
/// `idle -> pending -> running -> {completed, failed, aborted}`. `failed` and
/// `aborted` may also be reached from `idle`/`pending`. Terminal states never
/// change again.
#[derive(Debug)]
pub struct RunStateMachine {
	status: AtomicU8,
	started_at: OnceLock<DateTime<Utc>>,
	finished_at: OnceLock<DateTime<Utc>>,
}

impl Default for RunStateMachine {
	fn default() -> Self {
		Self::new(RunStatus::Idle)
	}
}

impl RunStateMachine {
	pub fn new(initial: RunStatus) -> Self {
		Self {
			status: AtomicU8::new(initial.to_u8()),
			started_at: OnceLock::new(),
			finished_at: OnceLock::new(),
		}
	}

	pub fn status(&self) -> RunStatus {
		RunStatus::from_u8(self.status.load(Ordering::Acquire)).unwrap_or_default()
	}

	pub fn started_at(&self) -> Option<DateTime<Utc>> {
		self.started_at.get().copied()
	}

	pub fn finished_at(&self) -> Option<DateTime<Utc>> {
		self.finished_at.get().copied()
	}

	pub fn is_terminal(&self) -> bool {
		self.status().is_terminal()
	}

	/// Moves to `to` if that is a legal step from the current status.
	pub fn transition(&self, to: RunStatus) -> Result<RunStatus, EvalError> {
		let mut current = self.status.load(Ordering::Acquire);
		loop {
			let from = RunStatus::from_u8(current).unwrap_or_default();
			if !allowed(from, to) {
				return Err(EvalError::IllegalTransition { from, to });
			}
			match self
				.status
				.compare_exchange(current, to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
			{
				Ok(_) => {
					let now = Utc::now();
					if to == RunStatus::Running {
						let _ = self.started_at.set(now);
					}
					if to.is_terminal() {
						let _ = self.finished_at.set(now);
					}
					tracing::debug!(from = from.as_str(), to = to.as_str(), "run status changed");
					return Ok(from);
				}
				Err(actual) => current = actual,
			}
		}
	}
}

fn allowed(from: RunStatus, to: RunStatus) -> bool {
	use RunStatus::*;
	match (from, to) {
		(Idle, Pending) | (Pending, Running) => true,
		(Running, Completed) => true,
		(Idle | Pending | Running, Failed | Aborted) => true,
		_ => false,
	}
}
