//! Dispatch loop and per-grant release watchers.

use std::sync::{Arc, Weak};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{LockShared, LockState};
use crate::capacity::capacity;
use crate::grant::{Grant, ReleaseWatch};
use crate::priority::Waiter;

/// Why the dispatch loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchStop {
	/// Halt or kill cancelled the loop, possibly in the middle of a pass.
	Halted,
	/// Every strong reference to the lock is gone.
	Released,
}

impl DispatchStop {
	const fn as_str(self) -> &'static str {
		match self {
			Self::Halted => "halted",
			Self::Released => "released",
		}
	}
}

/// Runs the dispatch loop until the lock is halted, killed or dropped.
///
/// Holds the lock only weakly between passes so an idle loop never keeps it
/// alive.
pub(super) async fn run(shared: Weak<LockShared>, wake: Arc<Notify>, stop: CancellationToken) -> DispatchStop {
	let reason = loop {
		// Registered before the pass: a release landing after the pass but
		// before the await below still wakes us.
		let notified = wake.notified();
		tokio::pin!(notified);
		notified.as_mut().enable();

		if stop.is_cancelled() {
			break DispatchStop::Halted;
		}
		let Some(lock) = shared.upgrade() else {
			break DispatchStop::Released;
		};
		let pass = lock.dispatch_pass();
		drop(lock);
		if let Err(reason) = pass {
			break reason;
		}

		tokio::select! {
			biased;
			_ = stop.cancelled() => break DispatchStop::Halted,
			_ = &mut notified => tracing::trace!("multilock.dispatch.wake"),
		}
	};
	tracing::debug!(reason = reason.as_str(), "multilock.dispatch.stop");
	reason
}

/// Waits for one grant to end, however it ends, then returns its slot.
pub(super) async fn watch_release(shared: Arc<LockShared>, priority: usize, watch: ReleaseWatch) {
	let kind = watch.released().await;
	tracing::trace!(priority, kind = kind.as_str(), "multilock.release");
	shared.reclaim(priority);
}

impl LockShared {
	/// Grants slots while any are free and anyone is waiting.
	///
	/// Returns `Err` when the lock was stopped part way through the pass.
	pub(super) fn dispatch_pass(self: &Arc<Self>) -> Result<(), DispatchStop> {
		let mut state = self.state.lock();
		while state.available > 0 && state.waiting > 0 {
			let Some((priority, waiter)) = state.next_waiter() else {
				tracing::warn!(state = %state.snapshot(), "multilock.dispatch.no_eligible_priority");
				break;
			};

			let (grant, mut watch) = Grant::new(priority);
			let delivered = waiter.deliver(grant).is_ok();

			if self.stop.is_cancelled() {
				return Err(DispatchStop::Halted);
			}

			// An abandoned request hands the grant straight back, and a holder on
			// another worker thread may already have released it.
			let already_released = watch.already_released();
			if !already_released {
				state.add_runner(priority);
				self.watch_release(priority, watch);
			}
			tracing::trace!(
				priority,
				delivered,
				already_released,
				available = state.available,
				waiting = state.waiting,
				"multilock.dispatch.granted"
			);
		}
		Ok(())
	}
}

impl LockState {
	/// Picks the next priority with waiters and spare quota, round-robin from
	/// the last pick, and pops its oldest waiter.
	fn next_waiter(&mut self) -> Option<(usize, Waiter)> {
		let pending_weights = self.pending_weights;
		let concurrency = self.concurrency;
		let priorities = &self.priorities;
		let priority = self.active.find_next(|p| {
			let record = &priorities[p];
			record.has_waiters() && record.runners < capacity(record.weight, pending_weights, concurrency)
		})?;

		let record = &mut self.priorities[priority];
		let waiter = record.pop_waiter()?;
		let emptied = !record.has_waiters();
		let weight = record.weight;
		self.waiting -= 1;
		if emptied {
			self.active.remove_current();
			self.pending_weights -= u64::from(weight);
			tracing::trace!(priority, pending_weights = self.pending_weights, "multilock.dispatch.emptied");
		}
		Some((priority, waiter))
	}
}
