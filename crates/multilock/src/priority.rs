//! Per-priority bookkeeping: weight, runner count and the FIFO of waiters.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::grant::Grant;

/// A queued request waiting for the dispatch loop to grant it a slot.
pub(crate) struct Waiter {
	tx: oneshot::Sender<Grant>,
}

impl Waiter {
	pub(crate) fn new() -> (Self, oneshot::Receiver<Grant>) {
		let (tx, rx) = oneshot::channel();
		(Self { tx }, rx)
	}

	/// Hands `grant` to the requester. Gives it back if the requester is gone.
	pub(crate) fn deliver(self, grant: Grant) -> Result<(), Grant> {
		self.tx.send(grant)
	}
}

/// State of one priority class, stored in an arena indexed by priority.
pub(crate) struct PriorityRecord {
	pub(crate) weight: u32,
	/// Slots currently held by this priority.
	pub(crate) runners: usize,
	queue: VecDeque<Waiter>,
}

impl PriorityRecord {
	pub(crate) fn new(weight: u32) -> Self {
		Self {
			weight,
			runners: 0,
			queue: VecDeque::new(),
		}
	}

	pub(crate) fn has_waiters(&self) -> bool {
		!self.queue.is_empty()
	}

	pub(crate) fn waiters(&self) -> usize {
		self.queue.len()
	}

	pub(crate) fn push_waiter(&mut self, waiter: Waiter) {
		self.queue.push_back(waiter);
	}

	pub(crate) fn pop_waiter(&mut self) -> Option<Waiter> {
		self.queue.pop_front()
	}

	/// Removes every waiter without resolving it.
	pub(crate) fn take_waiters(&mut self) -> VecDeque<Waiter> {
		std::mem::take(&mut self.queue)
	}
}
