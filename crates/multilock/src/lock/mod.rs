//! The lock facade and its shared scheduling state.
//!
//! Scheduling rule, with `pending_weights` the summed weight of every priority
//! that has at least one waiter: a priority may receive a new grant while its
//! runner count is below `ceil(weight / pending_weights * concurrency)`. A
//! priority's weight joins `pending_weights` when its queue becomes non-empty
//! and leaves it when the queue drains. Runners above a shrunken quota keep
//! their slots; the quota only gates new grants.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::active::ActivePriorities;
use crate::capacity::capacity;
use crate::config::{MultiLockConfig, WeightTable};
use crate::error::{ConfigError, LockError, LockResult};
use crate::grant::{Acquire, Grant, ReleaseWatch};
use crate::priority::{PriorityRecord, Waiter};
use crate::spawn::{TaskRole, spawn};

mod dispatch;

use dispatch::DispatchStop;

/// Multi-holder lock with a concurrency limit, shared between weighted priorities.
///
/// Priorities are the dense indices `0..=max_priority()`; the index says
/// nothing about importance, only the configured weight does. Slots go to the
/// priorities that currently have waiters in proportion to their weights, and
/// to waiters of one priority in arrival order.
///
/// Cloning yields another handle to the same lock. The lock is killed when
/// the last handle, outstanding grant watcher, or in-flight dispatch pass lets
/// go of it.
///
/// ```no_run
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// use slotgate_multilock::PriorityMultiLock;
///
/// let lock = PriorityMultiLock::new(4, vec![1, 3])?;
/// let mut grant = lock.lock(1)?.await?;
/// // ... bounded work ...
/// grant.release(); // or just drop it
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PriorityMultiLock {
	shared: Arc<LockShared>,
}

pub(crate) struct LockShared {
	state: Mutex<LockState>,
	/// Wakes the dispatch loop after a slot is freed while waiters exist.
	wake: Arc<Notify>,
	/// Cancelled by halt and kill; stops the dispatch loop.
	stop: CancellationToken,
}

struct LockState {
	/// Slots shared across priorities. Zeroed by halt.
	concurrency: usize,
	/// Free slots. Goes negative after halt while holders are outstanding.
	available: i64,
	/// Waiters across all priorities.
	waiting: usize,
	/// Summed weight of priorities with at least one waiter.
	pending_weights: u64,
	halted: bool,
	killed: bool,
	dispatcher: Option<JoinHandle<DispatchStop>>,
	priorities: Vec<PriorityRecord>,
	active: ActivePriorities,
}

/// What `lock()` did with a request.
enum Admission {
	Granted(Grant, ReleaseWatch),
	Queued(Acquire),
}

impl PriorityMultiLock {
	/// Creates a lock with `concurrency` slots and one priority per weight.
	pub fn new(concurrency: usize, weights: Vec<u32>) -> Result<Self, ConfigError> {
		Self::from_config(&MultiLockConfig::new(concurrency, WeightTable::new(weights)?)?)
	}

	/// Creates a lock from a comma separated weight list such as `"1,2,4"`.
	pub fn from_weight_str(concurrency: usize, weights: &str) -> Result<Self, ConfigError> {
		Self::from_config(&MultiLockConfig::new(concurrency, weights.parse()?)?)
	}

	/// Creates a lock from a validated configuration.
	///
	/// Starts the dispatch loop on the current tokio runtime, or on a shared
	/// fallback runtime when called outside of one.
	pub fn from_config(config: &MultiLockConfig) -> Result<Self, ConfigError> {
		config.validate()?;
		let priorities = config.weights.as_slice().iter().map(|&w| PriorityRecord::new(w)).collect();
		let shared = Arc::new(LockShared {
			state: Mutex::new(LockState {
				concurrency: config.concurrency,
				available: config.concurrency as i64,
				waiting: 0,
				pending_weights: 0,
				halted: false,
				killed: false,
				dispatcher: None,
				priorities,
				active: ActivePriorities::new(),
			}),
			wake: Arc::new(Notify::new()),
			stop: CancellationToken::new(),
		});

		let dispatcher = spawn(
			TaskRole::Dispatcher,
			dispatch::run(Arc::downgrade(&shared), Arc::clone(&shared.wake), shared.stop.clone()),
		);
		shared.state.lock().dispatcher = Some(dispatcher);

		tracing::debug!(
			concurrency = config.concurrency,
			weights = %config.weights,
			"multilock.new"
		);
		Ok(Self { shared })
	}

	/// Requests a slot for `priority`.
	///
	/// Fails immediately with [`LockError::Killed`] after [`kill`](Self::kill),
	/// and with [`LockError::InvalidPriority`] for an unknown priority.
	/// Otherwise the returned [`Acquire`] is either already granted (a slot was
	/// free, the priority was under its quota and had nobody queued ahead) or
	/// resolves once the dispatch loop grants it.
	pub fn lock(&self, priority: usize) -> LockResult<Acquire> {
		let admission = {
			let mut state = self.shared.state.lock();
			if state.killed {
				return Err(LockError::Killed);
			}
			if priority >= state.priorities.len() {
				return Err(LockError::InvalidPriority {
					priority,
					max_priority: state.priorities.len() - 1,
				});
			}
			let admission = state.admit(priority);
			match admission {
				Admission::Granted(..) => tracing::debug!(priority, available = state.available, "multilock.lock.granted"),
				Admission::Queued(_) => tracing::debug!(
					priority,
					available = state.available,
					waiting = state.waiting,
					pending_weights = state.pending_weights,
					"multilock.lock.queued"
				),
			}
			admission
		};

		match admission {
			Admission::Granted(grant, watch) => {
				self.shared.watch_release(priority, watch);
				Ok(Acquire::ready(grant))
			}
			Admission::Queued(acquire) => Ok(acquire),
		}
	}

	/// Stops handing out grants.
	///
	/// Current holders keep their slots, but slots they free are not reused.
	/// Queued and future waiters are never resolved. Calling it again is a no-op.
	pub fn halt(&self) {
		let mut state = self.shared.state.lock();
		state.halt(&self.shared.stop);
		tracing::debug!(state = %state.snapshot(), "multilock.halt");
	}

	/// Halts the lock and fails every queued waiter with [`LockError::Killed`].
	///
	/// Later `lock()` calls fail with `Killed` as well. Calling it again is a no-op.
	pub fn kill(&self) {
		self.shared.kill();
	}

	/// Highest valid priority index.
	pub fn max_priority(&self) -> usize {
		self.shared.state.lock().priorities.len() - 1
	}

	/// Number of priorities.
	pub fn priority_count(&self) -> usize {
		self.shared.state.lock().priorities.len()
	}

	/// Configured slot count; 0 once halted.
	pub fn concurrency(&self) -> usize {
		self.shared.state.lock().concurrency
	}

	/// Free slots. Negative after halt while holders are outstanding.
	pub fn available(&self) -> i64 {
		self.shared.state.lock().available
	}

	/// Slots currently held across all priorities.
	pub fn runners_count(&self) -> usize {
		self.shared.state.lock().runners()
	}

	/// Slots currently held by `priority`.
	pub fn runners_count_for(&self, priority: usize) -> Option<usize> {
		self.shared.state.lock().priorities.get(priority).map(|p| p.runners)
	}

	/// Queued waiters across all priorities.
	pub fn waiters_count(&self) -> usize {
		self.shared.state.lock().waiting
	}

	/// Queued waiters at `priority`.
	pub fn waiters_count_for(&self, priority: usize) -> Option<usize> {
		self.shared.state.lock().priorities.get(priority).map(PriorityRecord::waiters)
	}

	/// Summed weight of the priorities that currently have waiters.
	pub fn pending_weights(&self) -> u64 {
		self.shared.state.lock().pending_weights
	}

	pub fn is_halted(&self) -> bool {
		self.shared.state.lock().halted
	}

	pub fn is_killed(&self) -> bool {
		self.shared.state.lock().killed
	}

	/// `true` while the dispatch loop task is alive.
	pub fn is_dispatching(&self) -> bool {
		self.shared.state.lock().dispatcher.as_ref().is_some_and(|handle| !handle.is_finished())
	}

	/// Point-in-time view of the scheduler state.
	pub fn snapshot(&self) -> LockSnapshot {
		self.shared.state.lock().snapshot()
	}

	#[cfg(test)]
	fn take_dispatcher(&self) -> Option<JoinHandle<DispatchStop>> {
		self.shared.state.lock().dispatcher.take()
	}

	#[cfg(test)]
	fn active_len(&self) -> usize {
		self.shared.state.lock().active.len()
	}
}

impl fmt::Debug for PriorityMultiLock {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("PriorityMultiLock").field(&self.snapshot()).finish()
	}
}

impl fmt::Display for PriorityMultiLock {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&self.snapshot(), f)
	}
}

impl LockShared {
	/// Spawns the watcher that returns a granted slot once `watch` fires.
	fn watch_release(self: &Arc<Self>, priority: usize, watch: ReleaseWatch) {
		spawn(TaskRole::ReleaseWatch, dispatch::watch_release(Arc::clone(self), priority, watch));
	}

	/// Hands a freed slot back and wakes the dispatch loop if anyone is waiting.
	fn reclaim(&self, priority: usize) {
		let wake = {
			let mut state = self.state.lock();
			state.available += 1;
			if let Some(record) = state.priorities.get_mut(priority) {
				record.runners = record.runners.saturating_sub(1);
			}
			state.waiting > 0
		};
		if wake {
			self.wake.notify_waiters();
		}
	}

	fn kill(&self) {
		let drained = {
			let mut state = self.state.lock();
			if state.killed {
				return;
			}
			// Set before halting so nothing observes a halted but enterable lock.
			state.killed = true;
			state.halt(&self.stop);
			state.drain_waiters()
		};
		tracing::debug!(failed_waiters = drained.len(), "multilock.kill");
		// Dropping the senders resolves every waiter with `Killed`.
		drop(drained);
	}
}

impl Drop for LockShared {
	fn drop(&mut self) {
		self.kill();
	}
}

impl LockState {
	fn runners(&self) -> usize {
		usize::try_from(self.concurrency as i64 - self.available).unwrap_or(0)
	}

	fn capacity_of(&self, weight: u32) -> usize {
		capacity(weight, self.pending_weights, self.concurrency)
	}

	fn admit(&mut self, priority: usize) -> Admission {
		let weight = self.priorities[priority].weight;
		if !self.priorities[priority].has_waiters() {
			// Count this priority as pending so the quota below includes it.
			self.pending_weights += u64::from(weight);
			if self.available > 0 && self.priorities[priority].runners < self.capacity_of(weight) {
				// The queue stays empty, so the weight is not pending after all.
				self.pending_weights -= u64::from(weight);
				self.add_runner(priority);
				let (grant, watch) = Grant::new(priority);
				return Admission::Granted(grant, watch);
			}
			self.active.push(priority);
		}

		let (waiter, rx) = Waiter::new();
		self.priorities[priority].push_waiter(waiter);
		self.waiting += 1;
		Admission::Queued(Acquire::waiting(rx))
	}

	fn add_runner(&mut self, priority: usize) {
		self.priorities[priority].runners += 1;
		self.available -= 1;
	}

	fn halt(&mut self, stop: &CancellationToken) {
		stop.cancel();
		if !self.halted {
			self.halted = true;
			// Slots freed from here on must not become available again.
			self.available -= self.concurrency as i64;
			self.concurrency = 0;
		}
		self.active.clear();
	}

	/// Empties every queue, returning the waiters unresolved.
	fn drain_waiters(&mut self) -> Vec<Waiter> {
		let drained: Vec<_> = self.priorities.iter_mut().flat_map(PriorityRecord::take_waiters).collect();
		self.waiting = 0;
		self.pending_weights = 0;
		drained
	}

	fn snapshot(&self) -> LockSnapshot {
		LockSnapshot {
			concurrency: self.concurrency,
			available: self.available,
			running: self.runners(),
			waiting: self.waiting,
			pending_weights: self.pending_weights,
			halted: self.halted,
			killed: self.killed,
			priorities: self
				.priorities
				.iter()
				.enumerate()
				.map(|(priority, record)| PrioritySnapshot {
					priority,
					weight: record.weight,
					runners: record.runners,
					waiters: record.waiters(),
					capacity: if record.has_waiters() { self.capacity_of(record.weight) } else { 0 },
				})
				.collect(),
		}
	}
}

/// Point-in-time view of a [`PriorityMultiLock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSnapshot {
	pub concurrency: usize,
	pub available: i64,
	pub running: usize,
	pub waiting: usize,
	pub pending_weights: u64,
	pub halted: bool,
	pub killed: bool,
	pub priorities: Vec<PrioritySnapshot>,
}

/// Per-priority part of a [`LockSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrioritySnapshot {
	pub priority: usize,
	pub weight: u32,
	pub runners: usize,
	pub waiters: usize,
	/// Current quota; 0 while the priority has no waiters.
	pub capacity: usize,
}

impl fmt::Display for LockSnapshot {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{{ concurrency={} available={} running={} waiting={} pendingWeights={} ",
			self.concurrency, self.available, self.running, self.waiting, self.pending_weights
		)?;
		if self.killed {
			f.write_str("killed ")?;
		} else if self.halted {
			f.write_str("halted ")?;
		}
		for p in &self.priorities {
			write!(f, "{p} ")?;
		}
		f.write_str("}")
	}
}

impl fmt::Display for PrioritySnapshot {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{{priority={} weight={} run={} wait={} cap={}}}",
			self.priority, self.weight, self.runners, self.waiters, self.capacity
		)
	}
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests;
