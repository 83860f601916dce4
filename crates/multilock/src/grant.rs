//! Grant tokens and the pending-grant future returned by `lock()`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::{LockError, LockResult};

/// One held execution slot.
///
/// The slot is handed back by [`Grant::release`] or by dropping the grant,
/// whichever happens first. Releasing more than once is a no-op.
pub struct Grant {
	priority: usize,
	release: Option<oneshot::Sender<()>>,
}

impl Grant {
	/// Creates a grant and the watch its release handler waits on.
	pub(crate) fn new(priority: usize) -> (Self, ReleaseWatch) {
		let (tx, rx) = oneshot::channel();
		(Self { priority, release: Some(tx) }, ReleaseWatch { rx })
	}

	/// Priority this slot was granted to.
	pub fn priority(&self) -> usize {
		self.priority
	}

	/// Returns the slot to the lock.
	pub fn release(&mut self) {
		if let Some(tx) = self.release.take() {
			let _ = tx.send(());
		}
	}

	/// `true` until the grant has been released.
	pub fn is_locked(&self) -> bool {
		self.release.as_ref().is_some_and(|tx| !tx.is_closed())
	}
}

impl fmt::Debug for Grant {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Grant")
			.field("priority", &self.priority)
			.field("locked", &self.is_locked())
			.finish()
	}
}

/// How a grant stopped being held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseKind {
	Explicit,
	Dropped,
}

impl ReleaseKind {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Explicit => "explicit",
			Self::Dropped => "dropped",
		}
	}
}

/// Receiving half of a grant's release signal.
pub(crate) struct ReleaseWatch {
	rx: oneshot::Receiver<()>,
}

impl ReleaseWatch {
	/// Whether the grant was already released or dropped.
	///
	/// Consumes a pending release value, so a watch that reports `true` must not
	/// be awaited afterwards.
	pub(crate) fn already_released(&mut self) -> bool {
		!matches!(self.rx.try_recv(), Err(TryRecvError::Empty))
	}

	/// Waits until the grant is released, either way.
	pub(crate) async fn released(self) -> ReleaseKind {
		match self.rx.await {
			Ok(()) => ReleaseKind::Explicit,
			Err(_) => ReleaseKind::Dropped,
		}
	}
}

/// Request handle returned by [`PriorityMultiLock::lock`](crate::PriorityMultiLock::lock).
///
/// Resolves to a [`Grant`] once a slot is assigned, or to [`LockError::Killed`]
/// if the lock is killed first. Dropping an unresolved `Acquire` abandons the
/// request: it stays queued, and the slot it is eventually dispatched is
/// handed straight back.
#[must_use = "dropping an Acquire abandons the request"]
pub struct Acquire {
	state: AcquireState,
}

enum AcquireState {
	Ready(Option<Grant>),
	Waiting(oneshot::Receiver<Grant>),
}

impl Acquire {
	pub(crate) fn ready(grant: Grant) -> Self {
		Self {
			state: AcquireState::Ready(Some(grant)),
		}
	}

	pub(crate) fn waiting(rx: oneshot::Receiver<Grant>) -> Self {
		Self {
			state: AcquireState::Waiting(rx),
		}
	}

	/// `true` when the slot was granted without queueing.
	pub fn is_ready(&self) -> bool {
		matches!(self.state, AcquireState::Ready(Some(_)))
	}
}

impl fmt::Debug for Acquire {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Acquire").field("ready", &self.is_ready()).finish()
	}
}

impl Future for Acquire {
	type Output = LockResult<Grant>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match &mut self.state {
			AcquireState::Ready(grant) => match grant.take() {
				Some(grant) => Poll::Ready(Ok(grant)),
				None => panic!("`Acquire` polled after completion"),
			},
			AcquireState::Waiting(rx) => Pin::new(rx).poll(cx).map(|res| res.map_err(|_| LockError::Killed)),
		}
	}
}
