use std::future::Future;
use std::sync::OnceLock;

use tokio::task::JoinHandle;

/// Background task kinds spawned by a lock, used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskRole {
	/// The long-lived loop matching free slots to queued waiters.
	Dispatcher,
	/// Per-grant watcher that reclaims the slot once the grant is released.
	ReleaseWatch,
}

impl TaskRole {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Dispatcher => "dispatcher",
			Self::ReleaseWatch => "release_watch",
		}
	}
}

fn runtime_handle() -> tokio::runtime::Handle {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return handle;
	}

	static FALLBACK_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = FALLBACK_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("slotgate-multilock")
			.build()
			.expect("failed to build slotgate-multilock fallback tokio runtime")
	});
	runtime.handle().clone()
}

/// Spawns a lock background task on the current tokio runtime, or on a shared
/// fallback runtime when called outside of one.
pub fn spawn<F>(role: TaskRole, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(role = role.as_str(), "worker.spawn");
	runtime_handle().spawn(fut)
}
