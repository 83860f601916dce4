use std::time::Duration;

use super::*;

async fn granted(acquire: &mut Acquire) -> Grant {
	tokio::time::timeout(Duration::from_secs(1), acquire)
		.await
		.expect("grant should be dispatched")
		.expect("lock should not be killed")
}

async fn still_pending(acquire: &mut Acquire) -> bool {
	tokio::time::timeout(Duration::from_millis(20), acquire).await.is_err()
}

async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
	for _ in 0..500 {
		if cond() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(2)).await;
	}
	panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn fast_path_grants_while_under_quota() {
	let lock = PriorityMultiLock::new(2, vec![1, 1]).expect("valid config");

	let first = lock.lock(0).expect("lock");
	let second = lock.lock(0).expect("lock");
	assert!(first.is_ready());
	assert!(second.is_ready());

	assert_eq!(lock.runners_count(), 2);
	assert_eq!(lock.runners_count_for(0), Some(2));
	assert_eq!(lock.available(), 0);
	assert_eq!(lock.waiters_count(), 0);
	// Fast-path grants never leave their weight pending.
	assert_eq!(lock.pending_weights(), 0);
	assert_eq!(lock.active_len(), 0);
}

#[tokio::test]
async fn over_quota_runners_keep_slots_and_release_dispatches_waiter() {
	let lock = PriorityMultiLock::new(2, vec![1, 1]).expect("valid config");
	let mut a = granted(&mut lock.lock(0).expect("lock")).await;
	let _b = granted(&mut lock.lock(0).expect("lock")).await;

	let mut waiter = lock.lock(1).expect("lock");
	assert!(!waiter.is_ready());
	assert_eq!(lock.waiters_count_for(1), Some(1));
	assert_eq!(lock.pending_weights(), 1);
	assert_eq!(lock.active_len(), 1);
	// Priority 0 is over its shrunken quota but keeps both slots.
	assert_eq!(lock.runners_count_for(0), Some(2));
	assert!(still_pending(&mut waiter).await);

	a.release();
	let grant = granted(&mut waiter).await;
	assert_eq!(grant.priority(), 1);
	assert_eq!(lock.runners_count_for(0), Some(1));
	assert_eq!(lock.runners_count_for(1), Some(1));
	assert_eq!(lock.waiters_count(), 0);
	assert_eq!(lock.pending_weights(), 0);
	assert_eq!(lock.active_len(), 0);
	assert_eq!(lock.available(), 0);
}

#[tokio::test]
async fn rejects_unknown_priority() {
	let lock = PriorityMultiLock::new(1, vec![1, 2, 3]).expect("valid config");
	assert_eq!(lock.max_priority(), 2);
	assert_eq!(lock.priority_count(), 3);
	assert_eq!(
		lock.lock(3).err(),
		Some(LockError::InvalidPriority {
			priority: 3,
			max_priority: 2
		})
	);
	assert_eq!(lock.runners_count_for(3), None);
	assert_eq!(lock.waiters_count_for(3), None);
}

#[tokio::test]
async fn rejects_invalid_construction() {
	assert!(matches!(PriorityMultiLock::new(0, vec![1]), Err(ConfigError::ZeroConcurrency)));
	assert!(matches!(PriorityMultiLock::new(1, vec![]), Err(ConfigError::EmptyWeights)));
	assert!(matches!(PriorityMultiLock::new(1, vec![1, 0]), Err(ConfigError::ZeroWeight { priority: 1 })));
	let lock = PriorityMultiLock::from_weight_str(3, "2, 5").expect("valid weights");
	assert_eq!(lock.priority_count(), 2);
	assert_eq!(lock.concurrency(), 3);
}

#[tokio::test]
async fn grants_follow_arrival_order_within_priority() {
	let lock = PriorityMultiLock::new(1, vec![1]).expect("valid config");
	let mut holder = granted(&mut lock.lock(0).expect("lock")).await;
	let mut queued: Vec<Acquire> = (0..5).map(|_| lock.lock(0).expect("lock")).collect();
	assert_eq!(lock.waiters_count(), 5);

	for next in queued.iter_mut() {
		holder.release();
		holder = granted(next).await;
	}
	assert_eq!(lock.waiters_count(), 0);
	assert_eq!(lock.runners_count(), 1);
}

#[tokio::test]
async fn abandoned_request_does_not_leak_a_slot() {
	let lock = PriorityMultiLock::new(1, vec![1]).expect("valid config");
	let mut holder = granted(&mut lock.lock(0).expect("lock")).await;
	let abandoned = lock.lock(0).expect("lock");
	let mut kept = lock.lock(0).expect("lock");
	drop(abandoned);

	holder.release();
	let grant = granted(&mut kept).await;
	assert!(grant.is_locked());
	assert_eq!(lock.runners_count(), 1);
	assert_eq!(lock.available(), 0);
	assert_eq!(lock.waiters_count(), 0);

	drop(grant);
	eventually("slot reclaimed", || lock.available() == 1).await;
	assert_eq!(lock.runners_count(), 0);
}

#[tokio::test]
async fn holder_releasing_immediately_is_reclaimed_once() {
	let lock = PriorityMultiLock::new(1, vec![1]).expect("valid config");
	let mut holder = granted(&mut lock.lock(0).expect("lock")).await;
	let waiter = lock.lock(0).expect("lock");
	let task = tokio::spawn(async move {
		let mut grant = waiter.await.expect("granted");
		grant.release();
	});

	holder.release();
	task.await.expect("holder task");
	eventually("slot reclaimed", || lock.available() == 1).await;
	assert_eq!(lock.runners_count(), 0);
	assert_eq!(lock.runners_count_for(0), Some(0));
}

#[tokio::test]
async fn double_release_does_not_double_free() {
	let lock = PriorityMultiLock::new(1, vec![1]).expect("valid config");
	let mut grant = granted(&mut lock.lock(0).expect("lock")).await;
	grant.release();
	grant.release();
	assert!(!grant.is_locked());
	drop(grant);

	eventually("slot reclaimed", || lock.available() == 1).await;
	tokio::time::sleep(Duration::from_millis(10)).await;
	assert_eq!(lock.available(), 1);
	assert_eq!(lock.runners_count(), 0);
}

#[tokio::test]
async fn kill_fails_queued_and_future_requests() {
	let lock = PriorityMultiLock::new(1, vec![1]).expect("valid config");
	let mut holder = granted(&mut lock.lock(0).expect("lock")).await;
	let waiter = lock.lock(0).expect("lock");

	lock.kill();
	assert_eq!(waiter.await.err(), Some(LockError::Killed));
	assert_eq!(lock.lock(0).err(), Some(LockError::Killed));
	assert!(lock.is_killed());
	assert!(lock.is_halted());
	assert_eq!(lock.waiters_count(), 0);

	// Releasing after the kill must not reopen dispatch.
	holder.release();
	eventually("holder reclaimed", || lock.runners_count_for(0) == Some(0)).await;
	assert_eq!(lock.runners_count(), 0);
	assert_eq!(lock.available(), 0);
	assert_eq!(lock.concurrency(), 0);

	lock.kill();
	assert!(lock.is_killed());
}

#[tokio::test]
async fn halt_leaves_waiters_queued_forever() {
	let lock = PriorityMultiLock::new(1, vec![1]).expect("valid config");
	let mut holder = granted(&mut lock.lock(0).expect("lock")).await;
	let mut waiter = lock.lock(0).expect("lock");

	lock.halt();
	lock.halt();
	assert!(lock.is_halted());
	assert!(!lock.is_killed());
	assert_eq!(lock.concurrency(), 0);
	assert_eq!(lock.available(), -1);
	assert_eq!(lock.runners_count(), 1);

	holder.release();
	eventually("holder reclaimed", || lock.runners_count() == 0).await;
	assert_eq!(lock.available(), 0);
	assert!(still_pending(&mut waiter).await);
	assert_eq!(lock.waiters_count(), 1);

	// New requests still queue, silently.
	let late = lock.lock(0).expect("halted lock still accepts requests");
	assert!(!late.is_ready());

	// Dropping the last handle kills the lock, which finally fails the waiters.
	drop(lock);
	assert_eq!(waiter.await.err(), Some(LockError::Killed));
	assert_eq!(late.await.err(), Some(LockError::Killed));
}

#[tokio::test]
async fn dispatcher_stops_on_halt() {
	let lock = PriorityMultiLock::new(2, vec![1]).expect("valid config");
	assert!(lock.is_dispatching());
	let dispatcher = lock.take_dispatcher().expect("dispatcher handle");
	lock.halt();
	let stop = tokio::time::timeout(Duration::from_secs(1), dispatcher)
		.await
		.expect("dispatcher exits")
		.expect("dispatcher does not panic");
	assert_eq!(stop, DispatchStop::Halted);
	assert!(!lock.is_dispatching());
}

#[tokio::test]
async fn clones_share_one_lock() {
	let lock = PriorityMultiLock::new(1, vec![1]).expect("valid config");
	let other = lock.clone();
	let mut holder = granted(&mut lock.lock(0).expect("lock")).await;
	let mut waiter = other.lock(0).expect("lock");
	drop(lock);

	holder.release();
	let grant = granted(&mut waiter).await;
	assert_eq!(other.runners_count(), 1);
	assert!(!other.is_killed());
	drop(grant);
}

#[tokio::test]
async fn outstanding_grant_keeps_dropped_lock_alive_until_released() {
	let lock = PriorityMultiLock::new(1, vec![1]).expect("valid config");
	let mut holder = granted(&mut lock.lock(0).expect("lock")).await;
	let mut waiter = lock.lock(0).expect("lock");
	lock.halt();
	drop(lock);

	// The release watcher still holds the lock, so nothing is torn down yet.
	assert!(still_pending(&mut waiter).await);

	holder.release();
	let outcome = tokio::time::timeout(Duration::from_secs(1), waiter).await.expect("waiter resolves");
	assert_eq!(outcome.err(), Some(LockError::Killed));
}

#[tokio::test]
async fn equal_weights_alternate_between_priorities() {
	let lock = PriorityMultiLock::new(2, vec![1, 1]).expect("valid config");
	let mut p0_first = granted(&mut lock.lock(0).expect("lock")).await;
	let mut p0_second = granted(&mut lock.lock(0).expect("lock")).await;

	let mut b1 = lock.lock(1).expect("lock");
	let mut b2 = lock.lock(1).expect("lock");
	let mut a1 = lock.lock(0).expect("lock");
	let mut a2 = lock.lock(0).expect("lock");
	assert_eq!(lock.pending_weights(), 2);

	p0_first.release();
	let mut g_b1 = granted(&mut b1).await;
	assert!(still_pending(&mut a1).await);

	p0_second.release();
	let mut g_a1 = granted(&mut a1).await;
	assert!(still_pending(&mut b2).await);

	g_b1.release();
	let _g_b2 = granted(&mut b2).await;
	assert_eq!(lock.waiters_count_for(1), Some(0));
	assert_eq!(lock.pending_weights(), 1);

	g_a1.release();
	let _g_a2 = granted(&mut a2).await;
	assert_eq!(lock.waiters_count(), 0);
	assert_eq!(lock.runners_count_for(0), Some(1));
	assert_eq!(lock.runners_count_for(1), Some(1));
}

#[tokio::test]
async fn snapshot_reports_quotas_of_waiting_priorities() {
	let lock = PriorityMultiLock::new(2, vec![1, 3]).expect("valid config");
	let _a = granted(&mut lock.lock(0).expect("lock")).await;
	let _b = granted(&mut lock.lock(0).expect("lock")).await;
	let _queued = lock.lock(1).expect("lock");

	let snapshot = lock.snapshot();
	assert_eq!(snapshot.running, 2);
	assert_eq!(snapshot.waiting, 1);
	assert_eq!(snapshot.pending_weights, 3);
	assert_eq!(
		snapshot.priorities[1],
		PrioritySnapshot {
			priority: 1,
			weight: 3,
			runners: 0,
			waiters: 1,
			capacity: 2,
		}
	);
	assert_eq!(snapshot.priorities[0].capacity, 0);

	let text = lock.to_string();
	assert!(text.contains("running=2 waiting=1 pendingWeights=3"), "{text}");
	assert!(text.contains("{priority=1 weight=3 run=0 wait=1 cap=2}"), "{text}");
}
