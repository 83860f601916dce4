/// Slot quota of a priority with `weight` while the priorities that currently
/// have waiters sum to `pending_weights`.
///
/// Computes `ceil(weight / pending_weights * concurrency)` in integer arithmetic,
/// so any demanding priority gets at least one slot whenever `concurrency > 0`.
/// Only meaningful while the priority itself has waiters (`pending_weights >= weight`);
/// returns 0 when nothing is pending.
pub fn capacity(weight: u32, pending_weights: u64, concurrency: usize) -> usize {
	if pending_weights == 0 {
		return 0;
	}
	let scaled = u64::from(weight).saturating_mul(concurrency as u64);
	usize::try_from(scaled.div_ceil(pending_weights)).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	#[test]
	fn lone_priority_gets_everything() {
		assert_eq!(capacity(1, 1, 4), 4);
		assert_eq!(capacity(7, 7, 3), 3);
	}

	#[test]
	fn shares_round_up() {
		// 1 of 4 pending weight over 4 slots.
		assert_eq!(capacity(1, 4, 4), 1);
		assert_eq!(capacity(3, 4, 4), 3);
		// 1/3 of 2 slots rounds up to 1.
		assert_eq!(capacity(1, 3, 2), 1);
		assert_eq!(capacity(2, 3, 2), 2);
	}

	#[test]
	fn zero_when_idle_or_halted() {
		assert_eq!(capacity(5, 0, 10), 0);
		assert_eq!(capacity(5, 5, 0), 0);
	}

	proptest! {
		#[test]
		fn demanding_priority_always_gets_a_slot(weight in 1u32..1000, extra in 0u64..10_000, concurrency in 1usize..256) {
			let cap = capacity(weight, u64::from(weight) + extra, concurrency);
			prop_assert!(cap >= 1);
			prop_assert!(cap <= concurrency);
		}

		#[test]
		fn quotas_cover_concurrency(weights in prop::collection::vec(1u32..100, 1..8), concurrency in 1usize..64) {
			let total: u64 = weights.iter().map(|&w| u64::from(w)).sum();
			let sum: usize = weights.iter().map(|&w| capacity(w, total, concurrency)).sum();
			prop_assert!(sum >= concurrency);
			prop_assert!(sum < concurrency + weights.len());
		}
	}
}
