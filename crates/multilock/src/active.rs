//! Ordered set of priorities that currently have waiters.
//!
//! The dispatch loop keeps a cursor into this set between passes so scanning
//! resumes where it stopped instead of restarting from the head.

/// Priorities with at least one waiter, in activation order, plus the scan cursor.
#[derive(Debug, Default)]
pub(crate) struct ActivePriorities {
	order: Vec<usize>,
	/// Position of the last selected priority; `None` is the end position,
	/// which wraps to the head on the next scan.
	cursor: Option<usize>,
}

impl ActivePriorities {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	pub(crate) fn len(&self) -> usize {
		self.order.len()
	}

	pub(crate) fn contains(&self, priority: usize) -> bool {
		self.order.contains(&priority)
	}

	/// Appends a newly active priority. The cursor is unaffected.
	pub(crate) fn push(&mut self, priority: usize) {
		self.order.push(priority);
	}

	pub(crate) fn clear(&mut self) {
		self.order.clear();
		self.cursor = None;
	}

	/// Scans from the cursor, wrapping once around the set, for the first
	/// priority accepted by `eligible`, and parks the cursor on it.
	pub(crate) fn find_next(&mut self, mut eligible: impl FnMut(usize) -> bool) -> Option<usize> {
		let len = self.order.len();
		let mut pos = self.cursor.unwrap_or(0);
		for _ in 0..len {
			if pos >= len {
				pos = 0;
			}
			let priority = self.order[pos];
			if eligible(priority) {
				self.cursor = Some(pos);
				return Some(priority);
			}
			pos += 1;
		}
		None
	}

	/// Removes the priority under the cursor; the cursor moves to its successor.
	pub(crate) fn remove_current(&mut self) -> Option<usize> {
		let pos = self.cursor?;
		let priority = self.order.remove(pos);
		self.cursor = (pos < self.order.len()).then_some(pos);
		Some(priority)
	}
}
