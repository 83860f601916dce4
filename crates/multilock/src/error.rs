//! Error types for lock acquisition and configuration.

use thiserror::Error;

/// Errors returned to callers of [`PriorityMultiLock::lock`](crate::PriorityMultiLock::lock).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockError {
	/// The lock was killed. Raised by `lock()` after a kill and delivered to
	/// every waiter still queued at kill time.
	#[error("priority lock was killed")]
	Killed,

	/// The requested priority is outside `0..=max_priority`.
	#[error("priority {priority} is out of range (max priority is {max_priority})")]
	InvalidPriority {
		/// The rejected priority index.
		priority: usize,
		/// Highest valid priority index.
		max_priority: usize,
	},
}

/// Result alias for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors raised while building a lock configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Concurrency must allow at least one holder.
	#[error("concurrency must be greater than zero")]
	ZeroConcurrency,

	/// At least one priority is required.
	#[error("weight table is empty")]
	EmptyWeights,

	/// Every priority needs a positive weight.
	#[error("priority {priority} has weight 0 (weights must be positive)")]
	ZeroWeight {
		/// Index of the offending priority.
		priority: usize,
	},

	/// A token in a comma separated weight list was not an integer.
	#[error("invalid weight {token:?} (expected a positive integer)")]
	InvalidWeight {
		/// The token as written.
		token: String,
	},

	/// TOML syntax or shape error.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),
}
