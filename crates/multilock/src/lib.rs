//! Weighted priority admission lock.
//!
//! [`PriorityMultiLock`] hands out a bounded number of execution slots to
//! callers grouped into weighted priority classes. Each class's share of the
//! slots is recomputed on every grant from the weights of the classes that
//! currently have someone waiting, so an idle class never reserves capacity
//! and a lone busy class can use all of it.
//!
//! Requests within one class are served in arrival order. Across classes a
//! dispatch loop walks the waiting classes round-robin, resuming where it last
//! stopped, and skips any class already at its quota.
//!
//! A [`Grant`] holds one slot until it is released or dropped. The lock can
//! be [halted](PriorityMultiLock::halt), which silently stops new grants, or
//! [killed](PriorityMultiLock::kill), which also fails every queued request
//! with [`LockError::Killed`].

mod active;
mod capacity;
pub mod config;
mod error;
mod grant;
mod lock;
mod priority;
mod spawn;

pub use capacity::capacity;
pub use config::{MultiLockConfig, WeightTable};
pub use error::{ConfigError, LockError, LockResult};
pub use grant::{Acquire, Grant};
pub use lock::{LockSnapshot, PriorityMultiLock, PrioritySnapshot};
pub use spawn::{TaskRole, spawn};
