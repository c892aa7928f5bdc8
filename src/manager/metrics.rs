// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for refresh activity.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
	exchanges: AtomicU64,
	reuses: AtomicU64,
	failures: AtomicU64,
}
impl RefreshMetrics {
	/// Returns the number of exchanges sent to the refresh driver.
	pub fn exchanges(&self) -> u64 {
		self.exchanges.load(Ordering::Relaxed)
	}

	/// Returns how often a waiter found the record already refreshed after taking the lock.
	pub fn reuses(&self) -> u64 {
		self.reuses.load(Ordering::Relaxed)
	}

	/// Returns the number of failed refresh attempts.
	pub fn failures(&self) -> u64 {
		self.failures.load(Ordering::Relaxed)
	}

	pub(crate) fn record_exchange(&self) {
		self.exchanges.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_reuse(&self) {
		self.reuses.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failures.fetch_add(1, Ordering::Relaxed);
	}
}
