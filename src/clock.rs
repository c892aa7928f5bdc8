//! Time sources consulted by staleness checks and record stamping.

// self
use crate::_prelude::*;

/// Source of the current instant.
pub trait Clock
where
	Self: Send + Sync,
{
	/// Returns the current UTC instant.
	fn now(&self) -> OffsetDateTime;
}

/// Wall-clock time via [`OffsetDateTime::now_utc`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}
}

/// Clock that only moves when told to; clones share the same instant.
#[derive(Clone, Debug)]
pub struct ManualClock(Arc<Mutex<OffsetDateTime>>);
impl ManualClock {
	/// Creates a clock frozen at `instant`.
	pub fn new(instant: OffsetDateTime) -> Self {
		Self(Arc::new(Mutex::new(instant)))
	}

	/// Moves the clock to `instant`.
	pub fn set(&self, instant: OffsetDateTime) {
		*self.0.lock() = instant;
	}

	/// Moves the clock forward by `delta`.
	pub fn advance(&self, delta: Duration) {
		*self.0.lock() += delta;
	}
}
impl Clock for ManualClock {
	fn now(&self) -> OffsetDateTime {
		*self.0.lock()
	}
}
