//! Optional observability helpers for keeper operations.
//!
//! # Feature Flags
//!
//! - `tracing` (default) emits spans named `token_keeper.op` with the `op` and `stage` fields, plus
//!   `warn` events for refresh failures and an `info` summary after each sweep.
//! - `metrics` increments the `token_keeper_op_total` counter labeled by `op` + `outcome`. Reads
//!   report `fresh` or `refreshed`, so the ratio of the two shows how often callers hit the
//!   staleness margin.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::{_prelude::*, credential::SubjectId, manager::Freshness};

/// Operations observed by the keeper.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
	/// First write after an authorization-code exchange.
	Ingest,
	/// Explicit record replacement.
	Store,
	/// Refresh-token exchange and write-back.
	Refresh,
	/// One full pass over all subjects.
	Sweep,
}
impl OpKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpKind::Ingest => "ingest",
			OpKind::Store => "store",
			OpKind::Refresh => "refresh",
			OpKind::Sweep => "sweep",
		}
	}
}
impl Display for OpKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to an operation.
	Attempt,
	/// A read found the record valid for at least the staleness margin.
	Fresh,
	/// A read replaced a stale record with a newly exchanged one.
	Refreshed,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller or collected by a sweep.
	Failure,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Fresh => "fresh",
			OpOutcome::Refreshed => "refreshed",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
		}
	}
}
impl From<Freshness> for OpOutcome {
	fn from(freshness: Freshness) -> Self {
		match freshness {
			Freshness::Fresh => Self::Fresh,
			Freshness::Refreshed => Self::Refreshed,
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Reports a failed operation for `subject` to the configured sinks.
pub fn report_failure(kind: OpKind, subject: &SubjectId, error: &Error) {
	#[cfg(feature = "tracing")]
	::tracing::warn!(op = kind.as_str(), %subject, error = %ErrorChain(error), "token operation failed");

	#[cfg(not(feature = "tracing"))]
	let _ = (subject, error);

	record_outcome(kind, OpOutcome::Failure);
}

/// Renders an error followed by its `source` chain on one line.
pub struct ErrorChain<'a>(pub &'a (dyn StdError + 'static));
impl Display for ErrorChain<'_> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}", self.0)?;

		let mut source = self.0.source();

		while let Some(cause) = source {
			write!(f, ": {cause}")?;

			source = cause.source();
		}

		Ok(())
	}
}
impl Debug for ErrorChain<'_> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		Display::fmt(self, f)
	}
}
