// self
use crate::obs::{OpKind, OpOutcome};

/// Bumps `token_keeper_op_total{op, outcome}` on the global recorder; a no-op without the
/// `metrics` feature.
pub fn record_outcome(kind: OpKind, outcome: OpOutcome) {
	#[cfg(feature = "metrics")]
	metrics::counter!("token_keeper_op_total", "op" => kind.as_str(), "outcome" => outcome.as_str())
		.increment(1);

	#[cfg(not(feature = "metrics"))]
	let _ = (kind, outcome);
}

/// Records a finished operation on both the counter and `span`.
pub fn finish_op(span: &crate::obs::OpSpan, kind: OpKind, outcome: OpOutcome) {
	span.finish(outcome);
	record_outcome(kind, outcome);
}
