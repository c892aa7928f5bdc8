// self
use crate::{
	_prelude::*,
	obs::{OpKind, OpOutcome},
};

/// Future returned by [`OpSpan::instrument`]; a plain passthrough without the `tracing` feature.
#[cfg(feature = "tracing")]
pub type InstrumentedOp<F> = tracing::instrument::Instrumented<F>;
/// Future returned by [`OpSpan::instrument`]; a plain passthrough without the `tracing` feature.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedOp<F> = F;

/// `token_keeper.op` span carrying the operation, call site, subject, and final outcome.
#[derive(Clone, Debug)]
pub struct OpSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl OpSpan {
	/// Opens a span for `kind` at `stage`; `outcome` stays empty until [`OpSpan::finish`].
	pub fn new(kind: OpKind, stage: &'static str, subject: Option<&str>) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"token_keeper.op",
				op = kind.as_str(),
				stage,
				subject = subject.unwrap_or_default(),
				outcome = tracing::field::Empty,
			);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage, subject);

			Self {}
		}
	}

	/// Records how the operation ended on the span.
	pub fn finish(&self, outcome: OpOutcome) {
		#[cfg(feature = "tracing")]
		self.span.record("outcome", outcome.as_str());

		#[cfg(not(feature = "tracing"))]
		let _ = outcome;
	}

	/// Runs `fut` inside the span without holding an entered guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedOp<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}
