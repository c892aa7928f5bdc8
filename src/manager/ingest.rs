//! First write for a subject after an authorization-code exchange.

// self
use crate::{
	_prelude::*,
	credential::{CredentialRecord, SubjectId, TokenSecret},
	manager::TokenManager,
	obs::{OpKind, OpSpan},
};

/// Token set obtained outside the keeper (typically from the SSO callback).
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedTokens {
	/// Subject the tokens belong to.
	pub subject: SubjectId,
	/// Access token returned by the authorization server.
	pub access_token: TokenSecret,
	/// Refresh token returned by the authorization server.
	pub refresh_token: TokenSecret,
	/// Declared validity in whole seconds.
	pub expires_in: i64,
}
impl IssuedTokens {
	/// Bundles a freshly issued token set.
	pub fn new(
		subject: SubjectId,
		access_token: impl Into<TokenSecret>,
		refresh_token: impl Into<TokenSecret>,
		expires_in: i64,
	) -> Self {
		Self {
			subject,
			access_token: access_token.into(),
			refresh_token: refresh_token.into(),
			expires_in,
		}
	}
}
impl Debug for IssuedTokens {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("IssuedTokens")
			.field("subject", &self.subject)
			.field("expires_in", &self.expires_in)
			.finish_non_exhaustive()
	}
}

impl TokenManager {
	/// Stamps `tokens` with the current instant and stores them as the subject's record.
	///
	/// No staleness check runs; an existing record is replaced.
	pub async fn ingest(&self, tokens: IssuedTokens) -> Result<CredentialRecord> {
		let span = OpSpan::new(OpKind::Ingest, "ingest", Some(tokens.subject.as_str()));

		span.instrument(async move {
			let record = CredentialRecord::builder(tokens.subject)
				.issued_at(self.now())
				.expires_in_secs(tokens.expires_in)
				.access_token(tokens.access_token)
				.refresh_token(tokens.refresh_token)
				.build()?;

			self.store(record.clone()).await?;

			#[cfg(feature = "tracing")]
			tracing::info!(subject = %record.subject, expires_at = %record.expires_at(), "credentials ingested");

			Ok(record)
		})
		.await
	}
}
