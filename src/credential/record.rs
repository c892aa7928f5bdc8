//! Persisted credential record, freshness checks, and the record builder.

// self
use crate::{
	_prelude::*,
	credential::{id::SubjectId, secret::TokenSecret},
};

/// Freshness of a record relative to an instant and a staleness margin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
	/// Usable for at least the staleness margin.
	Active,
	/// Still technically valid but inside the staleness margin; must be refreshed before use.
	Stale,
	/// Past its expiry instant.
	Expired,
}

/// Errors produced by [`RecordBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum RecordBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no refresh token value was provided.
	#[error("Refresh token is required.")]
	MissingRefreshToken,
	/// Issued when no `expires_in` was configured.
	#[error("Expiry must be supplied via expires_in.")]
	MissingExpiry,
	/// Issued when `expires_in` is zero or negative.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiry,
	/// Issued when `issued_at + expires_in` cannot be represented.
	#[error("The expiry instant is out of range.")]
	ExpiryOutOfRange,
}

/// Token state persisted for one subject.
///
/// Records are replaced wholesale on every write; there is no partial update. The expiry
/// instant is derived from `issued_at + expires_in` and never stored on its own.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialRecord {
	/// Subject that owns the tokens.
	pub subject: SubjectId,
	/// Short-lived bearer token.
	pub access_token: TokenSecret,
	/// Long-lived token used to mint new access tokens; replaced on every rotation.
	pub refresh_token: TokenSecret,
	/// Instant the access token was minted, truncated to whole milliseconds.
	pub issued_at: OffsetDateTime,
	/// Validity declared by the authorization server, in whole seconds.
	pub expires_in: Duration,
}
impl CredentialRecord {
	/// Returns a builder for the provided subject.
	pub fn builder(subject: SubjectId) -> RecordBuilder {
		RecordBuilder::new(subject)
	}

	/// Instant after which the access token is no longer accepted.
	pub fn expires_at(&self) -> OffsetDateTime {
		self.issued_at + self.expires_in
	}

	/// Computes the freshness of the record at `instant` with the provided margin.
	pub fn status_at(&self, instant: OffsetDateTime, margin: Duration) -> TokenStatus {
		let expires_at = self.expires_at();

		if instant >= expires_at {
			return TokenStatus::Expired;
		}
		if expires_at.checked_sub(margin).is_none_or(|edge| instant >= edge) {
			return TokenStatus::Stale;
		}

		TokenStatus::Active
	}

	/// Returns `true` while `instant < expires_at - margin`.
	pub fn is_valid_at(&self, instant: OffsetDateTime, margin: Duration) -> bool {
		matches!(self.status_at(instant, margin), TokenStatus::Active)
	}
}
impl Debug for CredentialRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialRecord")
			.field("subject", &self.subject)
			.field("access_token", &"<redacted>")
			.field("refresh_token", &"<redacted>")
			.field("issued_at", &self.issued_at)
			.field("expires_in", &self.expires_in)
			.finish()
	}
}

/// Builder for [`CredentialRecord`].
#[derive(Clone, Debug)]
pub struct RecordBuilder {
	subject: SubjectId,
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_in: Option<i64>,
}
impl RecordBuilder {
	fn new(subject: SubjectId) -> Self {
		Self { subject, access_token: None, refresh_token: None, issued_at: None, expires_in: None }
	}

	/// Sets the issued-at instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets the validity window in whole seconds.
	pub fn expires_in_secs(mut self, secs: i64) -> Self {
		self.expires_in = Some(secs);

		self
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<TokenSecret>) -> Self {
		self.access_token = Some(token.into());

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<TokenSecret>) -> Self {
		self.refresh_token = Some(token.into());

		self
	}

	/// Consumes the builder and produces a [`CredentialRecord`].
	///
	/// A missing `issued_at` defaults to the current UTC instant.
	pub fn build(self) -> Result<CredentialRecord, RecordBuilderError> {
		let access_token = self
			.access_token
			.filter(|token| !token.is_empty())
			.ok_or(RecordBuilderError::MissingAccessToken)?;
		let refresh_token = self
			.refresh_token
			.filter(|token| !token.is_empty())
			.ok_or(RecordBuilderError::MissingRefreshToken)?;
		let expires_in = self.expires_in.ok_or(RecordBuilderError::MissingExpiry)?;

		if expires_in <= 0 {
			return Err(RecordBuilderError::NonPositiveExpiry);
		}

		let issued_at = truncate_to_millis(self.issued_at.unwrap_or_else(OffsetDateTime::now_utc));
		let expires_in = Duration::seconds(expires_in);

		// `expires_at` adds these unchecked.
		if issued_at.checked_add(expires_in).is_none() {
			return Err(RecordBuilderError::ExpiryOutOfRange);
		}

		Ok(CredentialRecord { subject: self.subject, access_token, refresh_token, issued_at, expires_in })
	}
}

fn truncate_to_millis(instant: OffsetDateTime) -> OffsetDateTime {
	let sub_millis = instant.nanosecond() % 1_000_000;

	instant - Duration::nanoseconds(i64::from(sub_millis))
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn subject() -> SubjectId {
		SubjectId::new("100001").expect("Subject fixture should be valid.")
	}

	fn record(issued_at: OffsetDateTime, expires_in: i64) -> CredentialRecord {
		CredentialRecord::builder(subject())
			.access_token("access")
			.refresh_token("refresh")
			.issued_at(issued_at)
			.expires_in_secs(expires_in)
			.build()
			.expect("Record fixture should build.")
	}

	#[test]
	fn status_honours_staleness_margin() {
		let issued = macros::datetime!(2025-01-01 00:00 UTC);
		let record = record(issued, 1200);
		let margin = Duration::minutes(2);

		assert_eq!(record.expires_at(), macros::datetime!(2025-01-01 00:20 UTC));
		assert_eq!(record.status_at(issued + Duration::seconds(1000), margin), TokenStatus::Active);
		assert_eq!(record.status_at(issued + Duration::seconds(1080), margin), TokenStatus::Stale);
		assert_eq!(record.status_at(issued + Duration::seconds(1100), margin), TokenStatus::Stale);
		assert_eq!(record.status_at(issued + Duration::seconds(1200), margin), TokenStatus::Expired);
		assert!(record.is_valid_at(issued + Duration::seconds(1079), margin));
		assert!(!record.is_valid_at(issued + Duration::seconds(1080), margin));
	}

	#[test]
	fn builder_rejects_incomplete_records() {
		let base = CredentialRecord::builder(subject());

		assert_eq!(
			base.clone().refresh_token("r").expires_in_secs(60).build(),
			Err(RecordBuilderError::MissingAccessToken)
		);
		assert_eq!(
			base.clone().access_token("a").expires_in_secs(60).build(),
			Err(RecordBuilderError::MissingRefreshToken)
		);
		assert_eq!(
			base.clone().access_token("a").refresh_token("").expires_in_secs(60).build(),
			Err(RecordBuilderError::MissingRefreshToken)
		);
		assert_eq!(
			base.clone().access_token("a").refresh_token("r").build(),
			Err(RecordBuilderError::MissingExpiry)
		);
		assert_eq!(
			base.access_token("a").refresh_token("r").expires_in_secs(0).build(),
			Err(RecordBuilderError::NonPositiveExpiry)
		);
	}

	#[test]
	fn builder_rejects_unrepresentable_expiry() {
		let built = CredentialRecord::builder(subject())
			.access_token("a")
			.refresh_token("r")
			.issued_at(OffsetDateTime::UNIX_EPOCH)
			.expires_in_secs(i64::MAX / 2)
			.build();

		assert_eq!(built, Err(RecordBuilderError::ExpiryOutOfRange));
	}

	#[test]
	fn issued_at_is_truncated_to_millis() {
		let precise = macros::datetime!(2025-01-01 00:00:00.123456789 UTC);
		let record = record(precise, 60);

		assert_eq!(record.issued_at, macros::datetime!(2025-01-01 00:00:00.123 UTC));
	}

	#[test]
	fn debug_redacts_tokens() {
		let rendered = format!("{:?}", record(macros::datetime!(2025-01-01 00:00 UTC), 60));

		assert!(rendered.contains("<redacted>"));
		assert!(!rendered.contains("\"access\""));
	}
}
