//! Byte encoding of [`CredentialRecord`] values for the secret store.
//!
//! Records are stored as a flat JSON object:
//!
//! ```json
//! {"access_token":"...","refresh_token":"...","expires_in":1199,"timestamp":1735689600000}
//! ```
//!
//! `timestamp` is the issue instant in Unix milliseconds and `expires_in` is in seconds. The
//! subject is not part of the payload; it is recovered from the store key. Unknown fields are
//! ignored so payloads written by other tools with extra metadata still decode.

// std
use std::borrow::Cow;
// self
use crate::{
	_prelude::*,
	credential::{CredentialRecord, RecordBuilderError, SubjectId},
	store::StoreError,
};

const NANOS_PER_MILLI: i128 = 1_000_000;

/// Encoding and decoding failures.
#[derive(Debug, ThisError)]
pub enum CodecError {
	/// The record could not be serialized.
	#[error("Failed to encode credential record.")]
	Encode(#[source] serde_json::Error),
	/// The payload is not a valid record document.
	#[error("Failed to decode credential record.")]
	Decode(#[source] serde_path_to_error::Error<serde_json::Error>),
	/// The payload decoded but describes an unusable record.
	#[error("Stored credential record is invalid.")]
	InvalidRecord(#[source] RecordBuilderError),
	/// The timestamp cannot be represented.
	#[error("Stored timestamp {millis} is out of range.")]
	TimestampOutOfRange {
		/// Offending timestamp in Unix milliseconds.
		millis: i64,
	},
}
impl From<CodecError> for StoreError {
	fn from(e: CodecError) -> Self {
		let mut message = e.to_string();
		let mut source = StdError::source(&e);

		while let Some(cause) = source {
			message.push_str(": ");
			message.push_str(&cause.to_string());
			source = cause.source();
		}

		Self::Serialization { message }
	}
}

#[derive(Serialize, Deserialize)]
struct Payload<'a> {
	access_token: Cow<'a, str>,
	refresh_token: Cow<'a, str>,
	expires_in: i64,
	timestamp: i64,
}

/// Serializes a record into the store payload.
pub fn encode(record: &CredentialRecord) -> Result<Vec<u8>, CodecError> {
	let millis = record.issued_at.unix_timestamp_nanos() / NANOS_PER_MILLI;
	let timestamp =
		i64::try_from(millis).map_err(|_| CodecError::TimestampOutOfRange { millis: i64::MAX })?;
	let payload = Payload {
		access_token: Cow::Borrowed(record.access_token.expose()),
		refresh_token: Cow::Borrowed(record.refresh_token.expose()),
		expires_in: record.expires_in.whole_seconds(),
		timestamp,
	};

	serde_json::to_vec(&payload).map_err(CodecError::Encode)
}

/// Deserializes a store payload into the record owned by `subject`.
pub fn decode(subject: SubjectId, bytes: &[u8]) -> Result<CredentialRecord, CodecError> {
	let mut de = serde_json::Deserializer::from_slice(bytes);
	let payload: Payload = serde_path_to_error::deserialize(&mut de).map_err(CodecError::Decode)?;
	let issued_at =
		OffsetDateTime::from_unix_timestamp_nanos(i128::from(payload.timestamp) * NANOS_PER_MILLI)
			.map_err(|_| CodecError::TimestampOutOfRange { millis: payload.timestamp })?;

	CredentialRecord::builder(subject)
		.access_token(payload.access_token.into_owned())
		.refresh_token(payload.refresh_token.into_owned())
		.issued_at(issued_at)
		.expires_in_secs(payload.expires_in)
		.build()
		.map_err(CodecError::InvalidRecord)
}
