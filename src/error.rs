//! Keeper-level error types shared across the manager, drivers, and stores.

// self
use crate::{_prelude::*, credential::SubjectId};

/// Keeper-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical keeper error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// No credential record exists for the subject.
	#[error("No credential record exists for subject `{subject}`.")]
	NotFound {
		/// Subject that was looked up.
		subject: SubjectId,
	},
	/// The refresh exchange failed; the stored record was left untouched.
	#[error("Refreshing credentials for subject `{subject}` failed.")]
	RefreshFailed {
		/// Subject whose refresh failed.
		subject: SubjectId,
		/// Upstream failure reported by the refresh driver.
		#[source]
		source: RefreshError,
	},
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Credential record could not be constructed.
	#[error("Unable to build credential record.")]
	Record(#[from] crate::credential::RecordBuilderError),
}
impl Error {
	/// Returns the subject tied to the error, when there is one.
	pub fn subject(&self) -> Option<&SubjectId> {
		match self {
			Self::NotFound { subject } | Self::RefreshFailed { subject, .. } => Some(subject),
			_ => None,
		}
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[cfg(feature = "reqwest")]
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Token endpoint URL cannot be used.
	#[error("Token endpoint URL is invalid.")]
	InvalidTokenUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// A required setting is empty.
	#[error("Configuration value `{field}` must not be empty.")]
	Empty {
		/// Setting name.
		field: &'static str,
	},
	/// A duration setting is out of range.
	#[error("Configuration value `{field}` {reason}.")]
	OutOfRange {
		/// Setting name.
		field: &'static str,
		/// Constraint the value violated.
		reason: &'static str,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Failures produced by a [`RefreshDriver`](crate::driver::RefreshDriver) exchange.
#[derive(Debug, ThisError)]
pub enum RefreshError {
	/// Provider rejected the refresh token (revoked, expired, or already rotated).
	#[error("Provider rejected the grant: {reason}.")]
	InvalidGrant {
		/// Provider-supplied reason string.
		reason: String,
	},
	/// Client authentication failed or credentials are malformed.
	#[error("Client authentication failed: {reason}.")]
	InvalidClient {
		/// Provider-supplied reason string.
		reason: String,
	},
	/// The exchange did not complete within the configured bound.
	#[error("Token exchange timed out after {after}.")]
	Timeout {
		/// Configured bound that elapsed.
		after: Duration,
	},
	/// Temporary upstream failure.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Driver configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// An exchange for the same refresh token failed while this call was queued behind it.
	#[error("Concurrent refresh attempt failed: {reason}")]
	Coalesced {
		/// Rendered error chain of the failed attempt.
		reason: String,
		/// Whether the failed attempt was a grant rejection.
		grant_rejected: bool,
	},
	/// Granted tokens could not form a usable record (for example an empty access token).
	#[error("Token endpoint returned an unusable grant.")]
	UnusableGrant(#[from] crate::credential::RecordBuilderError),
}
impl RefreshError {
	/// Returns `true` when the refresh token itself was refused and retrying cannot succeed
	/// without a new authorization.
	pub fn is_grant_rejected(&self) -> bool {
		matches!(self, Self::InvalidGrant { .. } | Self::Coalesced { grant_rejected: true, .. })
	}
}

/// Temporary failure variants (safe to retry on the next trigger).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Provider- or keeper-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the token endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the token endpoint.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
