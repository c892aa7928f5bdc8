//! Secret store contract, key namespacing, and built-in store implementations.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{_prelude::*, credential::SubjectId};

/// Boxed future returned by [`SecretStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Key-value persistence for opaque credential payloads.
///
/// Implementations must make `put` atomic per key: a concurrent `get` observes either the
/// previous payload or the new one, never a mix.
pub trait SecretStore
where
	Self: Send + Sync,
{
	/// Creates or replaces the payload stored under `key`.
	fn put<'a>(&'a self, key: &'a str, payload: Vec<u8>) -> StoreFuture<'a, ()>;

	/// Fetches the payload stored under `key`, if present.
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>>;

	/// Lists every key that starts with `prefix`.
	fn list<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<String>>;
}

/// Error type produced by [`SecretStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Payload (de)serialization failed.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// The backend did not answer within the configured bound.
	#[error("Store operation `{operation}` timed out.")]
	Timeout {
		/// Operation that timed out.
		operation: &'static str,
	},
}

/// Maps subjects to store keys (`<prefix><subject>`) and back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyNamespace {
	prefix: String,
}
impl KeyNamespace {
	/// Prefix used when no other namespace is configured.
	pub const DEFAULT_PREFIX: &'static str = "eve-token-";

	/// Creates a namespace with a custom prefix.
	pub fn new(prefix: impl Into<String>) -> Self {
		Self { prefix: prefix.into() }
	}

	/// Returns the key prefix.
	pub fn prefix(&self) -> &str {
		&self.prefix
	}

	/// Builds the store key for `subject`.
	pub fn key(&self, subject: &SubjectId) -> String {
		format!("{}{subject}", self.prefix)
	}

	/// Recovers the subject from a key in this namespace.
	///
	/// Returns `None` for keys outside the namespace or with an invalid subject part.
	pub fn subject(&self, key: &str) -> Option<SubjectId> {
		key.strip_prefix(self.prefix.as_str()).and_then(|rest| SubjectId::new(rest).ok())
	}
}
impl Default for KeyNamespace {
	fn default() -> Self {
		Self::new(Self::DEFAULT_PREFIX)
	}
}
