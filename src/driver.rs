//! Refresh-token exchange contract and the built-in OAuth 2.0 driver.

#[cfg(feature = "reqwest")] pub mod oauth;

#[cfg(feature = "reqwest")] pub use oauth::OAuth2RefreshDriver;

// self
use crate::{_prelude::*, credential::TokenSecret, error::RefreshError};

/// Boxed future returned by [`RefreshDriver::exchange`].
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RefreshError>> + 'a + Send>>;

/// Exchanges a refresh token for a new token pair at the authorization server.
///
/// Implementations perform exactly one upstream call per invocation and never retry on their
/// own; the manager applies the timeout and decides what happens next.
pub trait RefreshDriver
where
	Self: Send + Sync,
{
	/// Runs one `grant_type=refresh_token` exchange.
	fn exchange<'a>(&'a self, refresh_token: &'a TokenSecret) -> DriverFuture<'a, TokenGrant>;
}

/// Tokens returned by a successful exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenGrant {
	/// Newly minted access token.
	pub access_token: TokenSecret,
	/// Rotated refresh token; `None` when the server kept the previous one.
	pub refresh_token: Option<TokenSecret>,
	/// Validity of the new access token in whole seconds.
	pub expires_in: i64,
}
impl TokenGrant {
	/// Creates a grant with a rotated refresh token.
	pub fn new(
		access_token: impl Into<TokenSecret>,
		refresh_token: impl Into<TokenSecret>,
		expires_in: i64,
	) -> Self {
		Self {
			access_token: access_token.into(),
			refresh_token: Some(refresh_token.into()),
			expires_in,
		}
	}
}
