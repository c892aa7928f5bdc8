//! [`RefreshDriver`] backed by the `oauth2` crate and reqwest.
//!
//! The driver authenticates with HTTP Basic client credentials and posts
//! `grant_type=refresh_token` to the configured token endpoint. Provider error codes are
//! classified so a revoked refresh token (`invalid_grant`) is distinguishable from transient
//! upstream trouble.

// crates.io
use oauth2::{
	AuthType, ClientId, ClientSecret, EndpointNotSet, EndpointSet, HttpClientError, RefreshToken,
	RequestTokenError, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError, BasicTokenResponse},
};
// self
use crate::{
	_prelude::*,
	credential::TokenSecret,
	driver::{DriverFuture, RefreshDriver, TokenGrant},
	error::{ConfigError, RefreshError, TransientError, TransportError},
	http::{ReqwestHttpClient, ResponseMetadata, ResponseMetadataSlot},
};

type ConfiguredBasicClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Refresh driver for a confidential OAuth 2.0 client.
#[derive(Clone)]
pub struct OAuth2RefreshDriver {
	oauth_client: ConfiguredBasicClient,
	http_client: ReqwestHttpClient,
}
impl OAuth2RefreshDriver {
	/// Builds a driver with its own redirect-free reqwest client.
	pub fn new(
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
		token_url: &Url,
	) -> Result<Self, ConfigError> {
		Self::with_http_client(client_id, client_secret, token_url, ReqwestHttpClient::new()?)
	}

	/// Builds a driver that reuses the caller-provided transport.
	pub fn with_http_client(
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
		token_url: &Url,
		http_client: ReqwestHttpClient,
	) -> Result<Self, ConfigError> {
		let token_url = TokenUrl::new(token_url.to_string())
			.map_err(|source| ConfigError::InvalidTokenUrl { source })?;
		let oauth_client = BasicClient::new(ClientId::new(client_id.into()))
			.set_client_secret(ClientSecret::new(client_secret.into()))
			.set_auth_type(AuthType::BasicAuth)
			.set_token_uri(token_url);

		Ok(Self { oauth_client, http_client })
	}
}
impl RefreshDriver for OAuth2RefreshDriver {
	fn exchange<'a>(&'a self, refresh_token: &'a TokenSecret) -> DriverFuture<'a, TokenGrant> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let instrumented = self.http_client.instrumented(meta.clone());
			let refresh_secret = RefreshToken::new(refresh_token.expose().to_owned());
			let response = self
				.oauth_client
				.exchange_refresh_token(&refresh_secret)
				.request_async(&instrumented)
				.await
				.map_err(|err| map_request_error(meta.take(), err))?;

			map_token_response(response)
		})
	}
}
impl Debug for OAuth2RefreshDriver {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuth2RefreshDriver")
			.field("client_id", self.oauth_client.client_id())
			.field("token_url", &self.oauth_client.token_uri().as_str())
			.finish()
	}
}

fn map_token_response(response: BasicTokenResponse) -> Result<TokenGrant, RefreshError> {
	let expires_in = response.expires_in().ok_or(RefreshError::MissingExpiresIn)?.as_secs();
	let expires_in = i64::try_from(expires_in).map_err(|_| RefreshError::ExpiresInOutOfRange)?;

	if expires_in <= 0 {
		return Err(RefreshError::NonPositiveExpiresIn);
	}

	Ok(TokenGrant {
		access_token: TokenSecret::new(response.access_token().secret().to_owned()),
		refresh_token: response.refresh_token().map(|token| TokenSecret::new(token.secret().to_owned())),
		expires_in,
	})
}

fn map_request_error(
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<ReqwestError>>,
) -> RefreshError {
	let status = meta.and_then(|value| value.status);

	match err {
		RequestTokenError::ServerResponse(response) => map_server_response_error(response, status),
		RequestTokenError::Request(error) => map_transport_error(error, status),
		RequestTokenError::Parse(source, _body) =>
			TransientError::TokenResponseParse { source, status }.into(),
		RequestTokenError::Other(message) =>
			TransientError::TokenEndpoint { message, status }.into(),
	}
}

fn map_server_response_error(response: BasicErrorResponse, status: Option<u16>) -> RefreshError {
	let code = response.error().as_ref().to_owned();
	let reason = match response.error_description() {
		Some(description) => format!("{code}: {description}"),
		None => code.clone(),
	};

	match code.as_str() {
		"invalid_grant" => RefreshError::InvalidGrant { reason },
		"invalid_client" | "unauthorized_client" => RefreshError::InvalidClient { reason },
		_ if status == Some(401) => RefreshError::InvalidClient { reason },
		_ => TransientError::TokenEndpoint { message: reason, status }.into(),
	}
}

fn map_transport_error(err: HttpClientError<ReqwestError>, status: Option<u16>) -> RefreshError {
	match err {
		HttpClientError::Reqwest(inner) if inner.is_timeout() => TransientError::TokenEndpoint {
			message: "Request timed out while calling the token endpoint".into(),
			status: status.or_else(|| inner.status().map(|code| code.as_u16())),
		}
		.into(),
		HttpClientError::Reqwest(inner) if inner.is_builder() => ConfigError::from(*inner).into(),
		HttpClientError::Reqwest(inner) => TransportError::from(*inner).into(),
		HttpClientError::Http(inner) => ConfigError::from(inner).into(),
		HttpClientError::Io(inner) => TransportError::Io(inner).into(),
		HttpClientError::Other(message) => TransientError::TokenEndpoint {
			message: format!("HTTP client error occurred while calling the token endpoint: {message}"),
			status,
		}
		.into(),
		_ => TransientError::TokenEndpoint {
			message: "HTTP client error occurred while calling the token endpoint".into(),
			status,
		}
		.into(),
	}
}
