//! Reqwest transport adapter for the `oauth2` crate.
//!
//! [`ReqwestHttpClient`] hands out short-lived handles implementing [`AsyncHttpClient`]. Each
//! handle records the HTTP status of the response it received in a [`ResponseMetadataSlot`] so
//! that error mapping can attach the status to failures the `oauth2` crate reports without one.

// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
use reqwest::redirect::Policy;
// self
use crate::{_prelude::*, error::ConfigError};

/// Metadata captured from the most recent HTTP response.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code returned by the token endpoint, if available.
	pub status: Option<u16>,
}

/// Thread-safe slot shared between a transport handle and the error mapper.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores new metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, if any, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Thin wrapper around [`ReqwestClient`] used for token endpoint calls.
///
/// Token endpoints answer directly, so the client built by [`ReqwestHttpClient::new`] does not
/// follow redirects. Clients passed to [`ReqwestHttpClient::with_client`] should be configured
/// the same way.
#[derive(Clone, Debug)]
pub struct ReqwestHttpClient(ReqwestClient);
impl ReqwestHttpClient {
	/// Builds a client that never follows redirects.
	pub fn new() -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder().redirect(Policy::none()).build()?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Returns a handle that records response metadata into `slot`.
	pub fn instrumented(&self, slot: ResponseMetadataSlot) -> InstrumentedHandle {
		InstrumentedHandle(Arc::new(InstrumentedHttpClient { client: self.0.clone(), slot }))
	}
}
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}

struct InstrumentedHttpClient {
	client: ReqwestClient,
	slot: ResponseMetadataSlot,
}

/// [`AsyncHttpClient`] handle returned by [`ReqwestHttpClient::instrumented`].
#[derive(Clone)]
pub struct InstrumentedHandle(Arc<InstrumentedHttpClient>);
impl<'c> AsyncHttpClient<'c> for InstrumentedHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let inner = Arc::clone(&self.0);

		Box::pin(async move {
			inner.slot.take();

			let response = inner
				.client
				.execute(request.try_into().map_err(Box::new)?)
				.await
				.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();

			inner.slot.store(ResponseMetadata { status: Some(status.as_u16()) });

			let mut converted =
				HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*converted.status_mut() = status;
			*converted.headers_mut() = headers;

			Ok(converted)
		})
	}
}
impl Debug for InstrumentedHandle {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("InstrumentedHandle(..)")
	}
}
