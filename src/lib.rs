//! OAuth 2.0 token keeper for EVE Online SSO characters: durable credential records, lazy and
//! periodic refresh with per-subject singleflight, and pluggable secret stores.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod clock;
pub mod codec;
pub mod config;
pub mod credential;
pub mod driver;
pub mod error;
#[cfg(feature = "reqwest")] pub mod http;
pub mod manager;
pub mod obs;
pub mod store;
pub mod sweep;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and doubles for tests; enabled via `cfg(test)` or the `test` crate
	//! feature.

	pub use crate::_prelude::*;

	// std
	use std::{
		collections::{HashSet, VecDeque},
		sync::atomic::{AtomicUsize, Ordering},
	};
	// self
	use crate::{
		credential::{SubjectId, TokenSecret},
		driver::{DriverFuture, RefreshDriver, TokenGrant},
		error::RefreshError,
	};

	/// Fixed instant used as `t = 0` across tests.
	pub fn epoch() -> OffsetDateTime {
		time::macros::datetime!(2025-01-01 00:00 UTC)
	}

	/// Parses a subject fixture.
	pub fn subject(id: &str) -> SubjectId {
		SubjectId::new(id).expect("Subject fixture should be valid.")
	}

	/// Refresh driver that replays queued responses, then mints numbered grants.
	#[derive(Debug, Default)]
	pub struct ScriptedDriver {
		responses: Mutex<VecDeque<Result<TokenGrant, RefreshError>>>,
		rejected: HashSet<String>,
		seen: Mutex<Vec<String>>,
		delay: Option<std::time::Duration>,
		in_flight: AtomicUsize,
		peak_in_flight: AtomicUsize,
	}
	impl ScriptedDriver {
		/// Queues the response for the next exchange.
		pub fn respond(self, response: Result<TokenGrant, RefreshError>) -> Self {
			self.responses.lock().push_back(response);

			self
		}

		/// Answers `invalid_grant` whenever `refresh_token` is presented.
		pub fn reject(mut self, refresh_token: &str) -> Self {
			self.rejected.insert(refresh_token.to_owned());

			self
		}

		/// Sleeps before answering each exchange.
		pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
			self.delay = Some(delay);

			self
		}

		/// Number of exchanges started so far.
		pub fn calls(&self) -> usize {
			self.seen.lock().len()
		}

		/// Largest number of exchanges that were running at the same time.
		pub fn peak_in_flight(&self) -> usize {
			self.peak_in_flight.load(Ordering::SeqCst)
		}

		/// Refresh tokens presented so far, in call order.
		pub fn seen_refresh_tokens(&self) -> Vec<String> {
			self.seen.lock().clone()
		}
	}
	impl RefreshDriver for ScriptedDriver {
		fn exchange<'a>(&'a self, refresh_token: &'a TokenSecret) -> DriverFuture<'a, TokenGrant> {
			Box::pin(async move {
				let call = {
					let mut seen = self.seen.lock();

					seen.push(refresh_token.expose().to_owned());

					seen.len()
				};
				let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;

				self.peak_in_flight.fetch_max(running, Ordering::SeqCst);

				if let Some(delay) = self.delay {
					tokio::time::sleep(delay).await;
				}

				self.in_flight.fetch_sub(1, Ordering::SeqCst);

				if self.rejected.contains(refresh_token.expose()) {
					return Err(RefreshError::InvalidGrant { reason: "invalid_grant".into() });
				}

				let queued = self.responses.lock().pop_front();

				queued.unwrap_or_else(|| {
					Ok(TokenGrant::new(format!("access-{call}"), format!("refresh-{call}"), 1_200))
				})
			})
		}
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(feature = "cli")] use {clap as _, color_eyre as _, tracing_subscriber as _};
#[cfg(test)] use httpmock as _;
