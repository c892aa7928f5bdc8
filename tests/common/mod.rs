#![allow(dead_code)]

// std
use std::sync::Arc;
// crates.io
use httpmock::prelude::*;
use time::{OffsetDateTime, macros};
use url::Url;
// self
use token_keeper::{
	clock::ManualClock,
	credential::SubjectId,
	driver::OAuth2RefreshDriver,
	manager::{IssuedTokens, TokenManager},
	store::{MemoryStore, SecretStore},
};

pub const CLIENT_ID: &str = "keeper-client";
pub const CLIENT_SECRET: &str = "keeper-secret";
/// `base64("keeper-client:keeper-secret")`.
pub const BASIC_AUTH: &str = "Basic a2VlcGVyLWNsaWVudDprZWVwZXItc2VjcmV0";

pub fn epoch() -> OffsetDateTime {
	macros::datetime!(2025-01-01 00:00 UTC)
}

pub fn subject(id: &str) -> SubjectId {
	SubjectId::new(id).expect("Subject fixture should be valid.")
}

pub fn token_body(access: &str, refresh: &str, expires_in: i64) -> String {
	format!(
		"{{\"access_token\":\"{access}\",\"token_type\":\"Bearer\",\"expires_in\":{expires_in},\"refresh_token\":\"{refresh}\"}}"
	)
}

pub fn driver(server: &MockServer) -> OAuth2RefreshDriver {
	let token_url =
		Url::parse(&server.url("/v2/oauth/token")).expect("Mock token endpoint should parse.");

	OAuth2RefreshDriver::new(CLIENT_ID, CLIENT_SECRET, &token_url)
		.expect("Driver should build for the mock endpoint.")
}

pub struct Keeper {
	pub manager: Arc<TokenManager>,
	pub clock: ManualClock,
	pub store: MemoryStore,
}

/// Manager wired to the mock token endpoint, an in-memory store, and a clock frozen at
/// [`epoch`].
pub fn keeper(server: &MockServer) -> Keeper {
	keeper_with_store(server, MemoryStore::default())
}

pub fn keeper_with_store(server: &MockServer, store: MemoryStore) -> Keeper {
	let clock = ManualClock::new(epoch());
	let backend: Arc<dyn SecretStore> = Arc::new(store.clone());
	let manager =
		TokenManager::new(backend, Arc::new(driver(server))).with_clock(Arc::new(clock.clone()));

	Keeper { manager: Arc::new(manager), clock, store }
}

pub async fn ingest(manager: &TokenManager, id: &str, access: &str, refresh: &str) {
	manager
		.ingest(IssuedTokens::new(subject(id), access, refresh, 1_200))
		.await
		.expect("Ingest should succeed.");
}
