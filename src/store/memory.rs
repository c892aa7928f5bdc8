//! Thread-safe in-memory [`SecretStore`] for local development and tests.

// self
use crate::{
	_prelude::*,
	store::{SecretStore, StoreError, StoreFuture},
};

type StoreMap = Arc<RwLock<BTreeMap<String, Vec<u8>>>>;

/// Storage backend that keeps payloads in-process; clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Number of stored keys.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when nothing has been stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	fn put_now(map: StoreMap, key: String, payload: Vec<u8>) -> Result<(), StoreError> {
		map.write().insert(key, payload);

		Ok(())
	}

	fn list_now(map: StoreMap, prefix: &str) -> Vec<String> {
		map.read()
			.range(prefix.to_owned()..)
			.take_while(|(key, _)| key.starts_with(prefix))
			.map(|(key, _)| key.clone())
			.collect()
	}
}
impl SecretStore for MemoryStore {
	fn put<'a>(&'a self, key: &'a str, payload: Vec<u8>) -> StoreFuture<'a, ()> {
		let map = self.0.clone();
		let key = key.to_owned();

		Box::pin(async move { Self::put_now(map, key, payload) })
	}

	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.read().get(key).cloned()) })
	}

	fn list<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<String>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(Self::list_now(map, prefix)) })
	}
}
