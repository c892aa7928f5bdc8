//! File-backed [`SecretStore`] for single-node deployments.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// crates.io
use base64::{Engine, engine::general_purpose::STANDARD};
// self
use crate::{
	_prelude::*,
	store::{SecretStore, StoreError, StoreFuture},
};

type Snapshot = BTreeMap<String, Vec<u8>>;

/// Persists payloads to a JSON file (key → base64 payload) after each mutation.
///
/// Each put rewrites the whole snapshot off the async workers; reads wait while a rewrite holds
/// the lock.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Snapshot>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Location of the snapshot file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
		if !path.exists() {
			return Ok(Snapshot::new());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(Snapshot::new());
		}

		let encoded: BTreeMap<String, String> =
			serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
				message: format!("Failed to parse {}: {e}", path.display()),
			})?;

		encoded
			.into_iter()
			.map(|(key, value)| {
				STANDARD.decode(value.as_bytes()).map(|payload| (key.clone(), payload)).map_err(
					|e| StoreError::Serialization {
						message: format!("Payload for `{key}` is not valid base64: {e}"),
					},
				)
			})
			.collect()
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn put_blocking(&self, key: String, payload: Vec<u8>) -> Result<(), StoreError> {
		let mut guard = self.inner.write();
		let previous = guard.insert(key.clone(), payload);

		if let Err(e) = self.persist_locked(&guard) {
			// Keep memory in line with what is on disk.
			match previous {
				Some(old) => guard.insert(key, old),
				None => guard.remove(&key),
			};

			return Err(e);
		}

		Ok(())
	}

	fn persist_locked(&self, contents: &Snapshot) -> Result<(), StoreError> {
		let encoded: BTreeMap<&str, String> =
			contents.iter().map(|(key, payload)| (key.as_str(), STANDARD.encode(payload))).collect();
		let serialized =
			serde_json::to_vec_pretty(&encoded).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl SecretStore for FileStore {
	/// Writes run on tokio's blocking pool; a put whose future is dropped still completes there.
	fn put<'a>(&'a self, key: &'a str, payload: Vec<u8>) -> StoreFuture<'a, ()> {
		let store = self.clone();
		let key = key.to_owned();

		Box::pin(async move {
			tokio::task::spawn_blocking(move || store.put_blocking(key, payload)).await.map_err(
				|e| StoreError::Backend { message: format!("Snapshot write task failed: {e}") },
			)?
		})
	}

	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
		Box::pin(async move { Ok(self.inner.read().get(key).cloned()) })
	}

	fn list<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<String>> {
		Box::pin(async move {
			Ok(self.inner.read().keys().filter(|key| key.starts_with(prefix)).cloned().collect())
		})
	}
}
