//! Token lifecycle manager with per-subject singleflight refresh.
//!
//! [`TokenManager::get_valid_token`] is the single place where staleness is decided. A fresh
//! record is returned straight from the store without locking. A stale one takes the subject's
//! guard, re-reads the record, and only then calls the [`RefreshDriver`]; callers queued behind
//! the guard observe the rotated record and never trigger a second exchange. When the exchange
//! fails instead, callers that were already queued receive [`RefreshError::Coalesced`] carrying
//! the same failure rather than spending the refresh token again. The next caller to arrive after
//! the failure retries.

pub mod ingest;

mod metrics;

pub use ingest::IssuedTokens;
pub use metrics::RefreshMetrics;

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	clock::{Clock, SystemClock},
	codec,
	config::RefreshPolicy,
	credential::{CredentialRecord, SubjectId, TokenSecret},
	driver::RefreshDriver,
	error::RefreshError,
	obs::{self, ErrorChain, OpKind, OpOutcome, OpSpan},
	store::{KeyNamespace, SecretStore, StoreError, StoreFuture},
};

/// Result of [`TokenManager::ensure_fresh`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
	/// The stored record was already valid for at least the staleness margin.
	Fresh,
	/// The record was stale and has been replaced by a newly exchanged one.
	Refreshed,
}

/// Reads, writes, and refreshes credential records for any number of subjects.
pub struct TokenManager {
	store: Arc<dyn SecretStore>,
	driver: Arc<dyn RefreshDriver>,
	clock: Arc<dyn Clock>,
	policy: RefreshPolicy,
	namespace: KeyNamespace,
	guards: Arc<Mutex<HashMap<SubjectId, Arc<SubjectGate>>>>,
	refresh_metrics: Arc<RefreshMetrics>,
}
impl TokenManager {
	/// Creates a manager with the system clock, the default policy, and the default namespace.
	pub fn new(store: Arc<dyn SecretStore>, driver: Arc<dyn RefreshDriver>) -> Self {
		Self {
			store,
			driver,
			clock: Arc::new(SystemClock),
			policy: RefreshPolicy::default(),
			namespace: KeyNamespace::default(),
			guards: Default::default(),
			refresh_metrics: Default::default(),
		}
	}

	/// Builds a manager backed by [`crate::driver::OAuth2RefreshDriver`] from a validated
	/// configuration.
	#[cfg(feature = "reqwest")]
	pub fn from_config(
		config: &crate::config::KeeperConfig,
		store: Arc<dyn SecretStore>,
	) -> Result<Self> {
		config.validate()?;

		let driver = crate::driver::OAuth2RefreshDriver::new(
			&config.client_id,
			&config.client_secret,
			&config.token_url,
		)?;

		Ok(Self::new(store, Arc::new(driver))
			.with_policy(config.policy)
			.with_namespace(config.namespace()))
	}

	/// Replaces the time source.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Replaces the timing policy.
	pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
		self.policy = policy;

		self
	}

	/// Replaces the store key namespace.
	pub fn with_namespace(mut self, namespace: KeyNamespace) -> Self {
		self.namespace = namespace;

		self
	}

	/// Timing policy in effect.
	pub fn policy(&self) -> &RefreshPolicy {
		&self.policy
	}

	/// Key namespace in effect.
	pub fn namespace(&self) -> &KeyNamespace {
		&self.namespace
	}

	/// Counters describing refresh activity since construction.
	pub fn refresh_metrics(&self) -> &RefreshMetrics {
		&self.refresh_metrics
	}

	/// Returns an access token that stays valid for at least the staleness margin.
	///
	/// Fails with [`Error::NotFound`] for unknown subjects and [`Error::RefreshFailed`] when a
	/// required refresh could not be completed. A stale token is never returned.
	pub async fn get_valid_token(&self, subject: &SubjectId) -> Result<TokenSecret> {
		let (_, record) = self.read("get_valid_token", subject).await?;

		Ok(record.access_token)
	}

	/// Performs the same staleness check as [`TokenManager::get_valid_token`] and reports
	/// whether a refresh happened.
	pub async fn ensure_fresh(&self, subject: &SubjectId) -> Result<Freshness> {
		let (freshness, _) = self.read("ensure_fresh", subject).await?;

		Ok(freshness)
	}

	/// Replaces the stored record for `record.subject`.
	///
	/// The write waits for any in-flight refresh of the same subject.
	pub async fn store(&self, record: CredentialRecord) -> Result<()> {
		const KIND: OpKind = OpKind::Store;

		let span = OpSpan::new(KIND, "store", Some(record.subject.as_str()));

		obs::record_outcome(KIND, OpOutcome::Attempt);

		let subject = record.subject.clone();
		let result = span
			.instrument(async {
				let gate = self.subject_gate(&subject);
				let mut last_failure = gate.last_failure.lock().await;

				self.write_record(&record).await?;
				*last_failure = None;

				Ok::<_, Error>(())
			})
			.await;

		match &result {
			Ok(()) => obs::finish_op(&span, KIND, OpOutcome::Success),
			Err(err) => {
				span.finish(OpOutcome::Failure);
				obs::report_failure(KIND, &subject, err);
			},
		}

		result
	}

	/// Loads the stored record without any freshness check.
	pub async fn record(&self, subject: &SubjectId) -> Result<Option<CredentialRecord>> {
		self.load(subject).await
	}

	/// Lists every subject stored under this manager's namespace.
	pub async fn subjects(&self) -> Result<Vec<SubjectId>> {
		let keys = self.bounded("list", self.store.list(self.namespace.prefix())).await?;
		let subjects = keys
			.into_iter()
			.filter_map(|key| {
				let subject = self.namespace.subject(&key);

				#[cfg(feature = "tracing")]
				if subject.is_none() {
					tracing::warn!(%key, "skipping store key without a valid subject");
				}

				subject
			})
			.collect();

		Ok(subjects)
	}

	pub(crate) fn now(&self) -> OffsetDateTime {
		self.clock.now()
	}

	async fn read(
		&self,
		stage: &'static str,
		subject: &SubjectId,
	) -> Result<(Freshness, CredentialRecord)> {
		const KIND: OpKind = OpKind::Refresh;

		let span = OpSpan::new(KIND, stage, Some(subject.as_str()));
		let result = span.instrument(self.ensure_record(subject)).await;

		match &result {
			Ok((freshness, _)) => obs::finish_op(&span, KIND, (*freshness).into()),
			Err(_) => span.finish(OpOutcome::Failure),
		}

		result
	}

	async fn ensure_record(&self, subject: &SubjectId) -> Result<(Freshness, CredentialRecord)> {
		let current = self.require(subject).await?;

		if current.is_valid_at(self.clock.now(), self.policy.staleness_margin) {
			return Ok((Freshness::Fresh, current));
		}

		self.refresh(subject).await
	}

	async fn refresh(&self, subject: &SubjectId) -> Result<(Freshness, CredentialRecord)> {
		let result = self.refresh_locked(subject).await;

		if let Err(err) = &result {
			self.refresh_metrics.record_failure();
			obs::report_failure(OpKind::Refresh, subject, err);
		}

		result
	}

	async fn refresh_locked(&self, subject: &SubjectId) -> Result<(Freshness, CredentialRecord)> {
		let gate = self.subject_gate(subject);
		let arrived_after = gate.completed.load(Ordering::Acquire);
		let mut last_failure = gate.last_failure.lock().await;
		let current = self.require(subject).await?;

		if current.is_valid_at(self.clock.now(), self.policy.staleness_margin) {
			self.refresh_metrics.record_reuse();

			return Ok((Freshness::Fresh, current));
		}
		if let Some(failed) = last_failure.as_ref().filter(|failed| {
			failed.attempt > arrived_after && failed.refresh_token == current.refresh_token
		}) {
			return Err(Error::RefreshFailed {
				subject: subject.clone(),
				source: RefreshError::Coalesced {
					reason: failed.reason.clone(),
					grant_rejected: failed.grant_rejected,
				},
			});
		}

		self.refresh_metrics.record_exchange();

		let exchanged = tokio::time::timeout(
			self.policy.exchange_timeout.unsigned_abs(),
			self.driver.exchange(&current.refresh_token),
		)
		.await
		.unwrap_or(Err(RefreshError::Timeout { after: self.policy.exchange_timeout }));
		let attempt = gate.completed.fetch_add(1, Ordering::AcqRel) + 1;
		let grant = match exchanged {
			Ok(grant) => grant,
			Err(source) => {
				*last_failure = Some(FailedExchange {
					attempt,
					refresh_token: current.refresh_token,
					reason: ErrorChain(&source).to_string(),
					grant_rejected: source.is_grant_rejected(),
				});

				return Err(Error::RefreshFailed { subject: subject.clone(), source });
			},
		};
		let refresh_token = grant.refresh_token.unwrap_or(current.refresh_token);
		let updated = CredentialRecord::builder(subject.clone())
			.issued_at(self.clock.now())
			.expires_in_secs(grant.expires_in)
			.access_token(grant.access_token)
			.refresh_token(refresh_token)
			.build()
			.map_err(|err| Error::RefreshFailed {
				subject: subject.clone(),
				source: RefreshError::from(err),
			})?;

		self.write_record(&updated).await?;
		*last_failure = None;

		Ok((Freshness::Refreshed, updated))
	}

	async fn require(&self, subject: &SubjectId) -> Result<CredentialRecord> {
		self.load(subject).await?.ok_or_else(|| Error::NotFound { subject: subject.clone() })
	}

	async fn load(&self, subject: &SubjectId) -> Result<Option<CredentialRecord>> {
		let key = self.namespace.key(subject);
		let Some(payload) = self.bounded("get", self.store.get(&key)).await? else {
			return Ok(None);
		};
		let record = codec::decode(subject.clone(), &payload).map_err(StoreError::from)?;

		Ok(Some(record))
	}

	async fn write_record(&self, record: &CredentialRecord) -> Result<()> {
		let key = self.namespace.key(&record.subject);
		let payload = codec::encode(record).map_err(StoreError::from)?;

		self.bounded("put", self.store.put(&key, payload)).await?;

		Ok(())
	}

	async fn bounded<T>(
		&self,
		operation: &'static str,
		fut: StoreFuture<'_, T>,
	) -> Result<T, StoreError> {
		tokio::time::timeout(self.policy.store_timeout.unsigned_abs(), fut)
			.await
			.unwrap_or(Err(StoreError::Timeout { operation }))
	}

	fn subject_gate(&self, subject: &SubjectId) -> Arc<SubjectGate> {
		let mut guards = self.guards.lock();

		guards.entry(subject.clone()).or_default().clone()
	}
}
impl Debug for TokenManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenManager")
			.field("policy", &self.policy)
			.field("namespace", &self.namespace)
			.field("refresh_metrics", &self.refresh_metrics)
			.finish_non_exhaustive()
	}
}

/// Per-subject singleflight lock plus the outcome of the last failed exchange.
#[derive(Default)]
struct SubjectGate {
	last_failure: AsyncMutex<Option<FailedExchange>>,
	// Exchanges finished under this gate; a failure is shared only with callers that arrived
	// before it finished.
	completed: AtomicU64,
}

struct FailedExchange {
	attempt: u64,
	refresh_token: TokenSecret,
	reason: String,
	grant_rejected: bool,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::*,
		clock::ManualClock,
		credential::RecordBuilderError,
		driver::TokenGrant,
		store::MemoryStore,
	};

	fn fixture(
		driver: ScriptedDriver,
	) -> (TokenManager, Arc<ScriptedDriver>, ManualClock, MemoryStore) {
		let store = MemoryStore::default();
		let driver = Arc::new(driver);
		let clock = ManualClock::new(epoch());
		let manager = TokenManager::new(Arc::new(store.clone()), driver.clone())
			.with_clock(Arc::new(clock.clone()));

		(manager, driver, clock, store)
	}

	async fn seed(manager: &TokenManager, subject: &SubjectId, expires_in: i64) {
		let record = CredentialRecord::builder(subject.clone())
			.issued_at(manager.now())
			.expires_in_secs(expires_in)
			.access_token("access-0")
			.refresh_token("refresh-0")
			.build()
			.expect("Seed record should build.");

		manager.store(record).await.expect("Seeding the store should succeed.");
	}

	#[tokio::test]
	async fn fresh_record_skips_driver() {
		let (manager, driver, _, _) = fixture(ScriptedDriver::default());
		let subject = subject("100001");

		seed(&manager, &subject, 1_200).await;

		let token =
			manager.get_valid_token(&subject).await.expect("Fresh token should be returned.");

		assert_eq!(token.expose(), "access-0");
		assert_eq!(driver.calls(), 0);
		assert_eq!(manager.refresh_metrics().exchanges(), 0);
	}

	#[tokio::test]
	async fn stale_record_is_refreshed_and_persisted() {
		let (manager, driver, clock, _) =
			fixture(ScriptedDriver::default().respond(Ok(TokenGrant::new("access-1", "refresh-1", 1_200))));
		let subject = subject("100001");

		seed(&manager, &subject, 1_200).await;
		clock.advance(Duration::seconds(1_100));

		assert_eq!(
			manager.ensure_fresh(&subject).await.expect("Stale record should refresh."),
			Freshness::Refreshed
		);

		let stored = manager
			.record(&subject)
			.await
			.expect("Store read should succeed.")
			.expect("Refreshed record should exist.");

		assert_eq!(stored.access_token.expose(), "access-1");
		assert_eq!(stored.refresh_token.expose(), "refresh-1");
		assert_eq!(stored.issued_at, clock.now());
		assert_eq!(driver.seen_refresh_tokens(), vec!["refresh-0".to_owned()]);
	}

	#[tokio::test]
	async fn omitted_refresh_token_keeps_current_one() {
		let grant = TokenGrant {
			access_token: "access-1".into(),
			refresh_token: None,
			expires_in: 1_200,
		};
		let (manager, _, clock, _) = fixture(ScriptedDriver::default().respond(Ok(grant)));
		let subject = subject("100001");

		seed(&manager, &subject, 1_200).await;
		clock.advance(Duration::seconds(1_200));
		manager.get_valid_token(&subject).await.expect("Expired record should refresh.");

		let stored = manager
			.record(&subject)
			.await
			.expect("Store read should succeed.")
			.expect("Record should exist.");

		assert_eq!(stored.refresh_token.expose(), "refresh-0");
	}

	#[tokio::test]
	async fn unknown_subject_is_not_found() {
		let (manager, driver, _, _) = fixture(ScriptedDriver::default());
		let err = manager
			.get_valid_token(&subject("404"))
			.await
			.expect_err("Unknown subjects should fail.");

		assert!(matches!(err, Error::NotFound { .. }));
		assert_eq!(driver.calls(), 0);
	}

	#[tokio::test]
	async fn failed_refresh_leaves_record_untouched() {
		let (manager, _, clock, _) = fixture(
			ScriptedDriver::default()
				.respond(Err(RefreshError::InvalidGrant { reason: "invalid_grant".into() })),
		);
		let subject = subject("100001");

		seed(&manager, &subject, 1_200).await;

		let before = manager.record(&subject).await.expect("Store read should succeed.");

		clock.advance(Duration::seconds(1_150));

		let err = manager
			.get_valid_token(&subject)
			.await
			.expect_err("Rejected refresh should surface an error.");

		assert!(matches!(
			err,
			Error::RefreshFailed { source: RefreshError::InvalidGrant { .. }, .. }
		));
		assert_eq!(manager.record(&subject).await.expect("Store read should succeed."), before);
		assert_eq!(manager.refresh_metrics().failures(), 1);
	}

	#[tokio::test]
	async fn unusable_grant_is_a_refresh_failure() {
		let (manager, _, clock, _) =
			fixture(ScriptedDriver::default().respond(Ok(TokenGrant::new("", "refresh-1", 1_200))));
		let subject = subject("100001");

		seed(&manager, &subject, 1_200).await;
		clock.advance(Duration::seconds(1_150));

		let err = manager
			.get_valid_token(&subject)
			.await
			.expect_err("Empty access tokens should be rejected.");

		assert!(matches!(
			err,
			Error::RefreshFailed { source: RefreshError::UnusableGrant(_), .. }
		));
	}

	#[tokio::test]
	async fn slow_exchange_times_out() {
		let (manager, _, clock, _) =
			fixture(ScriptedDriver::default().with_delay(std::time::Duration::from_secs(5)));
		let manager = manager.with_policy(
			RefreshPolicy::default().with_exchange_timeout(Duration::milliseconds(50)),
		);
		let subject = subject("100001");

		seed(&manager, &subject, 1_200).await;
		clock.advance(Duration::seconds(1_150));

		let err = manager
			.get_valid_token(&subject)
			.await
			.expect_err("Slow exchanges should time out.");

		assert!(matches!(err, Error::RefreshFailed { source: RefreshError::Timeout { .. }, .. }));
	}

	#[tokio::test]
	async fn concurrent_stale_reads_share_one_exchange() {
		let (manager, driver, clock, _) = fixture(
			ScriptedDriver::default()
				.with_delay(std::time::Duration::from_millis(50))
				.respond(Ok(TokenGrant::new("access-1", "refresh-1", 1_200))),
		);
		let manager = Arc::new(manager);
		let subject = subject("100001");

		seed(&manager, &subject, 1_200).await;
		clock.advance(Duration::seconds(1_100));

		let (a, b) =
			tokio::join!(manager.get_valid_token(&subject), manager.get_valid_token(&subject));

		assert_eq!(a.expect("First caller should succeed.").expose(), "access-1");
		assert_eq!(b.expect("Second caller should succeed.").expose(), "access-1");
		assert_eq!(driver.calls(), 1);
		assert_eq!(manager.refresh_metrics().reuses(), 1);
	}

	#[tokio::test]
	async fn queued_callers_share_a_failed_exchange() {
		let (manager, driver, clock, _) = fixture(
			ScriptedDriver::default()
				.reject("refresh-0")
				.with_delay(std::time::Duration::from_millis(50)),
		);
		let subject = subject("100001");

		seed(&manager, &subject, 1_200).await;
		clock.advance(Duration::seconds(1_100));

		let (a, b, c) = tokio::join!(
			manager.get_valid_token(&subject),
			manager.get_valid_token(&subject),
			manager.get_valid_token(&subject)
		);
		let errors = [a, b, c].map(|result| result.expect_err("Every caller should fail."));

		assert_eq!(driver.calls(), 1);
		assert_eq!(manager.refresh_metrics().exchanges(), 1);
		assert!(errors.iter().all(|err| matches!(
			err,
			Error::RefreshFailed { source, .. } if source.is_grant_rejected()
		)));
		assert_eq!(
			errors
				.iter()
				.filter(|err| matches!(
					err,
					Error::RefreshFailed { source: RefreshError::Coalesced { .. }, .. }
				))
				.count(),
			2
		);

		manager.get_valid_token(&subject).await.expect_err("A later caller should retry and fail.");

		assert_eq!(driver.calls(), 2);
	}

	#[tokio::test]
	async fn failure_is_not_shared_after_the_record_changes() {
		let (manager, driver, clock, _) = fixture(
			ScriptedDriver::default()
				.respond(Err(RefreshError::InvalidGrant { reason: "invalid_grant".into() }))
				.respond(Ok(TokenGrant::new("access-2", "refresh-2", 1_200))),
		);
		let subject = subject("100001");

		seed(&manager, &subject, 1_200).await;
		clock.advance(Duration::seconds(1_100));
		manager.get_valid_token(&subject).await.expect_err("First exchange should fail.");
		manager
			.ingest(IssuedTokens::new(subject.clone(), "access-1", "refresh-1", 60))
			.await
			.expect("Re-authorization should store new tokens.");

		let token =
			manager.get_valid_token(&subject).await.expect("New refresh token should be exchanged.");

		assert_eq!(token.expose(), "access-2");
		assert_eq!(
			driver.seen_refresh_tokens(),
			vec!["refresh-0".to_owned(), "refresh-1".to_owned()]
		);
	}

	#[tokio::test]
	async fn overflowing_grant_is_an_unusable_grant() {
		let (manager, _, clock, _) = fixture(
			ScriptedDriver::default().respond(Ok(TokenGrant::new("access-1", "refresh-1", i64::MAX / 2))),
		);
		let subject = subject("100001");

		seed(&manager, &subject, 1_200).await;
		clock.advance(Duration::seconds(1_150));

		let err = manager
			.get_valid_token(&subject)
			.await
			.expect_err("Unrepresentable expiry should be rejected.");

		assert!(matches!(
			err,
			Error::RefreshFailed {
				source: RefreshError::UnusableGrant(RecordBuilderError::ExpiryOutOfRange),
				..
			}
		));
	}

	#[tokio::test]
	async fn overflowing_stored_expiry_is_a_storage_error() {
		let (manager, driver, _, store) = fixture(ScriptedDriver::default());
		let payload = br#"{"access_token":"a","refresh_token":"r","expires_in":9000000000000000,"timestamp":0}"#;

		store.put("eve-token-100001", payload.to_vec()).await.expect("Put should succeed.");

		let err = manager
			.get_valid_token(&subject("100001"))
			.await
			.expect_err("Unrepresentable expiry should fail.");

		assert!(matches!(err, Error::Storage(StoreError::Serialization { .. })));
		assert_eq!(driver.calls(), 0);
	}

	#[tokio::test]
	async fn subjects_skip_foreign_and_invalid_keys() {
		let (manager, _, _, store) = fixture(ScriptedDriver::default());

		seed(&manager, &subject("100001"), 1_200).await;
		seed(&manager, &subject("100002"), 1_200).await;
		store.put("other-100003", b"{}".to_vec()).await.expect("Foreign put should succeed.");
		store.put("eve-token-", b"{}".to_vec()).await.expect("Empty-subject put should succeed.");

		let subjects = manager.subjects().await.expect("Listing should succeed.");

		assert_eq!(subjects, vec![subject("100001"), subject("100002")]);
	}

	#[tokio::test]
	async fn corrupt_payload_is_a_storage_error() {
		let (manager, _, _, store) = fixture(ScriptedDriver::default());

		store.put("eve-token-100001", b"not json".to_vec()).await.expect("Put should succeed.");

		let err = manager
			.get_valid_token(&subject("100001"))
			.await
			.expect_err("Corrupt payloads should fail.");

		assert!(matches!(err, Error::Storage(StoreError::Serialization { .. })));
	}
}
