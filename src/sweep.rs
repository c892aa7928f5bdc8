//! Periodic sweep that keeps every stored subject fresh.
//!
//! The scheduler sweeps once immediately and then on a fixed interval. Iterations never overlap:
//! the loop awaits each sweep before waiting for the next tick, missed ticks are skipped, and a
//! manual [`SweepScheduler::sweep_once`] that races a running sweep is dropped.

// crates.io
use futures::{StreamExt, stream};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	credential::SubjectId,
	manager::{Freshness, TokenManager},
	obs::{self, OpKind, OpOutcome, OpSpan},
};

/// Per-subject failure collected during a sweep.
#[derive(Debug)]
pub struct SweepFailure {
	/// Subject that failed; `None` when the subject listing itself failed.
	pub subject: Option<SubjectId>,
	/// Error reported by the manager.
	pub error: Error,
}

/// Summary of one sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
	/// Subjects whose freshness was checked.
	pub checked: usize,
	/// Subjects that were refreshed.
	pub refreshed: usize,
	/// Failures, isolated per subject.
	pub failures: Vec<SweepFailure>,
}
impl SweepReport {
	/// Returns `true` when no failure was recorded.
	pub fn is_clean(&self) -> bool {
		self.failures.is_empty()
	}
}

/// Drives [`TokenManager::ensure_fresh`] across all subjects on a schedule.
#[derive(Debug)]
pub struct SweepScheduler {
	manager: Arc<TokenManager>,
	interval: Duration,
	concurrency: usize,
	running: AsyncMutex<()>,
}
impl SweepScheduler {
	/// Creates a scheduler that sweeps every `interval` with the default fan-out.
	pub fn new(manager: Arc<TokenManager>, interval: Duration) -> Self {
		Self {
			manager,
			interval,
			concurrency: crate::config::KeeperConfig::DEFAULT_SWEEP_CONCURRENCY,
			running: AsyncMutex::new(()),
		}
	}

	/// Overrides how many subjects are refreshed concurrently; zero is treated as one.
	pub fn with_concurrency(mut self, concurrency: usize) -> Self {
		self.concurrency = concurrency.max(1);

		self
	}

	/// Manager the scheduler drives.
	pub fn manager(&self) -> &Arc<TokenManager> {
		&self.manager
	}

	/// Runs one sweep, or returns `None` when another sweep is already in progress.
	pub async fn sweep_once(&self) -> Option<SweepReport> {
		let Some(_running) = self.running.try_lock() else {
			#[cfg(feature = "tracing")]
			tracing::debug!("sweep already in progress; skipping");

			return None;
		};
		let span = OpSpan::new(OpKind::Sweep, "sweep_once", None);
		let report = span.instrument(self.sweep()).await;

		span.finish(if report.is_clean() { OpOutcome::Success } else { OpOutcome::Failure });

		Some(report)
	}

	/// Sweeps at start and then on every tick until `shutdown` is cancelled.
	///
	/// Cancellation is observed between sweeps, so a running sweep always completes.
	pub async fn run(&self, shutdown: CancellationToken) {
		let period = self.interval.unsigned_abs().max(std::time::Duration::from_millis(1));
		let mut tick = tokio::time::interval(period);

		tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

		loop {
			tokio::select! {
				biased;
				_ = shutdown.cancelled() => break,
				_ = tick.tick() => {},
			}

			self.sweep_once().await;
		}

		#[cfg(feature = "tracing")]
		tracing::info!("sweep scheduler stopped");
	}

	/// Moves the scheduler onto the runtime and returns a handle for shutting it down.
	pub fn spawn(self, shutdown: CancellationToken) -> SweepHandle {
		let scheduler = Arc::new(self);
		let token = shutdown.clone();
		let task = tokio::spawn(async move { scheduler.run(token).await });

		SweepHandle { shutdown, task }
	}

	async fn sweep(&self) -> SweepReport {
		const KIND: OpKind = OpKind::Sweep;

		obs::record_outcome(KIND, OpOutcome::Attempt);

		let mut report = SweepReport::default();
		let subjects = match self.manager.subjects().await {
			Ok(subjects) => subjects,
			Err(error) => {
				#[cfg(feature = "tracing")]
				tracing::warn!(error = %obs::ErrorChain(&error), "failed to list subjects");

				obs::record_outcome(KIND, OpOutcome::Failure);
				report.failures.push(SweepFailure { subject: None, error });

				return report;
			},
		};
		let manager = &self.manager;
		let outcomes = stream::iter(subjects)
			.map(|subject| async move {
				let outcome = manager.ensure_fresh(&subject).await;

				(subject, outcome)
			})
			.buffer_unordered(self.concurrency)
			.collect::<Vec<_>>()
			.await;

		for (subject, outcome) in outcomes {
			report.checked += 1;

			match outcome {
				Ok(Freshness::Refreshed) => report.refreshed += 1,
				Ok(Freshness::Fresh) => {},
				Err(error) => report.failures.push(SweepFailure { subject: Some(subject), error }),
			}
		}

		#[cfg(feature = "tracing")]
		tracing::info!(
			checked = report.checked,
			refreshed = report.refreshed,
			failed = report.failures.len(),
			"sweep finished"
		);

		obs::record_outcome(
			KIND,
			if report.is_clean() { OpOutcome::Success } else { OpOutcome::Failure },
		);

		report
	}
}

/// Handle to a spawned [`SweepScheduler`].
#[derive(Debug)]
pub struct SweepHandle {
	shutdown: CancellationToken,
	task: JoinHandle<()>,
}
impl SweepHandle {
	/// Returns `true` once the scheduler task has exited.
	pub fn is_finished(&self) -> bool {
		self.task.is_finished()
	}

	/// Cancels the scheduler and waits for the in-progress sweep, if any, to finish.
	pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
		self.shutdown.cancel();

		self.task.await
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::*,
		clock::ManualClock,
		config::RefreshPolicy,
		manager::IssuedTokens,
		store::{MemoryStore, SecretStore},
	};

	async fn stale_manager(
		driver: ScriptedDriver,
		subjects: &[&str],
	) -> (Arc<TokenManager>, Arc<ScriptedDriver>, ManualClock) {
		let driver = Arc::new(driver);
		let clock = ManualClock::new(epoch());
		let manager = TokenManager::new(Arc::new(MemoryStore::default()), driver.clone())
			.with_clock(Arc::new(clock.clone()))
			.with_policy(RefreshPolicy::default().with_exchange_timeout(Duration::hours(1)));

		for id in subjects {
			manager
				.ingest(IssuedTokens::new(
					subject(id),
					format!("access-{id}"),
					format!("refresh-{id}"),
					1_200,
				))
				.await
				.expect("Ingest should succeed.");
		}

		clock.advance(Duration::seconds(1_100));

		(Arc::new(manager), driver, clock)
	}

	async fn sleep_until_minute(start: tokio::time::Instant, minutes: u64) {
		tokio::time::sleep_until(start + std::time::Duration::from_secs(minutes * 60)).await;
	}

	#[tokio::test]
	async fn failures_are_isolated_per_subject() {
		let (manager, driver, _) = stale_manager(
			ScriptedDriver::default().reject("refresh-100002"),
			&["100001", "100002", "100003"],
		)
		.await;
		let scheduler = SweepScheduler::new(manager.clone(), Duration::minutes(18));
		let report = scheduler.sweep_once().await.expect("Idle scheduler should sweep.");

		assert_eq!(report.checked, 3);
		assert_eq!(report.refreshed, 2);
		assert_eq!(report.failures.len(), 1);
		assert_eq!(report.failures[0].subject, Some(subject("100002")));
		assert_eq!(driver.calls(), 3);

		let kept = manager
			.record(&subject("100002"))
			.await
			.expect("Store read should succeed.")
			.expect("Failed subject should keep its record.");

		assert_eq!(kept.refresh_token.expose(), "refresh-100002");
	}

	#[tokio::test]
	async fn listing_failure_yields_single_failure() {
		let driver = Arc::new(ScriptedDriver::default());
		let manager = Arc::new(TokenManager::new(Arc::new(FailingStore), driver));
		let report = SweepScheduler::new(manager, Duration::minutes(18))
			.sweep_once()
			.await
			.expect("Idle scheduler should sweep.");

		assert_eq!(report.checked, 0);
		assert_eq!(report.failures.len(), 1);
		assert!(report.failures[0].subject.is_none());
	}

	#[tokio::test]
	async fn overlapping_sweeps_are_skipped() {
		let (manager, _, _) = stale_manager(
			ScriptedDriver::default().with_delay(std::time::Duration::from_millis(100)),
			&["100001"],
		)
		.await;
		let scheduler = SweepScheduler::new(manager, Duration::minutes(18));
		let (first, second) = tokio::join!(scheduler.sweep_once(), async {
			tokio::time::sleep(std::time::Duration::from_millis(10)).await;

			scheduler.sweep_once().await
		});

		assert_eq!(first.expect("First sweep should run.").refreshed, 1);
		assert!(second.is_none());
	}

	#[tokio::test]
	async fn spawned_scheduler_sweeps_at_start_and_stops_on_cancel() {
		let (manager, driver, _) = stale_manager(ScriptedDriver::default(), &["100001"]).await;
		let handle = SweepScheduler::new(manager, Duration::hours(1)).spawn(CancellationToken::new());

		tokio::time::timeout(std::time::Duration::from_secs(5), async {
			while driver.calls() == 0 {
				tokio::time::sleep(std::time::Duration::from_millis(5)).await;
			}
		})
		.await
		.expect("Start-up sweep should run promptly.");
		handle.shutdown().await.expect("Scheduler task should exit cleanly.");

		assert_eq!(driver.calls(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn scheduler_sweeps_at_start_and_on_each_interval() {
		let (manager, driver, clock) = stale_manager(ScriptedDriver::default(), &["100001"]).await;
		let start = tokio::time::Instant::now();
		let handle =
			SweepScheduler::new(manager, Duration::minutes(18)).spawn(CancellationToken::new());

		tokio::time::sleep(std::time::Duration::from_secs(1)).await;

		assert_eq!(driver.calls(), 1);

		clock.advance(Duration::seconds(1_100));
		sleep_until_minute(start, 10).await;

		assert_eq!(driver.calls(), 1);

		sleep_until_minute(start, 19).await;

		assert_eq!(driver.calls(), 2);
		assert_eq!(
			driver.seen_refresh_tokens(),
			vec!["refresh-100001".to_owned(), "refresh-1".to_owned()]
		);

		handle.shutdown().await.expect("Scheduler task should exit cleanly.");
	}

	#[tokio::test(start_paused = true)]
	async fn sweep_longer_than_interval_never_overlaps() {
		let (manager, driver, _) = stale_manager(
			ScriptedDriver::default()
				.reject("refresh-100001")
				.with_delay(std::time::Duration::from_secs(25 * 60)),
			&["100001"],
		)
		.await;
		let start = tokio::time::Instant::now();
		let handle =
			SweepScheduler::new(manager, Duration::minutes(18)).spawn(CancellationToken::new());

		sleep_until_minute(start, 20).await;

		assert_eq!(driver.calls(), 1);

		sleep_until_minute(start, 26).await;

		assert_eq!(driver.calls(), 2);

		sleep_until_minute(start, 45).await;

		assert_eq!(driver.calls(), 2);
		assert_eq!(driver.peak_in_flight(), 1);

		handle.shutdown().await.expect("Scheduler task should exit cleanly.");
	}

	struct FailingStore;
	impl SecretStore for FailingStore {
		fn put<'a>(&'a self, _: &'a str, _: Vec<u8>) -> crate::store::StoreFuture<'a, ()> {
			Box::pin(async { Err(crate::store::StoreError::Backend { message: "offline".into() }) })
		}

		fn get<'a>(&'a self, _: &'a str) -> crate::store::StoreFuture<'a, Option<Vec<u8>>> {
			Box::pin(async { Err(crate::store::StoreError::Backend { message: "offline".into() }) })
		}

		fn list<'a>(&'a self, _: &'a str) -> crate::store::StoreFuture<'a, Vec<String>> {
			Box::pin(async { Err(crate::store::StoreError::Backend { message: "offline".into() }) })
		}
	}
}
