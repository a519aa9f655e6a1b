//! Single-flight refresh coordination over one credential pair.
//!
//! The coordinator owns the only mutable shared state of a session: the current
//! [`TokenState`] reference and the in-flight marker. Both live behind one short
//! [`Mutex`] critical section that never spans a network call. An in-flight round is
//! represented by a [`Flight`] whose [`AsyncOnceCell`] carries the single outcome every
//! concurrent caller receives.

// self
use crate::{
	_prelude::*,
	auth::{Credentials, TokenState},
	clock::Clock,
	error::{ErrorKind, TransientError},
	obs::{self, OpKind},
	refresh::{RefreshMetrics, Refresher},
};

/// Retry and deadline budget applied to each refresh round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshPolicy {
	/// Total refresher calls allowed per round; transient failures consume one each.
	pub attempts: u32,
	/// Delay before the first retry; doubles on each subsequent retry.
	pub backoff: std::time::Duration,
	/// Deadline applied to each individual refresher call.
	pub timeout: std::time::Duration,
}
impl Default for RefreshPolicy {
	fn default() -> Self {
		Self {
			attempts: 2,
			backoff: std::time::Duration::from_millis(250),
			timeout: std::time::Duration::from_secs(30),
		}
	}
}

#[derive(Debug, Default)]
struct Slot {
	current: Option<Arc<TokenState>>,
	in_flight: Option<Arc<Flight>>,
}
impl Slot {
	fn valid_at(&self, now: OffsetDateTime) -> Option<Arc<TokenState>> {
		self.current.as_ref().filter(|token| token.is_valid_at(now)).cloned()
	}
}

#[derive(Debug)]
struct Flight {
	outcome: AsyncOnceCell<Result<Arc<TokenState>>>,
}
impl Flight {
	fn new() -> Arc<Self> {
		Arc::new(Self { outcome: AsyncOnceCell::new() })
	}
}

/// Ensures at most one refresh is outstanding at any time and shares its outcome.
pub struct RefreshCoordinator {
	credentials: Credentials,
	refresher: Arc<dyn Refresher>,
	clock: Arc<dyn Clock>,
	policy: RefreshPolicy,
	slot: Mutex<Slot>,
	metrics: RefreshMetrics,
}
impl RefreshCoordinator {
	/// Creates a coordinator with an empty token slot.
	pub fn new(
		credentials: Credentials,
		refresher: Arc<dyn Refresher>,
		clock: Arc<dyn Clock>,
		policy: RefreshPolicy,
	) -> Self {
		Self {
			credentials,
			refresher,
			clock,
			policy,
			slot: Default::default(),
			metrics: Default::default(),
		}
	}

	/// Returns a currently valid token, refreshing at most once across all concurrent callers.
	///
	/// The fast path completes without suspension when the cached token is still valid.
	/// Otherwise the caller either starts a new round or awaits the outstanding one; every
	/// caller of a round observes the same token or the same error.
	pub async fn ensure_valid(&self) -> Result<Arc<TokenState>> {
		let flight = {
			let mut slot = self.slot.lock();

			if let Some(token) = slot.valid_at(self.clock.now()) {
				return Ok(token);
			}

			self.join_or_start(&mut slot)
		};

		self.await_flight(flight).await
	}

	/// Starts (or joins) a refresh round even if the cached token is still valid.
	///
	/// Concurrent readers keep using the previous token until the round installs its
	/// replacement.
	pub async fn force_refresh(&self) -> Result<Arc<TokenState>> {
		let flight = {
			let mut slot = self.slot.lock();

			self.join_or_start(&mut slot)
		};

		self.await_flight(flight).await
	}

	/// Drops `stale` from the slot if it is still the current token.
	///
	/// Returns `false` when another caller already replaced it, in which case the next
	/// [`ensure_valid`](Self::ensure_valid) simply picks up the newer token.
	pub fn invalidate(&self, stale: &Arc<TokenState>) -> bool {
		let mut slot = self.slot.lock();

		match &slot.current {
			Some(current) if Arc::ptr_eq(current, stale) => {
				slot.current = None;

				true
			},
			_ => false,
		}
	}

	/// Installs an externally obtained token, replacing the current one.
	pub fn install(&self, token: TokenState) -> Arc<TokenState> {
		let token = Arc::new(token);

		self.slot.lock().current = Some(token.clone());

		token
	}

	/// Returns the cached token if it is valid right now. Never touches the network.
	pub fn cached(&self) -> Option<Arc<TokenState>> {
		self.slot.lock().valid_at(self.clock.now())
	}

	/// Returns `true` while a refresh round is outstanding.
	pub fn is_refreshing(&self) -> bool {
		self.slot.lock().in_flight.is_some()
	}

	/// Discards the cached token.
	pub fn clear(&self) {
		self.slot.lock().current = None;
	}

	/// Refresh counters for this coordinator.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.metrics
	}

	/// Clock used for validity checks.
	pub fn clock(&self) -> &Arc<dyn Clock> {
		&self.clock
	}

	fn join_or_start(&self, slot: &mut Slot) -> Arc<Flight> {
		if let Some(flight) = &slot.in_flight {
			self.metrics.record_join();
			obs::event!(debug, "joining outstanding token refresh");

			return flight.clone();
		}

		let flight = Flight::new();

		slot.in_flight = Some(flight.clone());
		self.metrics.record_flight();

		flight
	}

	async fn await_flight(&self, flight: Arc<Flight>) -> Result<Arc<TokenState>> {
		flight.outcome.get_or_init(|| self.run_flight(&flight)).await.clone()
	}

	async fn run_flight(&self, flight: &Arc<Flight>) -> Result<Arc<TokenState>> {
		let outcome =
			obs::observe(OpKind::Refresh, "run_flight", self.refresh_with_retry()).await.map(Arc::new);

		// Install before releasing waiters so late arrivals hit the fast path.
		{
			let mut slot = self.slot.lock();

			if let Ok(token) = &outcome {
				slot.current = Some(token.clone());
			}
			if slot.in_flight.as_ref().is_some_and(|current| Arc::ptr_eq(current, flight)) {
				slot.in_flight = None;
			}
		}

		match &outcome {
			Ok(_token) => {
				self.metrics.record_success();
				obs::event!(debug, expires_at = %_token.expires_at(), "installed refreshed token");
			},
			Err(_err) => {
				self.metrics.record_failure();
				obs::event!(warn, error = %_err, "token refresh failed");
			},
		}

		outcome
	}

	async fn refresh_with_retry(&self) -> Result<TokenState> {
		let attempts = self.policy.attempts.max(1);
		let mut backoff = self.policy.backoff;
		let mut attempt = 1;

		loop {
			self.metrics.record_attempt();
			obs::event!(debug, attempt, "exchanging refresh token");

			let result = match tokio::time::timeout(
				self.policy.timeout,
				self.refresher.refresh(&self.credentials),
			)
			.await
			{
				Ok(result) => result,
				Err(_elapsed) => Err(TransientError::Timeout { endpoint: "token" }.into()),
			};

			match result {
				Err(err) if err.kind() == ErrorKind::Transient && attempt < attempts => {
					obs::event!(
						debug,
						attempt,
						backoff_ms = crate::config::millis(backoff),
						error = %err,
						"retrying token refresh after transient failure"
					);
					tokio::time::sleep(backoff).await;

					backoff = backoff.saturating_mul(2);
					attempt += 1;
				},
				result => return result,
			}
		}
	}
}
impl Debug for RefreshCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshCoordinator")
			.field("credentials", &self.credentials)
			.field("policy", &self.policy)
			.field("metrics", &self.metrics)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{
		collections::VecDeque,
		sync::atomic::{AtomicUsize, Ordering},
	};
	// crates.io
	use async_lock::Mutex as AsyncMutex;
	// self
	use super::*;
	use crate::clock::ManualClock;

	struct FakeRefresher {
		clock: Arc<ManualClock>,
		calls: AtomicUsize,
		gate: AsyncMutex<()>,
		failures: Mutex<VecDeque<Error>>,
	}
	impl FakeRefresher {
		fn new(clock: Arc<ManualClock>) -> Self {
			Self { clock, calls: AtomicUsize::new(0), gate: AsyncMutex::new(()), failures: Default::default() }
		}

		fn failing_with(self, errors: impl IntoIterator<Item = Error>) -> Self {
			self.failures.lock().extend(errors);

			self
		}

		fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl Refresher for FakeRefresher {
		fn refresh<'a>(&'a self, _credentials: &'a Credentials) -> crate::refresh::RefreshFuture<'a> {
			Box::pin(async move {
				let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
				let _open = self.gate.lock().await;

				if let Some(err) = self.failures.lock().pop_front() {
					return Err(err);
				}

				TokenState::from_lifetime(
					format!("access-{call}"),
					"Bearer",
					self.clock.now(),
					Duration::hours(1),
					Duration::seconds(30),
				)
			})
		}
	}

	fn coordinator(refresher: Arc<FakeRefresher>, clock: Arc<ManualClock>) -> Arc<RefreshCoordinator> {
		let credentials =
			Credentials::new("secret", "refresh").expect("Credential fixture should validate.");
		let policy = RefreshPolicy { backoff: std::time::Duration::from_millis(1), ..Default::default() };

		Arc::new(RefreshCoordinator::new(credentials, refresher, clock, policy))
	}

	fn fixture() -> (Arc<FakeRefresher>, Arc<ManualClock>, Arc<RefreshCoordinator>) {
		let clock = Arc::new(ManualClock::new(OffsetDateTime::now_utc()));
		let refresher = Arc::new(FakeRefresher::new(clock.clone()));
		let coordinator = coordinator(refresher.clone(), clock.clone());

		(refresher, clock, coordinator)
	}

	async fn wait_for_joins(coordinator: &RefreshCoordinator, expected: u64) {
		while coordinator.metrics().joins() < expected {
			tokio::time::sleep(std::time::Duration::from_millis(1)).await;
		}
	}

	#[tokio::test]
	async fn fast_path_reuses_valid_token() {
		let (refresher, _clock, coordinator) = fixture();
		let first = coordinator.ensure_valid().await.expect("Initial refresh should succeed.");
		let second = coordinator.ensure_valid().await.expect("Cached token should be reused.");

		assert!(Arc::ptr_eq(&first, &second));
		assert_eq!(refresher.calls(), 1);
		assert_eq!(coordinator.metrics().flights(), 1);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn concurrent_callers_share_one_refresh() {
		const CALLERS: u64 = 50;

		let (refresher, clock, coordinator) = fixture();

		coordinator.install(TokenState::new(
			"expired",
			"Bearer",
			clock.now() - Duration::hours(1),
			clock.now() - Duration::seconds(1),
		));

		let gate = refresher.gate.lock().await;
		let mut tasks = tokio::task::JoinSet::new();

		for _ in 0..CALLERS {
			let coordinator = coordinator.clone();

			tasks.spawn(async move { coordinator.ensure_valid().await });
		}

		wait_for_joins(&coordinator, CALLERS - 1).await;
		drop(gate);

		let mut tokens = Vec::new();

		while let Some(joined) = tasks.join_next().await {
			tokens.push(joined.expect("Task should not panic.").expect("Refresh should succeed."));
		}

		assert_eq!(refresher.calls(), 1);
		assert_eq!(tokens.len(), CALLERS as usize);
		assert!(tokens.iter().all(|token| Arc::ptr_eq(token, &tokens[0])));
		assert_eq!(tokens[0].access_token().expose(), "access-1");
		assert!(!coordinator.is_refreshing());
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn concurrent_callers_share_terminal_failure() {
		const CALLERS: u64 = 10;

		let clock = Arc::new(ManualClock::new(OffsetDateTime::now_utc()));
		let refresher = Arc::new(
			FakeRefresher::new(clock.clone())
				.failing_with([Error::InvalidCredentials { reason: "invalid_grant".into() }]),
		);
		let coordinator = coordinator(refresher.clone(), clock);
		let gate = refresher.gate.lock().await;
		let mut tasks = tokio::task::JoinSet::new();

		for _ in 0..CALLERS {
			let coordinator = coordinator.clone();

			tasks.spawn(async move { coordinator.ensure_valid().await });
		}

		wait_for_joins(&coordinator, CALLERS - 1).await;
		drop(gate);

		while let Some(joined) = tasks.join_next().await {
			let err = joined.expect("Task should not panic.").expect_err("Refresh should fail.");

			assert!(matches!(err, Error::InvalidCredentials { ref reason } if reason == "invalid_grant"));
		}

		assert_eq!(refresher.calls(), 1);
		assert_eq!(coordinator.metrics().failures(), 1);
	}

	#[tokio::test]
	async fn failures_are_not_cached() {
		let clock = Arc::new(ManualClock::new(OffsetDateTime::now_utc()));
		let refresher = Arc::new(
			FakeRefresher::new(clock.clone())
				.failing_with([Error::InvalidCredentials { reason: "invalid_grant".into() }]),
		);
		let coordinator = coordinator(refresher.clone(), clock);

		coordinator.ensure_valid().await.expect_err("First round should fail.");

		let token = coordinator.ensure_valid().await.expect("Second round should refresh again.");

		assert_eq!(token.access_token().expose(), "access-2");
		assert_eq!(coordinator.metrics().flights(), 2);
	}

	#[tokio::test]
	async fn transient_failures_retry_within_budget() {
		let clock = Arc::new(ManualClock::new(OffsetDateTime::now_utc()));
		let refresher = Arc::new(FakeRefresher::new(clock.clone()).failing_with([
			Error::from(TransientError::Timeout { endpoint: "token" }),
			Error::from(TransientError::Timeout { endpoint: "token" }),
		]));
		let coordinator = coordinator(refresher.clone(), clock);
		let err = coordinator.ensure_valid().await.expect_err("Budget of two attempts should run out.");

		assert_eq!(err.kind(), ErrorKind::Transient);
		assert_eq!(refresher.calls(), 2);

		let token = coordinator.ensure_valid().await.expect("Next round should succeed.");

		assert_eq!(token.access_token().expose(), "access-3");
	}

	#[tokio::test]
	async fn terminal_failures_are_never_retried() {
		let clock = Arc::new(ManualClock::new(OffsetDateTime::now_utc()));
		let refresher = Arc::new(
			FakeRefresher::new(clock.clone())
				.failing_with([Error::InvalidCredentials { reason: "invalid_client".into() }]),
		);
		let coordinator = coordinator(refresher.clone(), clock);

		coordinator.ensure_valid().await.expect_err("Terminal failure should surface.");

		assert_eq!(refresher.calls(), 1);
		assert_eq!(coordinator.metrics().attempts(), 1);
	}

	#[tokio::test]
	async fn expiry_triggers_exactly_one_new_round() {
		let (refresher, clock, coordinator) = fixture();
		let first = coordinator.ensure_valid().await.expect("Initial refresh should succeed.");

		clock.advance(Duration::hours(1));

		assert!(coordinator.cached().is_none());

		let second = coordinator.ensure_valid().await.expect("Expired token should refresh.");

		assert!(!Arc::ptr_eq(&first, &second));
		assert_eq!(refresher.calls(), 2);
	}

	#[tokio::test]
	async fn invalidate_only_drops_matching_token() {
		let (_refresher, _clock, coordinator) = fixture();
		let first = coordinator.ensure_valid().await.expect("Initial refresh should succeed.");
		let second = coordinator.force_refresh().await.expect("Forced refresh should succeed.");

		assert!(!coordinator.invalidate(&first));
		assert!(coordinator.cached().is_some_and(|token| Arc::ptr_eq(&token, &second)));
		assert!(coordinator.invalidate(&second));
		assert!(coordinator.cached().is_none());
	}

	#[tokio::test]
	async fn forced_refresh_keeps_previous_token_readable() {
		let (refresher, _clock, coordinator) = fixture();
		let first = coordinator.ensure_valid().await.expect("Initial refresh should succeed.");
		let gate = refresher.gate.lock().await;
		let pending = {
			let coordinator = coordinator.clone();

			tokio::spawn(async move { coordinator.force_refresh().await })
		};

		while !coordinator.is_refreshing() || refresher.calls() < 2 {
			tokio::time::sleep(std::time::Duration::from_millis(1)).await;
		}

		let during = coordinator.ensure_valid().await.expect("Fast path should stay available.");

		assert!(Arc::ptr_eq(&first, &during));

		drop(gate);

		let refreshed = pending.await.expect("Task should not panic.").expect("Refresh should succeed.");

		assert_eq!(refreshed.access_token().expose(), "access-2");
	}
}
