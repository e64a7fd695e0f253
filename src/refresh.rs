//! Single-flight token refresh with outcome broadcast.
//!
//! [`RefreshCoordinator::acquire_token`] is the only way a new access token enters the
//! system. The first caller that finds the coordinator idle becomes the cycle's driver: it
//! reads the refresh token, calls the [`TokenRefresher`], persists the rotated pair, and
//! settles the cycle. Callers arriving while a cycle is in flight park as waiters and receive
//! the driver's outcome verbatim, so every participant of one cycle observes the same token or
//! the same [`RefreshError`]. Failed cycles clear the credential store and fire the
//! [`NavigationPort`] exactly once.

pub mod endpoint;

mod metrics;

pub use endpoint::HttpTokenRefresher;
pub use metrics::RefreshMetrics;

// std
use std::mem;
// crates.io
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	auth::{CredentialPair, TokenSecret},
	config::ClientConfig,
	error::RefreshError,
	navigation::NavigationPort,
	obs::{self, FlowKind, FlowOutcome, FlowSpan, flow_event},
	store::CredentialStore,
};

/// Boxed future returned by [`TokenRefresher::refresh`].
pub type RefreshFuture<'a> =
	Pin<Box<dyn Future<Output = Result<CredentialPair, RefreshError>> + 'a + Send>>;

type CycleOutcome = Result<TokenSecret, RefreshError>;

/// Exchanges a refresh token for a new credential pair.
///
/// A returned pair without a refresh token keeps the previous one.
pub trait TokenRefresher
where
	Self: Send + Sync,
{
	/// Performs one refresh call.
	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> RefreshFuture<'a>;
}

/// Observable coordinator state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshState {
	/// No refresh call is outstanding; the next caller starts a new cycle.
	Idle,
	/// A driver owns the current cycle; new callers park as waiters.
	Refreshing,
}

/// Parked caller of an in-flight cycle.
struct Waiter(oneshot::Sender<CycleOutcome>);

enum CycleState {
	Idle,
	Refreshing { waiters: Vec<Waiter> },
}

enum Role {
	Driver,
	Waiter(oneshot::Receiver<CycleOutcome>),
}

/// Owns the refresh state and the waiter queue for one credential store.
pub struct RefreshCoordinator {
	store: Arc<dyn CredentialStore>,
	refresher: Arc<dyn TokenRefresher>,
	navigator: Arc<dyn NavigationPort>,
	refresh_timeout: Duration,
	metrics: Arc<RefreshMetrics>,
	// Never held across an `.await`.
	state: Mutex<CycleState>,
}
impl RefreshCoordinator {
	/// Creates an idle coordinator.
	pub fn new(
		store: Arc<dyn CredentialStore>,
		refresher: Arc<dyn TokenRefresher>,
		navigator: Arc<dyn NavigationPort>,
	) -> Self {
		Self {
			store,
			refresher,
			navigator,
			refresh_timeout: ClientConfig::DEFAULT_REFRESH_TIMEOUT,
			metrics: Default::default(),
			state: Mutex::new(CycleState::Idle),
		}
	}

	/// Overrides the bound for one refresh call.
	pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
		self.refresh_timeout = timeout;

		self
	}

	/// Returns a snapshot of the current state.
	pub fn state(&self) -> RefreshState {
		match &*self.state.lock() {
			CycleState::Idle => RefreshState::Idle,
			CycleState::Refreshing { .. } => RefreshState::Refreshing,
		}
	}

	/// Number of callers currently parked on the in-flight cycle.
	pub fn waiting(&self) -> usize {
		match &*self.state.lock() {
			CycleState::Idle => 0,
			CycleState::Refreshing { waiters } => waiters.len(),
		}
	}

	/// Shared counters for refresh cycles.
	pub fn metrics(&self) -> &Arc<RefreshMetrics> {
		&self.metrics
	}

	/// Credential store the coordinator reads from and writes to.
	pub fn store(&self) -> &Arc<dyn CredentialStore> {
		&self.store
	}

	/// Resolves with a fresh access token, starting a refresh cycle or joining the one in
	/// flight.
	///
	/// A waiter whose driver is dropped before settling re-enters the coordinator, so it either
	/// drives the next cycle or joins whichever caller does.
	///
	/// Fails with [`Error::NoSession`] when no refresh token is stored and with
	/// [`Error::RefreshFailed`] for every other failed cycle.
	pub async fn acquire_token(&self) -> Result<TokenSecret> {
		loop {
			match self.enter() {
				Role::Driver => return self.drive().await,
				Role::Waiter(receiver) => {
					flow_event!(debug, "Joining in-flight token refresh.");

					match receiver.await {
						Ok(outcome) => return outcome.map_err(Error::from),
						// The driver was dropped unsettled and the state is idle again.
						Err(_) => {
							flow_event!(debug, "Token refresh driver went away; re-entering.");
						},
					}
				},
			}
		}
	}

	/// Checks and transitions the state in one critical section.
	fn enter(&self) -> Role {
		let mut state = self.state.lock();

		if let CycleState::Refreshing { waiters } = &mut *state {
			let (sender, receiver) = oneshot::channel();

			waiters.push(Waiter(sender));
			self.metrics.record_waiter();

			return Role::Waiter(receiver);
		}

		*state = CycleState::Refreshing { waiters: Vec::new() };
		self.metrics.record_cycle();

		Role::Driver
	}

	/// Returns the state to idle and hands back every waiter of the finished cycle.
	fn release(&self) -> Vec<Waiter> {
		match mem::replace(&mut *self.state.lock(), CycleState::Idle) {
			CycleState::Refreshing { waiters } => waiters,
			CycleState::Idle => Vec::new(),
		}
	}

	async fn drive(&self) -> Result<TokenSecret> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "acquire_token");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let cycle = Cycle { coordinator: self, settled: false };
		let outcome = span.instrument(self.run_cycle()).await;
		let outcome = cycle.settle(outcome);

		match &outcome {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		outcome.map_err(Error::from)
	}

	/// Runs the refresh and, on failure, clears the store while still refreshing so no new
	/// cycle can observe a half-torn-down session.
	#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
	async fn run_cycle(&self) -> CycleOutcome {
		flow_event!(debug, "Starting token refresh cycle.");

		let outcome = self.rotate().await;

		if let Err(e) = &outcome {
			flow_event!(warn, error = %e, "Token refresh failed; clearing session.");

			if let Err(clear_err) = self.store.clear().await {
				flow_event!(warn, error = %clear_err, "Failed to clear the credential store.");
			}
		}

		outcome
	}

	async fn rotate(&self) -> CycleOutcome {
		let current = self.store.get().await?;
		let Some(refresh_token) = current.refresh_token else {
			return Err(RefreshError::NoSession);
		};
		let rotated =
			tokio::time::timeout(self.refresh_timeout, self.refresher.refresh(&refresh_token))
				.await
				.map_err(|_| RefreshError::TimedOut { timeout: self.refresh_timeout })??;
		let pair = rotated.or_refresh_token(&refresh_token);
		let access_token = pair.access_token.clone().ok_or_else(|| RefreshError::MalformedResponse {
			message: "Refresh response carried no access token".into(),
		})?;

		self.store.set(pair).await?;

		flow_event!(debug, "Token refresh succeeded.");

		Ok(access_token)
	}
}
impl Debug for RefreshCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshCoordinator")
			.field("state", &self.state())
			.field("refresh_timeout", &self.refresh_timeout)
			.field("metrics", &self.metrics)
			.finish()
	}
}

/// Drop guard owned by the driver of one cycle.
///
/// If the driver's future is dropped mid-flight the guard returns the coordinator to idle and
/// drops every waiter's sender. The waiters then re-enter [`RefreshCoordinator::acquire_token`].
struct Cycle<'a> {
	coordinator: &'a RefreshCoordinator,
	settled: bool,
}
impl Cycle<'_> {
	fn settle(mut self, outcome: CycleOutcome) -> CycleOutcome {
		self.settled = true;

		let coordinator = self.coordinator;
		let waiters = coordinator.release();

		match &outcome {
			Ok(_) => coordinator.metrics.record_success(),
			Err(_) => {
				coordinator.metrics.record_failure();
				coordinator.metrics.record_teardown();
				coordinator.navigator.on_unauthenticated();
			},
		}

		flow_event!(debug, waiters = waiters.len(), "Releasing token refresh waiters.");

		for Waiter(sender) in waiters {
			// The receiver is gone only when that caller was cancelled.
			let _ = sender.send(outcome.clone());
		}

		outcome
	}
}
impl Drop for Cycle<'_> {
	fn drop(&mut self) {
		if self.settled {
			return;
		}

		flow_event!(warn, "Token refresh driver dropped before the cycle settled.");

		// Idle before the senders drop, so re-entering waiters start a new cycle.
		drop(self.coordinator.release());
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// crates.io
	use tokio::sync::Notify;
	// self
	use super::*;
	use crate::store::{MemoryStore, StoreFuture};

	#[derive(Default)]
	struct CountingNavigator(AtomicUsize);
	impl NavigationPort for CountingNavigator {
		fn on_unauthenticated(&self) {
			self.0.fetch_add(1, Ordering::SeqCst);
		}
	}

	/// Refresher that blocks until released and then answers with a fixed outcome.
	struct GatedRefresher {
		calls: AtomicUsize,
		gate: Notify,
		outcome: Result<CredentialPair, RefreshError>,
	}
	impl GatedRefresher {
		fn new(outcome: Result<CredentialPair, RefreshError>) -> Self {
			Self { calls: AtomicUsize::new(0), gate: Notify::new(), outcome }
		}
	}
	impl TokenRefresher for GatedRefresher {
		fn refresh<'a>(&'a self, _refresh_token: &'a TokenSecret) -> RefreshFuture<'a> {
			Box::pin(async move {
				self.calls.fetch_add(1, Ordering::SeqCst);
				self.gate.notified().await;

				self.outcome.clone()
			})
		}
	}

	fn coordinator(
		pair: CredentialPair,
		refresher: Arc<GatedRefresher>,
	) -> (Arc<RefreshCoordinator>, MemoryStore, Arc<CountingNavigator>) {
		let store = MemoryStore::with_pair(pair);
		let navigator = Arc::new(CountingNavigator::default());
		let coordinator = Arc::new(RefreshCoordinator::new(
			Arc::new(store.clone()),
			refresher,
			navigator.clone(),
		));

		(coordinator, store, navigator)
	}

	async fn wait_for_waiters(coordinator: &RefreshCoordinator, count: usize) {
		while coordinator.waiting() < count {
			tokio::task::yield_now().await;
		}
	}

	#[tokio::test]
	async fn concurrent_callers_share_one_refresh() {
		let refresher =
			Arc::new(GatedRefresher::new(Ok(CredentialPair::new("access-2", "refresh-2"))));
		let (coordinator, store, navigator) =
			coordinator(CredentialPair::new("access-1", "refresh-1"), refresher.clone());
		let handles = (0..4)
			.map(|_| {
				let coordinator = coordinator.clone();

				tokio::spawn(async move { coordinator.acquire_token().await })
			})
			.collect::<Vec<_>>();

		wait_for_waiters(&coordinator, 3).await;
		assert_eq!(coordinator.state(), RefreshState::Refreshing);
		refresher.gate.notify_one();

		for handle in handles {
			let token = handle
				.await
				.expect("Refresh task should not panic.")
				.expect("Every participant should receive the new token.");

			assert_eq!(token.expose(), "access-2");
		}

		assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
		assert_eq!(coordinator.state(), RefreshState::Idle);
		assert_eq!(navigator.0.load(Ordering::SeqCst), 0);
		assert_eq!(
			store.snapshot().refresh_token.as_ref().map(TokenSecret::expose),
			Some("refresh-2")
		);
		assert_eq!(coordinator.metrics().cycles(), 1);
		assert_eq!(coordinator.metrics().waiters(), 3);
	}

	#[tokio::test]
	async fn failed_cycle_rejects_everyone_and_tears_down_once() {
		let rejected = RefreshError::Rejected { status: 401, message: Some("expired".into()) };
		let refresher = Arc::new(GatedRefresher::new(Err(rejected.clone())));
		let (coordinator, store, navigator) =
			coordinator(CredentialPair::new("access-1", "refresh-1"), refresher.clone());
		let handles = (0..3)
			.map(|_| {
				let coordinator = coordinator.clone();

				tokio::spawn(async move { coordinator.acquire_token().await })
			})
			.collect::<Vec<_>>();

		wait_for_waiters(&coordinator, 2).await;
		refresher.gate.notify_one();

		for handle in handles {
			match handle.await.expect("Refresh task should not panic.") {
				Err(Error::RefreshFailed(cause)) => assert_eq!(cause, rejected),
				other => panic!("Unexpected refresh outcome: {other:?}."),
			}
		}

		assert_eq!(navigator.0.load(Ordering::SeqCst), 1);
		assert!(store.snapshot().is_empty());
		assert_eq!(coordinator.metrics().teardowns(), 1);
	}

	#[tokio::test]
	async fn missing_refresh_token_skips_the_call() {
		let refresher =
			Arc::new(GatedRefresher::new(Ok(CredentialPair::new("unused", "unused"))));
		let (coordinator, store, navigator) =
			coordinator(CredentialPair::access_only("access-1"), refresher.clone());
		let err = coordinator.acquire_token().await.expect_err("No session should be available.");

		assert!(matches!(err, Error::NoSession));
		assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
		assert_eq!(navigator.0.load(Ordering::SeqCst), 1);
		assert!(store.snapshot().is_empty());
		assert_eq!(coordinator.state(), RefreshState::Idle);
	}

	#[tokio::test]
	async fn hung_refresh_times_out() {
		let refresher = Arc::new(GatedRefresher::new(Ok(CredentialPair::new("late", "late"))));
		let store = MemoryStore::with_pair(CredentialPair::new("access-1", "refresh-1"));
		let navigator = Arc::new(CountingNavigator::default());
		let coordinator =
			RefreshCoordinator::new(Arc::new(store.clone()), refresher, navigator.clone())
				.with_refresh_timeout(Duration::from_millis(20));
		let err = coordinator.acquire_token().await.expect_err("Hung refreshes should time out.");

		match err {
			Error::RefreshFailed(RefreshError::TimedOut { timeout }) =>
				assert_eq!(timeout, Duration::from_millis(20)),
			other => panic!("Unexpected error variant: {other:?}."),
		}

		assert_eq!(navigator.0.load(Ordering::SeqCst), 1);
		assert_eq!(coordinator.state(), RefreshState::Idle);
	}

	#[tokio::test]
	async fn waiter_takes_over_when_the_driver_is_dropped() {
		let refresher =
			Arc::new(GatedRefresher::new(Ok(CredentialPair::new("access-2", "refresh-2"))));
		let (coordinator, store, navigator) =
			coordinator(CredentialPair::new("access-1", "refresh-1"), refresher.clone());
		let driver = {
			let coordinator = coordinator.clone();

			tokio::spawn(async move { coordinator.acquire_token().await })
		};

		while refresher.calls.load(Ordering::SeqCst) == 0 {
			tokio::task::yield_now().await;
		}

		let waiter = {
			let coordinator = coordinator.clone();

			tokio::spawn(async move { coordinator.acquire_token().await })
		};

		wait_for_waiters(&coordinator, 1).await;
		driver.abort();

		while refresher.calls.load(Ordering::SeqCst) < 2 {
			tokio::task::yield_now().await;
		}

		refresher.gate.notify_one();

		let token = waiter
			.await
			.expect("Waiter task should not panic.")
			.expect("The surviving caller should drive the next cycle to success.");

		assert_eq!(token.expose(), "access-2");
		assert_eq!(coordinator.state(), RefreshState::Idle);
		assert_eq!(coordinator.metrics().cycles(), 2);
		assert_eq!(navigator.0.load(Ordering::SeqCst), 0);
		assert_eq!(
			store.snapshot().access_token.as_ref().map(TokenSecret::expose),
			Some("access-2")
		);
	}

	#[tokio::test]
	async fn missing_refresh_token_is_broadcast_to_every_waiter() {
		/// Store whose reads block until released.
		struct GatedStore {
			inner: MemoryStore,
			gate: Notify,
		}
		impl CredentialStore for GatedStore {
			fn get(&self) -> StoreFuture<'_, CredentialPair> {
				Box::pin(async move {
					self.gate.notified().await;

					self.inner.get().await
				})
			}

			fn set(&self, pair: CredentialPair) -> StoreFuture<'_, ()> {
				self.inner.set(pair)
			}

			fn clear(&self) -> StoreFuture<'_, ()> {
				self.inner.clear()
			}
		}

		let inner = MemoryStore::with_pair(CredentialPair::access_only("access-1"));
		let store = Arc::new(GatedStore { inner: inner.clone(), gate: Notify::new() });
		let refresher =
			Arc::new(GatedRefresher::new(Ok(CredentialPair::new("unused", "unused"))));
		let navigator = Arc::new(CountingNavigator::default());
		let coordinator = Arc::new(RefreshCoordinator::new(
			store.clone(),
			refresher.clone(),
			navigator.clone(),
		));
		let handles = (0..4)
			.map(|_| {
				let coordinator = coordinator.clone();

				tokio::spawn(async move { coordinator.acquire_token().await })
			})
			.collect::<Vec<_>>();

		wait_for_waiters(&coordinator, 3).await;
		store.gate.notify_one();

		for handle in handles {
			let outcome = handle.await.expect("Refresh task should not panic.");

			assert!(matches!(outcome, Err(Error::NoSession)), "Unexpected outcome: {outcome:?}.");
		}

		assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
		assert_eq!(navigator.0.load(Ordering::SeqCst), 1);
		assert_eq!(coordinator.metrics().cycles(), 1);
		assert!(inner.snapshot().is_empty());
	}

	#[tokio::test]
	async fn coordinator_is_reusable_after_a_cycle() {
		let refresher =
			Arc::new(GatedRefresher::new(Ok(CredentialPair::access_only("access-2"))));
		let (coordinator, store, _navigator) =
			coordinator(CredentialPair::new("access-1", "refresh-1"), refresher.clone());

		for _ in 0..2 {
			let pending = {
				let coordinator = coordinator.clone();

				tokio::spawn(async move { coordinator.acquire_token().await })
			};

			while coordinator.state() == RefreshState::Idle && !pending.is_finished() {
				tokio::task::yield_now().await;
			}

			refresher.gate.notify_one();
			pending
				.await
				.expect("Refresh task should not panic.")
				.expect("Each cycle should succeed.");
		}

		assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
		assert_eq!(coordinator.metrics().cycles(), 2);
		assert_eq!(
			store.snapshot().refresh_token.as_ref().map(TokenSecret::expose),
			Some("refresh-1")
		);
	}
}
