// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for refresh cycles.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
	cycles: AtomicU64,
	waiters: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
	teardowns: AtomicU64,
}
impl RefreshMetrics {
	/// Returns the number of cycles started (one refresh call at most per cycle).
	pub fn cycles(&self) -> u64 {
		self.cycles.load(Ordering::Relaxed)
	}

	/// Returns the number of callers that joined an in-flight cycle instead of starting one.
	pub fn waiters(&self) -> u64 {
		self.waiters.load(Ordering::Relaxed)
	}

	/// Returns the number of cycles that produced a new access token.
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Returns the number of failed cycles.
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	/// Returns how many times the navigation port was signalled.
	pub fn teardowns(&self) -> u64 {
		self.teardowns.load(Ordering::Relaxed)
	}

	pub(crate) fn record_cycle(&self) {
		self.cycles.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_waiter(&self) {
		self.waiters.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_teardown(&self) {
		self.teardowns.fetch_add(1, Ordering::Relaxed);
	}
}
