//! Navigation/teardown port signalled when the session cannot be renewed.

// self
use crate::_prelude::*;

/// Receives the "session is gone" signal, e.g. to route the application to its sign-in screen.
///
/// Fired at most once per failed refresh cycle, regardless of how many requests were parked
/// on that cycle. Implementations must not block.
pub trait NavigationPort
where
	Self: Send + Sync,
{
	/// Called after the credential store has been cleared.
	fn on_unauthenticated(&self);
}
impl<F> NavigationPort for F
where
	F: Fn() + Send + Sync,
{
	fn on_unauthenticated(&self) {
		self()
	}
}

/// Port that ignores the signal; useful for headless callers.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNavigator;
impl NavigationPort for NoopNavigator {
	fn on_unauthenticated(&self) {}
}
