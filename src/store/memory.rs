//! Thread-safe in-memory [`CredentialStore`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::CredentialPair,
	store::{CredentialStore, StoreFuture},
};

/// Thread-safe storage backend that keeps the pair in-process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<RwLock<CredentialPair>>);
impl MemoryStore {
	/// Creates a store seeded with `pair`.
	pub fn with_pair(pair: CredentialPair) -> Self {
		Self(Arc::new(RwLock::new(pair)))
	}

	/// Returns the stored pair without going through the async contract.
	pub fn snapshot(&self) -> CredentialPair {
		self.0.read().clone()
	}
}
impl CredentialStore for MemoryStore {
	fn get(&self) -> StoreFuture<'_, CredentialPair> {
		let pair = self.snapshot();

		Box::pin(async move { Ok(pair) })
	}

	fn set(&self, pair: CredentialPair) -> StoreFuture<'_, ()> {
		let slot = self.0.clone();

		Box::pin(async move {
			*slot.write() = pair;

			Ok(())
		})
	}

	fn clear(&self) -> StoreFuture<'_, ()> {
		let slot = self.0.clone();

		Box::pin(async move {
			*slot.write() = CredentialPair::default();

			Ok(())
		})
	}
}
