//! Storage contracts and built-in credential store implementations.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{_prelude::*, auth::CredentialPair};

/// Boxed future returned by [`CredentialStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Persistence contract for the session's credential pair.
///
/// Only the refresh coordinator writes refresh-related fields, so implementations need no
/// concurrency semantics beyond last-write-wins.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Returns the stored pair, or an empty pair when nothing is stored.
	fn get(&self) -> StoreFuture<'_, CredentialPair>;

	/// Persists or replaces the stored pair.
	fn set(&self, pair: CredentialPair) -> StoreFuture<'_, ()>;

	/// Removes both tokens.
	fn clear(&self) -> StoreFuture<'_, ()>;
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn store_error_can_be_serialized() {
		let payload = serde_json::to_string(&StoreError::Backend { message: "locked".into() })
			.expect("StoreError should serialize to JSON.");

		assert_eq!(payload, "{\"Backend\":{\"message\":\"locked\"}}");

		let round_trip: StoreError =
			serde_json::from_str(&payload).expect("Serialized error should deserialize.");

		assert_eq!(round_trip, StoreError::Backend { message: "locked".into() });
	}
}
