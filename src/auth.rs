//! Credential models: redacted secrets and the access/refresh pair.

pub mod credential;
pub mod secret;

pub use credential::*;
pub use secret::*;
