//! Access/refresh credential pair persisted by credential stores.

// self
use crate::{_prelude::*, auth::secret::TokenSecret};

/// Storage key holding the access token.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
/// Storage key holding the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Current access/refresh credentials; either half may be absent.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
	/// Short-lived bearer credential attached to outgoing requests.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub access_token: Option<TokenSecret>,
	/// Long-lived credential exchanged for a new pair.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<TokenSecret>,
	/// Instant the pair was written by a sign-in or a refresh.
	#[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
	pub issued_at: Option<OffsetDateTime>,
}
impl CredentialPair {
	/// Creates a pair issued now.
	pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
		Self {
			access_token: Some(TokenSecret::new(access_token)),
			refresh_token: Some(TokenSecret::new(refresh_token)),
			issued_at: Some(OffsetDateTime::now_utc()),
		}
	}

	/// Creates a pair that only carries an access token.
	pub fn access_only(access_token: impl Into<String>) -> Self {
		Self {
			access_token: Some(TokenSecret::new(access_token)),
			refresh_token: None,
			issued_at: Some(OffsetDateTime::now_utc()),
		}
	}

	/// Returns `true` when neither token is present.
	pub fn is_empty(&self) -> bool {
		self.access_token.is_none() && self.refresh_token.is_none()
	}

	/// Keeps `previous` as the refresh token when this pair does not carry one.
	pub fn or_refresh_token(mut self, previous: &TokenSecret) -> Self {
		if self.refresh_token.is_none() {
			self.refresh_token = Some(previous.clone());
		}

		self
	}
}
impl Debug for CredentialPair {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialPair")
			.field("access_token_set", &self.access_token.is_some())
			.field("refresh_token_set", &self.refresh_token.is_some())
			.field("issued_at", &self.issued_at)
			.finish()
	}
}
