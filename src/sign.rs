//! Request signing: attaches the current access credential to outgoing requests.

// crates.io
use http::{HeaderValue, header::AUTHORIZATION};
// self
use crate::{
	_prelude::*,
	auth::{CredentialPair, TokenSecret},
	transport::ApiRequest,
};

/// Describes how to attach credentials to an outbound request.
///
/// Signing is pure: no I/O, no errors. A request without an available access token is
/// returned unchanged.
pub trait RequestSigner
where
	Self: Send + Sync,
{
	/// Attaches `token` to `request`.
	fn attach_token(&self, request: ApiRequest, token: &TokenSecret) -> ApiRequest;

	/// Attaches the access token of `pair`, if it carries one.
	fn sign(&self, request: ApiRequest, pair: &CredentialPair) -> ApiRequest {
		match pair.access_token.as_ref() {
			Some(token) => self.attach_token(request, token),
			None => request,
		}
	}
}

/// Sets `Authorization: Bearer <token>`, replacing any previous value.
#[derive(Clone, Copy, Debug, Default)]
pub struct BearerSigner;
impl RequestSigner for BearerSigner {
	fn attach_token(&self, mut request: ApiRequest, token: &TokenSecret) -> ApiRequest {
		match HeaderValue::from_str(&token.bearer()) {
			Ok(mut value) => {
				value.set_sensitive(true);
				request.headers.insert(AUTHORIZATION, value);
			},
			// A token with control characters cannot travel in a header; send unsigned and let
			// the server reject it.
			Err(_) => {
				request.headers.remove(AUTHORIZATION);
			},
		}

		request
	}
}
