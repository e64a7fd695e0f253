//! Transport primitives for authenticated API calls.
//!
//! The module exposes [`ApiTransport`] together with the transport-neutral [`ApiRequest`] and
//! [`ApiResponse`] values so downstream crates can plug in custom HTTP stacks while keeping
//! the decorator, interceptor, and refresh coordinator unchanged. A response with any status
//! (including 401) is a successful transport outcome; only failures that never produced a
//! response surface as [`TransportError`].

// std
#[cfg(feature = "reqwest")] use std::ops::Deref;
// crates.io
use http::{HeaderMap, HeaderValue, Method, StatusCode, header::CONTENT_TYPE};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransportError},
};

/// Boxed future returned by [`ApiTransport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP stacks able to execute [`ApiRequest`] values.
///
/// Implementations must be `Send + Sync + 'static` so a single transport can be shared by the
/// client and the refresh endpoint caller behind an `Arc`.
pub trait ApiTransport
where
	Self: 'static + Send + Sync,
{
	/// Sends the request and resolves with whatever response the server produced.
	fn send(&self, request: ApiRequest) -> TransportFuture<'_>;
}
impl<T> ApiTransport for Arc<T>
where
	T: ?Sized + ApiTransport,
{
	fn send(&self, request: ApiRequest) -> TransportFuture<'_> {
		(**self).send(request)
	}
}

/// Outgoing API request.
#[derive(Clone, Debug)]
pub struct ApiRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute request URL.
	pub url: Url,
	/// Request headers, including `Authorization` once signed.
	pub headers: HeaderMap,
	/// Raw request body.
	pub body: Option<Vec<u8>>,
	/// Per-request timeout enforced by the transport, if any.
	pub timeout: Option<Duration>,
	/// Authentication failures on this request are returned as-is instead of triggering a
	/// token refresh. Used for sign-in and for the refresh call itself.
	pub skip_auth_refresh: bool,
}
impl ApiRequest {
	/// Creates a request without headers or body.
	pub fn new(method: Method, url: Url) -> Self {
		Self {
			method,
			url,
			headers: HeaderMap::new(),
			body: None,
			timeout: None,
			skip_auth_refresh: false,
		}
	}

	/// Adds or replaces a header.
	pub fn with_header(mut self, name: http::header::HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);

		self
	}

	/// Serializes `body` as JSON and sets the matching content type.
	pub fn with_json<T>(mut self, body: &T) -> Result<Self, ConfigError>
	where
		T: ?Sized + Serialize,
	{
		let bytes = serde_json::to_vec(body).map_err(ConfigError::Body)?;

		self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
		self.body = Some(bytes);

		Ok(self)
	}

	/// Sets the per-request timeout.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	/// Opts the request out of the refresh flow.
	pub fn skip_auth_refresh(mut self) -> Self {
		self.skip_auth_refresh = true;

		self
	}
}

/// Response produced by an [`ApiTransport`].
#[derive(Clone, Debug)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Raw response body.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// Creates a response without headers.
	pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
		Self { status, headers: HeaderMap::new(), body: body.into() }
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		self.status.is_success()
	}

	/// Decodes the body as JSON, reporting the failing path on mismatch.
	pub fn json<T>(&self) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let mut de = serde_json::Deserializer::from_slice(&self.body);

		Ok(serde_path_to_error::deserialize(&mut de)?)
	}

	/// Returns up to `limit` characters of the body for diagnostics.
	pub fn body_preview(&self, limit: usize) -> Option<String> {
		let text = String::from_utf8_lossy(&self.body);
		let trimmed = text.trim();

		if trimmed.is_empty() {
			return None;
		}

		Some(trimmed.chars().take(limit).collect())
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestTransport {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl ApiTransport for ReqwestTransport {
	fn send(&self, request: ApiRequest) -> TransportFuture<'_> {
		let client = self.0.clone();

		Box::pin(async move {
			let timeout = request.timeout;
			let mut builder = client.request(request.method, request.url).headers(request.headers);

			if let Some(body) = request.body {
				builder = builder.body(body);
			}
			if let Some(timeout) = timeout {
				builder = builder.timeout(timeout);
			}

			let response = builder.send().await.map_err(|e| map_reqwest_error(e, timeout))?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let body = response.bytes().await.map_err(|e| map_reqwest_error(e, timeout))?;

			Ok(ApiResponse { status, headers, body: body.to_vec() })
		})
	}
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(e: ReqwestError, timeout: Option<Duration>) -> TransportError {
	match timeout {
		Some(after) if e.is_timeout() => TransportError::Timeout(after),
		_ => TransportError::from(e),
	}
}
