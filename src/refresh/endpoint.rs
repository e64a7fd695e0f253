//! HTTP refresher that calls `POST /auth/refresh` over an [`ApiTransport`].

// crates.io
use http::Method;
// self
use crate::{
	_prelude::*,
	auth::{CredentialPair, TokenSecret},
	error::RefreshError,
	refresh::{RefreshFuture, TokenRefresher},
	transport::{ApiRequest, ApiResponse, ApiTransport},
};

const ERROR_PREVIEW_LIMIT: usize = 256;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequestBody<'a> {
	refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponseBody {
	token: String,
	#[serde(default)]
	refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
	#[serde(default)]
	message: Option<String>,
	#[serde(default)]
	error: Option<String>,
}

/// Calls the refresh endpoint with `{"refreshToken": ...}` and expects
/// `{"token": ..., "refreshToken": ...}` back.
pub struct HttpTokenRefresher<T>
where
	T: ?Sized + ApiTransport,
{
	transport: Arc<T>,
	url: Url,
	timeout: Option<Duration>,
}
impl<T> HttpTokenRefresher<T>
where
	T: ?Sized + ApiTransport,
{
	/// Creates a refresher targeting `url`.
	pub fn new(transport: impl Into<Arc<T>>, url: Url) -> Self {
		Self { transport: transport.into(), url, timeout: None }
	}

	/// Asks the transport to abandon the call after `timeout`.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	/// Refresh endpoint URL.
	pub fn url(&self) -> &Url {
		&self.url
	}

	fn build_request(&self, refresh_token: &TokenSecret) -> Result<ApiRequest, RefreshError> {
		let mut request = ApiRequest::new(Method::POST, self.url.clone())
			.skip_auth_refresh()
			.with_json(&RefreshRequestBody { refresh_token: refresh_token.expose() })
			.map_err(|e| RefreshError::InvalidRequest { message: render_chain(&e) })?;

		request.timeout = self.timeout;

		Ok(request)
	}
}
impl<T> TokenRefresher for HttpTokenRefresher<T>
where
	T: ?Sized + ApiTransport,
{
	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> RefreshFuture<'a> {
		Box::pin(async move {
			let request = self.build_request(refresh_token)?;
			let response = self
				.transport
				.send(request)
				.await
				.map_err(|e| RefreshError::Network { message: render_chain(&e) })?;

			parse_refresh_response(&response)
		})
	}
}
impl<T> Debug for HttpTokenRefresher<T>
where
	T: ?Sized + ApiTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HttpTokenRefresher")
			.field("url", &self.url.as_str())
			.field("timeout", &self.timeout)
			.finish()
	}
}

fn parse_refresh_response(response: &ApiResponse) -> Result<CredentialPair, RefreshError> {
	if !response.is_success() {
		return Err(RefreshError::Rejected {
			status: response.status.as_u16(),
			message: error_message(response),
		});
	}

	let mut de = serde_json::Deserializer::from_slice(&response.body);
	let body: RefreshResponseBody = serde_path_to_error::deserialize(&mut de)
		.map_err(|e| RefreshError::MalformedResponse { message: e.to_string() })?;

	if body.token.is_empty() {
		return Err(RefreshError::MalformedResponse { message: "token: must not be empty".into() });
	}

	Ok(CredentialPair {
		access_token: Some(TokenSecret::new(body.token)),
		refresh_token: body.refresh_token.filter(|value| !value.is_empty()).map(TokenSecret::new),
		issued_at: Some(OffsetDateTime::now_utc()),
	})
}

fn error_message(response: &ApiResponse) -> Option<String> {
	serde_json::from_slice::<ErrorBody>(&response.body)
		.ok()
		.and_then(|body| body.message.or(body.error))
		.or_else(|| response.body_preview(ERROR_PREVIEW_LIMIT))
}

fn render_chain(e: &dyn StdError) -> String {
	let mut rendered = e.to_string();
	let mut source = e.source();

	while let Some(inner) = source {
		rendered.push_str(": ");
		rendered.push_str(&inner.to_string());
		source = inner.source();
	}

	rendered
}

#[cfg(test)]
mod tests {
	// crates.io
	use http::StatusCode;
	// self
	use super::*;

	#[test]
	fn success_body_becomes_a_pair() {
		let response = ApiResponse::new(
			StatusCode::OK,
			"{\"token\":\"access-2\",\"refreshToken\":\"refresh-2\"}",
		);
		let pair = parse_refresh_response(&response).expect("Valid bodies should parse.");

		assert_eq!(pair.access_token.as_ref().map(TokenSecret::expose), Some("access-2"));
		assert_eq!(pair.refresh_token.as_ref().map(TokenSecret::expose), Some("refresh-2"));
		assert!(pair.issued_at.is_some());
	}

	#[test]
	fn omitted_refresh_token_is_left_empty() {
		let response = ApiResponse::new(StatusCode::OK, "{\"token\":\"access-2\"}");
		let pair = parse_refresh_response(&response).expect("Bodies without refreshToken parse.");

		assert!(pair.refresh_token.is_none());
	}

	#[test]
	fn error_status_carries_server_message() {
		let response =
			ApiResponse::new(StatusCode::UNAUTHORIZED, "{\"message\":\"invalid refresh token\"}");
		let err = parse_refresh_response(&response).expect_err("Error statuses should fail.");

		assert_eq!(
			err,
			RefreshError::Rejected {
				status: 401,
				message: Some("invalid refresh token".into())
			}
		);

		let plain = ApiResponse::new(StatusCode::BAD_GATEWAY, "upstream down");

		assert_eq!(
			parse_refresh_response(&plain).expect_err("Error statuses should fail."),
			RefreshError::Rejected { status: 502, message: Some("upstream down".into()) }
		);
	}

	#[test]
	fn malformed_body_names_the_path() {
		let response = ApiResponse::new(StatusCode::OK, "{\"token\":42}");

		match parse_refresh_response(&response) {
			Err(RefreshError::MalformedResponse { message }) => assert!(message.starts_with("token")),
			other => panic!("Unexpected parse outcome: {other:?}."),
		}
	}
}
