//! Client-level error types shared across the decorator, interceptor, coordinator, and stores.

// self
use crate::_prelude::*;

/// Client-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical client error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS) unrelated to authentication.
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Authentication failure on a request that opted out of the refresh flow.
	#[error("Request was rejected as unauthenticated with status {status}.")]
	AuthExpired {
		/// HTTP status code that signalled the failure.
		status: u16,
	},
	/// No refresh token is stored, so the session cannot be renewed.
	#[error("No session is available; sign-in is required.")]
	NoSession,
	/// The refresh cycle failed; every request parked on it observes the same cause.
	#[error("Token refresh failed.")]
	RefreshFailed(#[source] RefreshError),
	/// Request failed authentication again after its single replay.
	#[error("Request was rejected as unauthenticated with status {status} after a token refresh.")]
	RetryExhausted {
		/// HTTP status code returned by the replay.
		status: u16,
	},
	/// Endpoint answered with a non-success status the caller expected to be 2xx.
	#[error("Endpoint returned status {status}.")]
	Status {
		/// HTTP status code.
		status: u16,
		/// Short body preview, when one was returned.
		message: Option<String>,
	},
	/// Response body could not be decoded into the requested type.
	#[error("Response body could not be decoded.")]
	Decode(#[from] serde_path_to_error::Error<serde_json::Error>),
}
impl From<RefreshError> for Error {
	fn from(e: RefreshError) -> Self {
		match e {
			RefreshError::NoSession => Self::NoSession,
			e => Self::RefreshFailed(e),
		}
	}
}

/// Outcome of a failed refresh cycle, broadcast verbatim to the driver and every waiter.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RefreshError {
	/// No refresh token is stored; the refresh endpoint was not called.
	#[error("No refresh token is stored.")]
	NoSession,
	/// Refresh endpoint answered with a non-success status.
	#[error("Refresh endpoint rejected the refresh token with status {status}.")]
	Rejected {
		/// HTTP status code returned by the refresh endpoint.
		status: u16,
		/// Server-supplied reason, when the body carried one.
		message: Option<String>,
	},
	/// Refresh call did not settle within the configured timeout.
	#[error("Refresh call did not settle within {timeout:?}.")]
	TimedOut {
		/// Configured refresh timeout.
		timeout: Duration,
	},
	/// Refresh request could not be built.
	#[error("Refresh request could not be built: {message}.")]
	InvalidRequest {
		/// Rendered build failure.
		message: String,
	},
	/// Transport failed while calling the refresh endpoint.
	#[error("Network error occurred while calling the refresh endpoint: {message}.")]
	Network {
		/// Rendered transport failure.
		message: String,
	},
	/// Refresh endpoint answered 2xx with a body that is not a credential pair.
	#[error("Refresh endpoint returned a malformed body: {message}.")]
	MalformedResponse {
		/// Parse failure including the offending JSON path.
		message: String,
	},
	/// Credential store failed while reading or persisting the pair.
	#[error("{0}")]
	Storage(#[from] crate::store::StoreError),
}

/// Configuration and validation failures raised by the client.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Base URL cannot carry relative paths (e.g. `mailto:`).
	#[error("Base URL `{url}` cannot be used as a base for request paths.")]
	CannotBeBase {
		/// Offending URL.
		url: String,
	},
	/// Refresh path must be absolute.
	#[error("Refresh path `{path}` must start with `/`.")]
	RelativeRefreshPath {
		/// Offending path.
		path: String,
	},
	/// Refresh timeout must be positive.
	#[error("The refresh timeout must be positive.")]
	NonPositiveRefreshTimeout,
	/// No status code would ever trigger the refresh flow.
	#[error("At least one authentication failure status is required.")]
	NoAuthFailureStatuses,
	/// Authentication failure statuses must be client errors.
	#[error("Status {status} is not a 4xx client error.")]
	InvalidAuthFailureStatus {
		/// Offending status code.
		status: u16,
	},
	/// Configuration document could not be parsed.
	#[error("Configuration document is invalid.")]
	Parse(#[from] serde_path_to_error::Error<serde_json::Error>),
	/// Request body could not be serialized.
	#[error("Request body could not be serialized.")]
	Body(#[source] serde_json::Error),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the API.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Request did not complete within its timeout.
	#[error("Request did not complete within {0:?}.")]
	Timeout(Duration),
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the API.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::StoreError;

	#[test]
	fn missing_session_maps_to_its_own_variant() {
		assert!(matches!(Error::from(RefreshError::NoSession), Error::NoSession));

		let rejected = RefreshError::Rejected { status: 401, message: None };

		match Error::from(rejected.clone()) {
			Error::RefreshFailed(inner) => assert_eq!(inner, rejected),
			other => panic!("Unexpected error variant: {other:?}."),
		}
	}

	#[test]
	fn refresh_failure_exposes_cause_as_source() {
		let err = Error::from(RefreshError::TimedOut { timeout: Duration::from_millis(250) });
		let source =
			StdError::source(&err).expect("Refresh failures should expose the cycle cause.");

		assert_eq!(source.to_string(), "Refresh call did not settle within 250ms.");
	}

	#[test]
	fn store_error_converts_into_client_error_with_source() {
		let store_error = StoreError::Backend { message: "disk full".into() };
		let err: Error = store_error.clone().into();

		assert!(matches!(err, Error::Storage(_)));
		assert!(err.to_string().contains("disk full"));

		let source = StdError::source(&err)
			.expect("Client error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}
}
