//! Client configuration: API base URL, refresh endpoint, timeouts, and the statuses treated as
//! authentication failures.

// self
use crate::{_prelude::*, error::ConfigError};

/// Validated client configuration.
///
/// Build it with [`ClientConfig::builder`] or load it from JSON with
/// [`ClientConfig::from_json`]. Timeouts are expressed in milliseconds in JSON documents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
	/// Base URL every request path is resolved against.
	pub base_url: Url,
	/// Path of the refresh endpoint relative to the base URL.
	#[serde(default = "default_refresh_path")]
	pub refresh_path: String,
	/// Upper bound for one refresh call; every waiter fails when it elapses.
	#[serde(default = "default_refresh_timeout", with = "millis")]
	pub refresh_timeout: Duration,
	/// Per-request timeout applied to ordinary API calls, if any.
	#[serde(default, with = "millis::option")]
	pub request_timeout: Option<Duration>,
	/// Status codes that mean "the access token was rejected".
	#[serde(default = "default_auth_failure_statuses")]
	pub auth_failure_statuses: Vec<u16>,
}
impl ClientConfig {
	/// Default refresh endpoint path.
	pub const DEFAULT_REFRESH_PATH: &'static str = "/auth/refresh";
	/// Default refresh timeout.
	pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

	/// Creates a builder for the provided base URL.
	pub fn builder(base_url: Url) -> ClientConfigBuilder {
		ClientConfigBuilder::new(base_url)
	}

	/// Parses and validates a JSON configuration document.
	pub fn from_json(document: &str) -> Result<Self, ConfigError> {
		let mut de = serde_json::Deserializer::from_str(document);
		let config: Self = serde_path_to_error::deserialize(&mut de)?;

		config.validate()?;

		Ok(config)
	}

	/// Resolves `path` against the base URL, keeping any base path prefix.
	///
	/// Characters that cannot appear in a path are percent-encoded, so resolution never fails
	/// for a validated base URL.
	pub fn endpoint(&self, path: &str) -> Url {
		let mut url = self.base_url.clone();
		let joined = format!(
			"{}/{}",
			self.base_url.path().trim_end_matches('/'),
			path.trim_start_matches('/')
		);

		if let Some((path, query)) = joined.split_once('?') {
			url.set_path(path);
			url.set_query(Some(query));
		} else {
			url.set_path(&joined);
		}

		url
	}

	/// Absolute URL of the refresh endpoint.
	pub fn refresh_url(&self) -> Url {
		self.endpoint(&self.refresh_path)
	}

	/// Validates invariants for the configuration.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.base_url.cannot_be_a_base() {
			return Err(ConfigError::CannotBeBase { url: self.base_url.to_string() });
		}
		if !self.refresh_path.starts_with('/') {
			return Err(ConfigError::RelativeRefreshPath { path: self.refresh_path.clone() });
		}
		if self.refresh_timeout.is_zero() {
			return Err(ConfigError::NonPositiveRefreshTimeout);
		}
		if self.auth_failure_statuses.is_empty() {
			return Err(ConfigError::NoAuthFailureStatuses);
		}
		if let Some(&status) =
			self.auth_failure_statuses.iter().find(|status| !(400..500).contains(*status))
		{
			return Err(ConfigError::InvalidAuthFailureStatus { status });
		}

		Ok(())
	}
}

/// Builder for [`ClientConfig`] values.
#[derive(Debug)]
pub struct ClientConfigBuilder {
	/// Base URL every request path is resolved against.
	pub base_url: Url,
	/// Path of the refresh endpoint.
	pub refresh_path: String,
	/// Upper bound for one refresh call.
	pub refresh_timeout: Duration,
	/// Per-request timeout for ordinary API calls.
	pub request_timeout: Option<Duration>,
	/// Status codes treated as authentication failures.
	pub auth_failure_statuses: Vec<u16>,
}
impl ClientConfigBuilder {
	/// Creates a builder seeded with defaults.
	pub fn new(base_url: Url) -> Self {
		Self {
			base_url,
			refresh_path: default_refresh_path(),
			refresh_timeout: default_refresh_timeout(),
			request_timeout: None,
			auth_failure_statuses: default_auth_failure_statuses(),
		}
	}

	/// Overrides the refresh endpoint path.
	pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
		self.refresh_path = path.into();

		self
	}

	/// Overrides the refresh timeout.
	pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
		self.refresh_timeout = timeout;

		self
	}

	/// Sets the timeout applied to ordinary API calls.
	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = Some(timeout);

		self
	}

	/// Replaces the set of statuses treated as authentication failures.
	pub fn auth_failure_statuses<I>(mut self, statuses: I) -> Self
	where
		I: IntoIterator<Item = u16>,
	{
		self.auth_failure_statuses = statuses.into_iter().collect();

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<ClientConfig, ConfigError> {
		let config = ClientConfig {
			base_url: self.base_url,
			refresh_path: self.refresh_path,
			refresh_timeout: self.refresh_timeout,
			request_timeout: self.request_timeout,
			auth_failure_statuses: self.auth_failure_statuses,
		};

		config.validate()?;

		Ok(config)
	}
}

fn default_refresh_path() -> String {
	ClientConfig::DEFAULT_REFRESH_PATH.into()
}

fn default_refresh_timeout() -> Duration {
	ClientConfig::DEFAULT_REFRESH_TIMEOUT
}

fn default_auth_failure_statuses() -> Vec<u16> {
	vec![401]
}

mod millis {
	// self
	use crate::_prelude::*;

	pub(super) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
	}

	pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		u64::deserialize(deserializer).map(Duration::from_millis)
	}

	pub(super) mod option {
		// self
		use crate::_prelude::*;

		pub(crate) fn serialize<S>(
			value: &Option<Duration>,
			serializer: S,
		) -> Result<S::Ok, S::Error>
		where
			S: serde::Serializer,
		{
			match value {
				Some(value) => super::serialize(value, serializer),
				None => serializer.serialize_none(),
			}
		}

		pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
		where
			D: serde::Deserializer<'de>,
		{
			Option::<u64>::deserialize(deserializer).map(|value| value.map(Duration::from_millis))
		}
	}
}
