//! Keeper configuration: client credentials, endpoints, and timing policy.

// self
use crate::{_prelude::*, error::ConfigError, store::KeyNamespace};

/// Default EVE Online SSO token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://login.eveonline.com/v2/oauth/token";

/// Timing rules applied by the token manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
	/// Window before expiry during which a token is treated as stale.
	pub staleness_margin: Duration,
	/// Upper bound for one refresh exchange.
	pub exchange_timeout: Duration,
	/// Upper bound for one secret store call.
	pub store_timeout: Duration,
}
impl RefreshPolicy {
	/// Two minutes, matching the window the SSO tokens are usually refreshed in.
	pub const DEFAULT_STALENESS_MARGIN: Duration = Duration::minutes(2);
	/// Default bound for token endpoint calls.
	pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::seconds(30);
	/// Default bound for store calls.
	pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::seconds(10);

	/// Overrides the staleness margin; negative values clamp to zero.
	pub fn with_staleness_margin(mut self, margin: Duration) -> Self {
		self.staleness_margin = if margin.is_negative() { Duration::ZERO } else { margin };

		self
	}

	/// Overrides the exchange timeout.
	pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
		self.exchange_timeout = timeout;

		self
	}

	/// Overrides the store timeout.
	pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
		self.store_timeout = timeout;

		self
	}

	/// Checks that every bound is usable.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.staleness_margin.is_negative() {
			return Err(ConfigError::OutOfRange {
				field: "staleness_margin",
				reason: "must not be negative",
			});
		}

		ensure_positive("exchange_timeout", self.exchange_timeout)?;
		ensure_positive("store_timeout", self.store_timeout)
	}
}
impl Default for RefreshPolicy {
	fn default() -> Self {
		Self {
			staleness_margin: Self::DEFAULT_STALENESS_MARGIN,
			exchange_timeout: Self::DEFAULT_EXCHANGE_TIMEOUT,
			store_timeout: Self::DEFAULT_STORE_TIMEOUT,
		}
	}
}

/// Full configuration consumed by the keeper and its sweep scheduler.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
	/// OAuth 2.0 client identifier.
	pub client_id: String,
	/// OAuth 2.0 client secret.
	pub client_secret: String,
	/// Token endpoint used for refresh exchanges.
	#[serde(default = "default_token_url")]
	pub token_url: Url,
	/// Manager timing rules.
	#[serde(flatten)]
	pub policy: RefreshPolicy,
	/// Period between proactive sweeps.
	#[serde(default = "default_sweep_interval")]
	pub sweep_interval: Duration,
	/// Maximum number of subjects refreshed concurrently during one sweep.
	#[serde(default = "default_sweep_concurrency")]
	pub sweep_concurrency: usize,
	/// Prefix of store keys owned by this keeper.
	#[serde(default = "default_key_prefix")]
	pub key_prefix: String,
}
impl KeeperConfig {
	/// Eighteen minutes, comfortably shorter than the twenty-minute SSO token lifetime.
	pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::minutes(18);
	/// Default sweep fan-out.
	pub const DEFAULT_SWEEP_CONCURRENCY: usize = 8;

	/// Creates a configuration with defaults for everything but the client credentials.
	pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
		Self {
			client_id: client_id.into(),
			client_secret: client_secret.into(),
			token_url: default_token_url(),
			policy: RefreshPolicy::default(),
			sweep_interval: Self::DEFAULT_SWEEP_INTERVAL,
			sweep_concurrency: Self::DEFAULT_SWEEP_CONCURRENCY,
			key_prefix: KeyNamespace::DEFAULT_PREFIX.into(),
		}
	}

	/// Overrides the token endpoint.
	pub fn with_token_url(mut self, url: Url) -> Self {
		self.token_url = url;

		self
	}

	/// Overrides the refresh policy.
	pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
		self.policy = policy;

		self
	}

	/// Overrides the sweep interval.
	pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
		self.sweep_interval = interval;

		self
	}

	/// Overrides the sweep fan-out.
	pub fn with_sweep_concurrency(mut self, concurrency: usize) -> Self {
		self.sweep_concurrency = concurrency;

		self
	}

	/// Overrides the store key prefix.
	pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.key_prefix = prefix.into();

		self
	}

	/// Key namespace derived from [`KeeperConfig::key_prefix`].
	pub fn namespace(&self) -> KeyNamespace {
		KeyNamespace::new(self.key_prefix.clone())
	}

	/// Validates credentials and timing rules.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.client_id.trim().is_empty() {
			return Err(ConfigError::Empty { field: "client_id" });
		}
		if self.client_secret.trim().is_empty() {
			return Err(ConfigError::Empty { field: "client_secret" });
		}
		if self.key_prefix.is_empty() {
			return Err(ConfigError::Empty { field: "key_prefix" });
		}

		self.policy.validate()?;
		ensure_positive("sweep_interval", self.sweep_interval)?;

		if self.sweep_interval <= self.policy.staleness_margin {
			return Err(ConfigError::OutOfRange {
				field: "sweep_interval",
				reason: "must exceed the staleness margin",
			});
		}
		if self.sweep_concurrency == 0 {
			return Err(ConfigError::OutOfRange {
				field: "sweep_concurrency",
				reason: "must be at least 1",
			});
		}

		Ok(())
	}
}
impl Debug for KeeperConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("KeeperConfig")
			.field("client_id", &self.client_id)
			.field("client_secret", &"<redacted>")
			.field("token_url", &self.token_url.as_str())
			.field("policy", &self.policy)
			.field("sweep_interval", &self.sweep_interval)
			.field("sweep_concurrency", &self.sweep_concurrency)
			.field("key_prefix", &self.key_prefix)
			.finish()
	}
}

fn default_token_url() -> Url {
	Url::parse(DEFAULT_TOKEN_URL).unwrap_or_else(|e| unreachable!("Default token URL is valid: {e}"))
}

fn default_sweep_interval() -> Duration {
	KeeperConfig::DEFAULT_SWEEP_INTERVAL
}

fn default_sweep_concurrency() -> usize {
	KeeperConfig::DEFAULT_SWEEP_CONCURRENCY
}

fn default_key_prefix() -> String {
	KeyNamespace::DEFAULT_PREFIX.into()
}

fn ensure_positive(field: &'static str, value: Duration) -> Result<(), ConfigError> {
	if value.is_positive() {
		Ok(())
	} else {
		Err(ConfigError::OutOfRange { field, reason: "must be positive" })
	}
}
