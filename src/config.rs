//! Cache configuration and validation.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// Default age after which a cached value counts as stale (1 hour).
pub const DEFAULT_SOFT_TTL: Duration = Duration::from_secs(60 * 60);
/// Default age after which a cached value must no longer be served (7 days).
pub const DEFAULT_HARD_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Default cap on simultaneously in-flight background refreshes per cache.
pub const DEFAULT_MAX_CONCURRENT_REFRESHES: usize = 8;

/// Freshness windows and refresh limits for one cache instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
	/// Cache identifier used in logs, metrics labels, and status output.
	pub name: String,
	/// Age after which an entry is stale and eligible for background refresh.
	#[serde(default = "default_soft_ttl")]
	pub soft_ttl: Duration,
	/// Age at which an entry stops being served and is recomputed synchronously.
	#[serde(default = "default_hard_max_age")]
	pub hard_max_age: Duration,
	/// Cap on simultaneously in-flight background refreshes.
	#[serde(default = "default_max_concurrent_refreshes")]
	pub max_concurrent_refreshes: usize,
	/// Random reduction of the staleness deadline, sampled per stored entry from
	/// `[0, refresh_jitter]`.
	///
	/// Spreads out the refreshes of entries that were populated together. Zero
	/// disables jitter.
	#[serde(default)]
	pub refresh_jitter: Duration,
}
impl CacheConfig {
	/// Construct a configuration with default windows for the named cache.
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			soft_ttl: DEFAULT_SOFT_TTL,
			hard_max_age: DEFAULT_HARD_MAX_AGE,
			max_concurrent_refreshes: DEFAULT_MAX_CONCURRENT_REFRESHES,
			refresh_jitter: Duration::ZERO,
		}
	}

	/// Start a [`CacheConfigBuilder`] for the named cache.
	pub fn builder(name: impl Into<String>) -> CacheConfigBuilder {
		CacheConfigBuilder { config: Self::new(name) }
	}

	/// Validate the configuration against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.name.is_empty() {
			return Err(Error::Configuration { field: "name", reason: "Must not be empty.".into() });
		}
		if self.name.len() > 64 {
			return Err(Error::Configuration {
				field: "name",
				reason: "Must be at most 64 characters.".into(),
			});
		}
		if !self.name.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_')) {
			return Err(Error::Configuration {
				field: "name",
				reason: "Must contain only ASCII letters, digits, '-', or '_'.".into(),
			});
		}
		if self.hard_max_age < self.soft_ttl {
			return Err(Error::Configuration {
				field: "hard_max_age",
				reason: "Must be greater than or equal to soft_ttl.".into(),
			});
		}
		if self.max_concurrent_refreshes == 0 {
			return Err(Error::Configuration {
				field: "max_concurrent_refreshes",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.refresh_jitter > self.soft_ttl {
			return Err(Error::Configuration {
				field: "refresh_jitter",
				reason: "Must not exceed soft_ttl.".into(),
			});
		}

		Ok(())
	}
}

/// Fluent builder for [`CacheConfig`].
#[derive(Debug)]
pub struct CacheConfigBuilder {
	config: CacheConfig,
}
impl CacheConfigBuilder {
	/// Override the staleness threshold.
	pub fn soft_ttl(mut self, soft_ttl: Duration) -> Self {
		self.config.soft_ttl = soft_ttl;

		self
	}

	/// Override the serving deadline.
	pub fn hard_max_age(mut self, hard_max_age: Duration) -> Self {
		self.config.hard_max_age = hard_max_age;

		self
	}

	/// Override the background refresh cap.
	pub fn max_concurrent_refreshes(mut self, max_concurrent_refreshes: usize) -> Self {
		self.config.max_concurrent_refreshes = max_concurrent_refreshes;

		self
	}

	/// Override the per-entry staleness jitter.
	pub fn refresh_jitter(mut self, refresh_jitter: Duration) -> Self {
		self.config.refresh_jitter = refresh_jitter;

		self
	}

	/// Finalize and validate the configuration.
	pub fn build(self) -> Result<CacheConfig> {
		self.config.validate()?;

		Ok(self.config)
	}
}

fn default_soft_ttl() -> Duration {
	DEFAULT_SOFT_TTL
}

fn default_hard_max_age() -> Duration {
	DEFAULT_HARD_MAX_AGE
}

fn default_max_concurrent_refreshes() -> usize {
	DEFAULT_MAX_CONCURRENT_REFRESHES
}
