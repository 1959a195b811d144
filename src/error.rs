//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error produced by caller-supplied fetch functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type a fetch function resolves to.
pub type FetchResult<T> = std::result::Result<T, BoxError>;

/// Unified error type for the cache crate.
///
/// Background refresh failures never surface here; only construction and the
/// synchronous fetch paths return errors.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Configuration failed for {field}: {reason}")]
	Configuration { field: &'static str, reason: String },
	#[error("Fetch for cache key '{key}' failed: {source}")]
	Fetch {
		key: crate::key::CacheKey,
		#[source]
		source: BoxError,
	},
	#[error("Invalid cache key: {reason}")]
	Key { reason: String },

	#[cfg(feature = "prometheus")]
	#[error("Metrics error: {0}")]
	Metrics(String),
}
#[cfg(feature = "prometheus")]
impl<T> From<metrics::SetRecorderError<T>> for Error
where
	T: std::fmt::Display,
{
	fn from(value: metrics::SetRecorderError<T>) -> Self {
		Self::Metrics(value.to_string())
	}
}
