//! Metrics helpers and per-cache telemetry bookkeeping.
//!
//! The [`CacheMetrics`] accumulator is always available and feeds status
//! reporting. With the `metrics` feature the same events are additionally
//! published through the `metrics` facade, and the `prometheus` feature adds a
//! ready-made exporter.

// std
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
#[cfg(feature = "metrics")] use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
#[cfg(feature = "metrics")] use smallvec::SmallVec;
// self
use crate::_prelude::*;

#[cfg(feature = "metrics")]
type LabelSet = SmallVec<[Label; 2]>;

#[cfg(feature = "metrics")]
const METRIC_REQUESTS_TOTAL: &str = "swr_cache_requests_total";
#[cfg(feature = "metrics")]
const METRIC_HITS_TOTAL: &str = "swr_cache_hits_total";
#[cfg(feature = "metrics")]
const METRIC_STALE_TOTAL: &str = "swr_cache_stale_total";
#[cfg(feature = "metrics")]
const METRIC_MISSES_TOTAL: &str = "swr_cache_misses_total";
#[cfg(feature = "metrics")]
const METRIC_REFRESH_TOTAL: &str = "swr_cache_refresh_total";
#[cfg(feature = "metrics")]
const METRIC_REFRESH_DURATION: &str = "swr_cache_refresh_duration_seconds";
#[cfg(feature = "metrics")]
const METRIC_REFRESH_ERRORS: &str = "swr_cache_refresh_errors_total";
#[cfg(feature = "metrics")]
const METRIC_REFRESH_SKIPPED: &str = "swr_cache_refresh_skipped_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thread-safe telemetry accumulator for a single cache instance.
#[derive(Debug, Default)]
pub struct CacheMetrics {
	total_requests: AtomicU64,
	cache_hits: AtomicU64,
	stale_serves: AtomicU64,
	refresh_successes: AtomicU64,
	refresh_errors: AtomicU64,
	refreshes_skipped: AtomicU64,
	last_refresh_micros: AtomicU64,
}
impl CacheMetrics {
	/// Create a new metrics accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a hit outcome.
	pub fn record_hit(&self, stale: bool) {
		self.total_requests.fetch_add(1, Ordering::Relaxed);
		self.cache_hits.fetch_add(1, Ordering::Relaxed);
		if stale {
			self.stale_serves.fetch_add(1, Ordering::Relaxed);
		}
	}

	/// Record a miss outcome.
	pub fn record_miss(&self) {
		self.total_requests.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a successful fetch or refresh and its latency.
	pub fn record_refresh_success(&self, duration: Duration) {
		self.refresh_successes.fetch_add(1, Ordering::Relaxed);
		self.last_refresh_micros.store(duration.as_micros() as u64, Ordering::Relaxed);
	}

	/// Record a failed fetch or refresh.
	pub fn record_refresh_error(&self) {
		self.refresh_errors.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a background refresh skipped because the budget was saturated.
	pub fn record_refresh_skipped(&self) {
		self.refreshes_skipped.fetch_add(1, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> CacheMetricsSnapshot {
		CacheMetricsSnapshot {
			total_requests: self.total_requests.load(Ordering::Relaxed),
			cache_hits: self.cache_hits.load(Ordering::Relaxed),
			stale_serves: self.stale_serves.load(Ordering::Relaxed),
			refresh_successes: self.refresh_successes.load(Ordering::Relaxed),
			refresh_errors: self.refresh_errors.load(Ordering::Relaxed),
			refreshes_skipped: self.refreshes_skipped.load(Ordering::Relaxed),
			last_refresh_micros: match self.last_refresh_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only snapshot of per-cache telemetry counters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheMetricsSnapshot {
	/// Total number of lookups observed.
	pub total_requests: u64,
	/// Count of lookups served from the cache.
	pub cache_hits: u64,
	/// Count of lookups served from stale entries.
	pub stale_serves: u64,
	/// Count of successful fetches and refreshes.
	pub refresh_successes: u64,
	/// Count of fetches and refreshes that resulted in errors.
	pub refresh_errors: u64,
	/// Count of background refreshes skipped because the budget was saturated.
	pub refreshes_skipped: u64,
	/// Microsecond latency of the most recent successful fetch or refresh.
	pub last_refresh_micros: Option<u64>,
}
impl CacheMetricsSnapshot {
	/// Convenience method to compute the cache hit rate.
	pub fn hit_rate(&self) -> f64 {
		if self.total_requests == 0 {
			0.0
		} else {
			self.cache_hits as f64 / self.total_requests as f64
		}
	}

	/// Ratio of stale serves over total lookups.
	pub fn stale_ratio(&self) -> f64 {
		if self.total_requests == 0 {
			0.0
		} else {
			self.stale_serves as f64 / self.total_requests as f64
		}
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle =
		PrometheusBuilder::new().install_recorder().map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a lookup served from the cache, tagging whether it was stale.
#[cfg(feature = "metrics")]
pub fn record_lookup_hit(cache: &str, stale: bool) {
	let labels = base_labels(cache);

	metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
	metrics::counter!(METRIC_HITS_TOTAL, labels.iter()).increment(1);

	if stale {
		metrics::counter!(METRIC_STALE_TOTAL, labels.iter()).increment(1);
	}
}

/// Record a lookup that required a synchronous fetch.
#[cfg(feature = "metrics")]
pub fn record_lookup_miss(cache: &str) {
	let labels = base_labels(cache);

	metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
	metrics::counter!(METRIC_MISSES_TOTAL, labels.iter()).increment(1);
}

/// Record a successful fetch or refresh along with its latency.
#[cfg(feature = "metrics")]
pub fn record_refresh_success(cache: &str, duration: Duration) {
	metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(cache, "success").iter()).increment(1);
	metrics::histogram!(METRIC_REFRESH_DURATION, base_labels(cache).iter())
		.record(duration.as_secs_f64());
}

/// Record a failed fetch or refresh.
#[cfg(feature = "metrics")]
pub fn record_refresh_error(cache: &str) {
	metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(cache, "error").iter()).increment(1);
	metrics::counter!(METRIC_REFRESH_ERRORS, base_labels(cache).iter()).increment(1);
}

/// Record a background refresh skipped because the budget was saturated.
#[cfg(feature = "metrics")]
pub fn record_refresh_skipped(cache: &str) {
	metrics::counter!(METRIC_REFRESH_SKIPPED, base_labels(cache).iter()).increment(1);
}

#[cfg(feature = "metrics")]
fn base_labels(cache: &str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(1);

	labels.push(Label::new("cache", cache.to_owned()));

	labels
}

#[cfg(feature = "metrics")]
fn status_labels(cache: &str, status: &'static str) -> LabelSet {
	let mut labels = base_labels(cache);

	labels.push(Label::new("status", status));

	labels
}
