//! Keyed stale-while-revalidate store handling lookup, fetch, and refresh lifecycle.

// std
use std::{
	cell::RefCell,
	collections::{HashMap, HashSet},
	fmt::{self, Debug, Formatter},
	future::Future,
	sync::Mutex as StdMutex,
};
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
// self
#[cfg(feature = "metrics")] use crate::metrics;
use crate::{
	_prelude::*,
	cache::entry::{CacheEntry, Freshness},
	config::CacheConfig,
	error::FetchResult,
	key::CacheKey,
	metrics::{CacheMetrics, CacheMetricsSnapshot},
};

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Per-key guards serialising synchronous fetches.
type FetchGuards = StdMutex<HashMap<CacheKey, Arc<Mutex<()>>>>;

/// Coordinates cached reads, synchronous fetches, and background refreshes for
/// one family of keyed computations.
///
/// Cloning is cheap and shares all state. Hand a clone per call site; every
/// clone observes the same entries, in-flight refreshes, and refresh budget.
pub struct RefreshingCache<T> {
	config: Arc<CacheConfig>,
	// TODO: Swap the RwLock<HashMap> for DashMap if lock contention ever shows
	// up in profiles.
	entries: Arc<RwLock<HashMap<CacheKey, CacheEntry<T>>>>,
	/// Keys with a background refresh currently in flight.
	refreshes: Arc<StdMutex<HashSet<CacheKey>>>,
	refresh_permits: Arc<Semaphore>,
	fetch_guards: Arc<FetchGuards>,
	metrics: Arc<CacheMetrics>,
}
impl<T> RefreshingCache<T>
where
	T: Send + Sync + 'static,
{
	/// Build a cache enforcing the supplied configuration.
	pub fn new(config: CacheConfig) -> Result<Self> {
		config.validate()?;

		let refresh_permits = Arc::new(Semaphore::new(config.max_concurrent_refreshes));

		Ok(Self {
			config: Arc::new(config),
			entries: Arc::new(RwLock::new(HashMap::new())),
			refreshes: Arc::new(StdMutex::new(HashSet::new())),
			refresh_permits,
			fetch_guards: Arc::new(StdMutex::new(HashMap::new())),
			metrics: CacheMetrics::new(),
		})
	}

	/// Configuration in effect for this cache.
	pub fn config(&self) -> &CacheConfig {
		&self.config
	}

	/// Access the per-cache metrics accumulator.
	pub fn metrics(&self) -> Arc<CacheMetrics> {
		self.metrics.clone()
	}

	/// Resolve the value for `key`, fetching when the cache cannot serve it.
	///
	/// Per lookup, in order:
	/// 1. no entry: `fetch` runs synchronously; a failure propagates as
	///    [`Error::Fetch`] and leaves no entry behind;
	/// 2. entry older than `hard_max_age`: as (1), except a failure leaves the
	///    expired entry in place;
	/// 3. entry past the staleness deadline: the stale value returns
	///    immediately and one background refresh is scheduled, unless one is
	///    already in flight or the refresh budget is saturated;
	/// 4. fresh entry: the value returns as is.
	///
	/// Background refresh failures never surface here; they are logged and
	/// counted, and the previous value keeps serving. A lookup racing a
	/// background commit may still observe the stale value; callers get
	/// eventual consistency, not read-after-refresh ordering.
	#[tracing::instrument(skip(self, fetch), fields(cache = %self.config.name, key = %key))]
	pub async fn get_or_compute<F, Fut>(&self, key: CacheKey, fetch: F) -> Result<Arc<T>>
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = FetchResult<T>> + Send + 'static,
	{
		let now = Instant::now();
		let classified = {
			let entries = self.entries.read().await;

			entries.get(&key).map(|entry| (entry.freshness(now), entry.value.clone()))
		};

		match classified {
			Some((Freshness::Fresh, value)) => {
				self.observe_hit(false);

				Ok(value)
			},
			Some((Freshness::Stale, value)) => {
				self.schedule_refresh(key, fetch);
				self.observe_hit(true);

				Ok(value)
			},
			Some((Freshness::Expired, _)) => {
				tracing::debug!("cache entry expired; recomputing synchronously");

				self.fetch_blocking(key, fetch).await
			},
			None => {
				tracing::debug!("cache empty; performing initial fetch");

				self.fetch_blocking(key, fetch).await
			},
		}
	}

	/// Schedule a background refresh for an existing entry regardless of its
	/// freshness.
	///
	/// Subject to the same single-flight and budget rules as a stale lookup.
	/// Returns whether a refresh was scheduled; `false` when the key has no
	/// entry, a refresh is already in flight, or the budget is saturated.
	/// Failures are contained exactly like stale-lookup refreshes.
	#[tracing::instrument(skip(self, fetch), fields(cache = %self.config.name, key = %key))]
	pub async fn trigger_refresh<F, Fut>(&self, key: CacheKey, fetch: F) -> bool
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = FetchResult<T>> + Send + 'static,
	{
		{
			let entries = self.entries.read().await;

			if !entries.contains_key(&key) {
				return false;
			}
		}

		self.schedule_refresh(key, fetch)
	}

	/// Return the stored value for `key` without freshness classification and
	/// without side effects.
	pub async fn peek(&self, key: &CacheKey) -> Option<Arc<T>> {
		let entries = self.entries.read().await;

		entries.get(key).map(|entry| entry.value.clone())
	}

	/// Capture a point-in-time status snapshot for this cache.
	pub async fn status(&self) -> CacheStatus {
		let entry_count = { self.entries.read().await.len() };
		let in_flight_refreshes = { self.refreshes.lock().unwrap().len() };

		CacheStatus {
			name: self.config.name.clone(),
			entry_count,
			in_flight_refreshes,
			metrics: self.metrics.snapshot(),
		}
	}

	/// Capture the status projection for a single entry, if present.
	pub async fn entry_status(&self, key: &CacheKey) -> Option<EntryStatus> {
		let now = Instant::now();
		let entry = {
			let entries = self.entries.read().await;

			entries.get(key).cloned()
		};
		let refreshing = { self.refreshes.lock().unwrap().contains(key) };

		entry.map(|entry| EntryStatus::from_entry(key, &entry, now, refreshing))
	}

	/// Capture status projections for every entry in the cache.
	pub async fn entry_statuses(&self) -> Vec<EntryStatus> {
		let now = Instant::now();
		let entries: Vec<(CacheKey, CacheEntry<T>)> = {
			let entries = self.entries.read().await;

			entries.iter().map(|(key, entry)| (key.clone(), entry.clone())).collect()
		};
		let refreshes = { self.refreshes.lock().unwrap().clone() };

		entries
			.into_iter()
			.map(|(key, entry)| {
				let refreshing = refreshes.contains(&key);

				EntryStatus::from_entry(&key, &entry, now, refreshing)
			})
			.collect()
	}

	/// Fetch synchronously under the per-key guard and commit the result.
	///
	/// The guard coalesces concurrent cold or expired lookups for the same key
	/// into one upstream call; waiters re-check the entry once the guard is
	/// theirs and serve the committed value instead of refetching.
	async fn fetch_blocking<F, Fut>(&self, key: CacheKey, fetch: F) -> Result<Arc<T>>
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = FetchResult<T>> + Send + 'static,
	{
		let guard = self.fetch_guard(&key);
		let _guard = guard.lock().await;
		let now = Instant::now();
		let recheck = {
			let entries = self.entries.read().await;

			entries.get(&key).map(|entry| (entry.freshness(now), entry.value.clone()))
		};

		match recheck {
			Some((Freshness::Fresh, value)) => {
				self.observe_hit(false);

				return Ok(value);
			},
			Some((Freshness::Stale, value)) => {
				self.schedule_refresh(key, fetch);
				self.observe_hit(true);

				return Ok(value);
			},
			_ => {},
		}

		self.observe_miss();

		let started = Instant::now();

		match fetch().await {
			Ok(value) => {
				let entry = self.build_entry(Arc::new(value));
				let value = entry.value.clone();

				{
					let mut entries = self.entries.write().await;

					entries.insert(key, entry);
				}

				self.observe_refresh_success(started.elapsed());

				Ok(value)
			},
			Err(source) => {
				// An expired entry, if any, stays untouched; the next lookup
				// retries the fetch.
				self.observe_refresh_error();

				Err(Error::Fetch { key, source })
			},
		}
	}

	/// Schedule a background refresh unless one is already in flight for `key`
	/// or the refresh budget is saturated. Returns whether a task was spawned.
	fn schedule_refresh<F, Fut>(&self, key: CacheKey, fetch: F) -> bool
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = FetchResult<T>> + Send + 'static,
	{
		let permit = {
			let mut refreshes = self.refreshes.lock().unwrap();

			if refreshes.contains(&key) {
				return false;
			}

			// Saturation is not queued; the next stale lookup simply tries
			// again.
			let Ok(permit) = Arc::clone(&self.refresh_permits).try_acquire_owned() else {
				self.observe_refresh_skipped();
				tracing::debug!("background refresh skipped; concurrency limit reached");

				return false;
			};

			refreshes.insert(key.clone());

			permit
		};
		let guard = RefreshGuard {
			key: key.clone(),
			refreshes: Arc::clone(&self.refreshes),
			_permit: permit,
		};
		let cache = self.clone();

		tokio::spawn(async move {
			// Holds the in-flight marker and the budget permit until the task
			// ends, however it ends.
			let _guard = guard;

			cache.refresh(key, fetch).await;
		});

		true
	}

	#[tracing::instrument(skip(self, fetch), fields(cache = %self.config.name, key = %key))]
	async fn refresh<F, Fut>(&self, key: CacheKey, fetch: F)
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = FetchResult<T>> + Send + 'static,
	{
		let started = Instant::now();

		match fetch().await {
			Ok(value) => {
				let entry = self.build_entry(Arc::new(value));

				{
					let mut entries = self.entries.write().await;

					entries.insert(key, entry);
				}

				self.observe_refresh_success(started.elapsed());
				tracing::debug!("background refresh complete");
			},
			Err(err) => {
				// The previous value keeps serving until it expires; the
				// failure surfaces through logs and counters only.
				{
					let mut entries = self.entries.write().await;

					if let Some(entry) = entries.get_mut(&key) {
						entry.bump_error();
					}
				}

				self.observe_refresh_error();
				tracing::warn!(error = %err, "background refresh failed");
			},
		}
	}

	fn fetch_guard(&self, key: &CacheKey) -> Arc<Mutex<()>> {
		let mut guards = self.fetch_guards.lock().unwrap();

		guards.entry(key.clone()).or_default().clone()
	}

	fn build_entry(&self, value: Arc<T>) -> CacheEntry<T> {
		let mut stale_after = self.config.soft_ttl;

		if !self.config.refresh_jitter.is_zero() {
			stale_after -= jitter_within(self.config.refresh_jitter);
		}

		CacheEntry::new(value, stale_after, self.config.hard_max_age)
	}

	fn observe_hit(&self, stale: bool) {
		self.metrics.record_hit(stale);

		#[cfg(feature = "metrics")]
		metrics::record_lookup_hit(&self.config.name, stale);
	}

	fn observe_miss(&self) {
		self.metrics.record_miss();

		#[cfg(feature = "metrics")]
		metrics::record_lookup_miss(&self.config.name);
	}

	fn observe_refresh_success(&self, duration: Duration) {
		self.metrics.record_refresh_success(duration);

		#[cfg(feature = "metrics")]
		metrics::record_refresh_success(&self.config.name, duration);
	}

	fn observe_refresh_error(&self) {
		self.metrics.record_refresh_error();

		#[cfg(feature = "metrics")]
		metrics::record_refresh_error(&self.config.name);
	}

	fn observe_refresh_skipped(&self) {
		self.metrics.record_refresh_skipped();

		#[cfg(feature = "metrics")]
		metrics::record_refresh_skipped(&self.config.name);
	}
}
impl<T> Clone for RefreshingCache<T> {
	fn clone(&self) -> Self {
		Self {
			config: Arc::clone(&self.config),
			entries: Arc::clone(&self.entries),
			refreshes: Arc::clone(&self.refreshes),
			refresh_permits: Arc::clone(&self.refresh_permits),
			fetch_guards: Arc::clone(&self.fetch_guards),
			metrics: Arc::clone(&self.metrics),
		}
	}
}
impl<T> Debug for RefreshingCache<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let in_flight = self.refreshes.try_lock().map(|set| set.len()).unwrap_or_default();

		f.debug_struct("RefreshingCache")
			.field("config", &self.config)
			.field("in_flight_refreshes", &in_flight)
			.finish_non_exhaustive()
	}
}

/// Point-in-time status for a cache instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheStatus {
	/// Cache name from the configuration.
	pub name: String,
	/// Number of entries currently stored.
	pub entry_count: usize,
	/// Number of background refreshes in flight at capture time.
	pub in_flight_refreshes: usize,
	/// Telemetry counters captured at the same time.
	pub metrics: CacheMetricsSnapshot,
}

/// Status projection for a single cache entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntryStatus {
	/// Readable key material of the entry.
	pub key: String,
	/// Freshness classification at capture time.
	pub freshness: Freshness,
	/// Whether a background refresh was in flight at capture time.
	pub refreshing: bool,
	/// Entry age at capture time.
	pub age: Duration,
	/// Wall-clock timestamp of the last successful compute.
	pub refreshed_at: DateTime<Utc>,
	/// Wall-clock projection of the staleness deadline.
	pub stale_at: Option<DateTime<Utc>>,
	/// Wall-clock projection of the serving deadline.
	pub expires_at: Option<DateTime<Utc>>,
	/// Consecutive background refresh failures since the last success.
	pub error_count: u32,
}
impl EntryStatus {
	fn from_entry<T>(
		key: &CacheKey,
		entry: &CacheEntry<T>,
		now: Instant,
		refreshing: bool,
	) -> Self {
		Self {
			key: key.metadata().to_string(),
			freshness: entry.freshness(now),
			refreshing,
			age: entry.age(now),
			refreshed_at: entry.refreshed_at,
			stale_at: wallclock_deadline(entry, entry.stale_at),
			expires_at: wallclock_deadline(entry, entry.expires_at),
			error_count: entry.error_count,
		}
	}
}

/// Clears a key's in-flight marker and releases its budget permit when the
/// refresh task ends, however it ends.
struct RefreshGuard {
	key: CacheKey,
	refreshes: Arc<StdMutex<HashSet<CacheKey>>>,
	_permit: OwnedSemaphorePermit,
}
impl Drop for RefreshGuard {
	fn drop(&mut self) {
		self.refreshes.lock().unwrap().remove(&self.key);
	}
}

/// Project a monotonic deadline onto the wall clock using the entry's compute
/// timestamp as the anchor.
fn wallclock_deadline<T>(entry: &CacheEntry<T>, deadline: Instant) -> Option<DateTime<Utc>> {
	let delta = deadline.saturating_duration_since(entry.computed_at);
	let delta = TimeDelta::from_std(delta).ok()?;

	entry.refreshed_at.checked_add_signed(delta)
}

fn jitter_within(max: Duration) -> Duration {
	if max.is_zero() {
		return Duration::ZERO;
	}

	SMALL_RNG.with(|cell| {
		let mut rng = cell.borrow_mut();
		let jitter = rng.random_range(0..=max.as_nanos().min(u64::MAX as u128));

		Duration::from_nanos(jitter as u64)
	})
}
