//! Integration tests for cache lifecycle behaviour: cold start, freshness
//! windows, background refresh, and failure containment.

// std
use std::{
	future::{self, Ready},
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use swr_cache::{CacheConfig, CacheKey, Error, FetchResult, Freshness, RefreshingCache, Result};
use tokio::{task, time};

const SOFT_TTL: Duration = Duration::from_secs(60 * 60);
const HARD_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
const MINUTE: Duration = Duration::from_secs(60);

fn sessions_cache() -> RefreshingCache<u64> {
	let config = CacheConfig::builder("daily-sessions")
		.soft_ttl(SOFT_TTL)
		.hard_max_age(HARD_MAX_AGE)
		.build()
		.expect("config");

	RefreshingCache::new(config).expect("cache")
}

fn tenant_key(tenant: &str) -> CacheKey {
	CacheKey::builder("daily_sessions").arg(tenant).arg("2026-08-23").build().expect("key")
}

fn counting_fetch(
	calls: &Arc<AtomicUsize>,
	value: u64,
) -> impl FnOnce() -> Ready<FetchResult<u64>> + Send + 'static {
	let calls = Arc::clone(calls);

	move || {
		calls.fetch_add(1, Ordering::SeqCst);

		future::ready(Ok(value))
	}
}

fn failing_fetch(
	calls: &Arc<AtomicUsize>,
) -> impl FnOnce() -> Ready<FetchResult<u64>> + Send + 'static {
	let calls = Arc::clone(calls);

	move || {
		calls.fetch_add(1, Ordering::SeqCst);

		future::ready(Err("warehouse unavailable".into()))
	}
}

/// Drive spawned refresh tasks to completion on the current-thread runtime.
async fn settle() {
	for _ in 0..16 {
		task::yield_now().await;
	}
}

#[tokio::test(start_paused = true)]
async fn cold_start_fetches_once_and_caches() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let cache = sessions_cache();
	let key = tenant_key("acme");
	let calls = Arc::new(AtomicUsize::new(0));
	let first = cache.get_or_compute(key.clone(), counting_fetch(&calls, 41)).await?;
	let second = cache.get_or_compute(key.clone(), counting_fetch(&calls, 42)).await?;

	assert_eq!(*first, 41);
	assert_eq!(*second, 41);
	assert!(Arc::ptr_eq(&first, &second));
	assert_eq!(calls.load(Ordering::SeqCst), 1);

	let status = cache.status().await;

	assert_eq!(status.entry_count, 1);
	assert_eq!(status.metrics.total_requests, 2);
	assert_eq!(status.metrics.cache_hits, 1);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn fresh_entries_serve_without_invoking_the_fetch() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let cache = sessions_cache();
	let key = tenant_key("acme");
	let calls = Arc::new(AtomicUsize::new(0));

	cache.get_or_compute(key.clone(), counting_fetch(&calls, 7)).await?;
	time::advance(SOFT_TTL - MINUTE).await;

	let value = cache.get_or_compute(key.clone(), counting_fetch(&calls, 8)).await?;

	assert_eq!(*value, 7);
	assert_eq!(calls.load(Ordering::SeqCst), 1);

	settle().await;

	assert_eq!(cache.status().await.in_flight_refreshes, 0);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn stale_entries_serve_the_old_value_and_refresh_in_background() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let cache = sessions_cache();
	let key = tenant_key("acme");
	let initial = Arc::new(AtomicUsize::new(0));
	let refreshed = Arc::new(AtomicUsize::new(0));
	let value = cache.get_or_compute(key.clone(), counting_fetch(&initial, 100)).await?;

	assert_eq!(*value, 100);

	time::advance(30 * MINUTE).await;

	let value = cache.get_or_compute(key.clone(), counting_fetch(&refreshed, 200)).await?;

	assert_eq!(*value, 100, "entry still fresh at 30 minutes");
	assert_eq!(refreshed.load(Ordering::SeqCst), 0);

	time::advance(60 * MINUTE).await;

	let value = cache.get_or_compute(key.clone(), counting_fetch(&refreshed, 200)).await?;

	assert_eq!(*value, 100, "stale entry keeps serving the old value");

	settle().await;

	assert_eq!(refreshed.load(Ordering::SeqCst), 1);

	time::advance(MINUTE).await;

	let value = cache.get_or_compute(key.clone(), counting_fetch(&refreshed, 300)).await?;

	assert_eq!(*value, 200, "refreshed value becomes visible to the next lookup");
	assert_eq!(refreshed.load(Ordering::SeqCst), 1, "fresh entry does not refetch");

	let status = cache.status().await;

	assert_eq!(status.metrics.stale_serves, 1);
	assert_eq!(status.metrics.refresh_successes, 2);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn expired_entries_recompute_synchronously() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let cache = sessions_cache();
	let key = tenant_key("acme");
	let initial = Arc::new(AtomicUsize::new(0));

	cache.get_or_compute(key.clone(), counting_fetch(&initial, 1)).await?;
	time::advance(HARD_MAX_AGE + MINUTE).await;

	let replacement = Arc::new(AtomicUsize::new(0));
	let value = cache.get_or_compute(key.clone(), counting_fetch(&replacement, 2)).await?;

	assert_eq!(*value, 2, "expired entries are never served");
	assert_eq!(replacement.load(Ordering::SeqCst), 1);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn freshness_flips_exactly_at_both_deadlines() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let cache = sessions_cache();
	let key = tenant_key("acme");
	let calls = Arc::new(AtomicUsize::new(0));

	cache.get_or_compute(key.clone(), counting_fetch(&calls, 1)).await?;
	time::advance(SOFT_TTL).await;

	let status = cache.entry_status(&key).await.expect("entry");

	assert_eq!(status.freshness, Freshness::Stale, "age == soft_ttl is already stale");

	time::advance(HARD_MAX_AGE - SOFT_TTL).await;

	let status = cache.entry_status(&key).await.expect("entry");

	assert_eq!(status.freshness, Freshness::Expired, "age == hard_max_age is already expired");
	assert_eq!(status.age, HARD_MAX_AGE);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_cold_fetches_leave_no_entry_behind() {
	let _ = tracing_subscriber::fmt::try_init();

	let cache = sessions_cache();
	let key = tenant_key("acme");
	let failures = Arc::new(AtomicUsize::new(0));
	let result = cache.get_or_compute(key.clone(), failing_fetch(&failures)).await;

	match result {
		Err(Error::Fetch { source, .. }) => {
			assert_eq!(source.to_string(), "warehouse unavailable");
		},
		other => panic!("expected a fetch error, got {other:?}"),
	}

	assert!(cache.peek(&key).await.is_none());
	assert_eq!(cache.status().await.entry_count, 0);

	let calls = Arc::new(AtomicUsize::new(0));
	let value =
		cache.get_or_compute(key.clone(), counting_fetch(&calls, 5)).await.expect("retry succeeds");

	assert_eq!(*value, 5);
	assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_background_refreshes_keep_serving_the_stale_value() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let cache = sessions_cache();
	let key = tenant_key("acme");
	let calls = Arc::new(AtomicUsize::new(0));

	cache.get_or_compute(key.clone(), counting_fetch(&calls, 10)).await?;
	time::advance(2 * SOFT_TTL).await;

	let failures = Arc::new(AtomicUsize::new(0));
	let value = cache.get_or_compute(key.clone(), failing_fetch(&failures)).await?;

	assert_eq!(*value, 10, "the lookup that schedules the refresh is unaffected");

	settle().await;

	assert_eq!(failures.load(Ordering::SeqCst), 1);

	let status = cache.entry_status(&key).await.expect("entry survives the failed refresh");

	assert_eq!(status.error_count, 1);
	assert!(!status.refreshing, "marker cleared after the failed refresh");

	// Still before hard_max_age: the stale value keeps serving, and the next
	// lookup may schedule another attempt.
	let retry = Arc::new(AtomicUsize::new(0));
	let value = cache.get_or_compute(key.clone(), counting_fetch(&retry, 11)).await?;

	assert_eq!(*value, 10);

	settle().await;

	assert_eq!(retry.load(Ordering::SeqCst), 1);
	assert_eq!(*cache.peek(&key).await.expect("entry"), 11);
	assert_eq!(cache.status().await.metrics.refresh_errors, 1);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn expired_fetch_failures_propagate_but_keep_the_entry() {
	let _ = tracing_subscriber::fmt::try_init();

	let cache = sessions_cache();
	let key = tenant_key("acme");
	let calls = Arc::new(AtomicUsize::new(0));

	cache.get_or_compute(key.clone(), counting_fetch(&calls, 10)).await.expect("initial fetch");
	time::advance(HARD_MAX_AGE + MINUTE).await;

	let failures = Arc::new(AtomicUsize::new(0));
	let result = cache.get_or_compute(key.clone(), failing_fetch(&failures)).await;

	assert!(matches!(result, Err(Error::Fetch { .. })));
	assert_eq!(failures.load(Ordering::SeqCst), 1);
	// The expired entry stays for introspection; it is still never served.
	assert_eq!(*cache.peek(&key).await.expect("entry retained"), 10);

	let retry = Arc::new(AtomicUsize::new(0));
	let value =
		cache.get_or_compute(key.clone(), counting_fetch(&retry, 20)).await.expect("recovery");

	assert_eq!(*value, 20);
}

#[tokio::test(start_paused = true)]
async fn distinct_keys_are_cached_independently() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let cache = sessions_cache();
	let acme = tenant_key("acme");
	let globex = tenant_key("globex");
	let calls = Arc::new(AtomicUsize::new(0));
	let a = cache.get_or_compute(acme.clone(), counting_fetch(&calls, 1)).await?;
	let b = cache.get_or_compute(globex.clone(), counting_fetch(&calls, 2)).await?;

	assert_eq!(*a, 1);
	assert_eq!(*b, 2);
	assert_eq!(calls.load(Ordering::SeqCst), 2);
	assert_eq!(cache.status().await.entry_count, 2);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn refresh_jitter_only_shortens_the_fresh_window() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let config = CacheConfig::builder("daily-sessions")
		.soft_ttl(SOFT_TTL)
		.hard_max_age(HARD_MAX_AGE)
		.refresh_jitter(10 * MINUTE)
		.build()?;
	let cache = RefreshingCache::new(config)?;
	let key = tenant_key("acme");
	let calls = Arc::new(AtomicUsize::new(0));

	cache.get_or_compute(key.clone(), counting_fetch(&calls, 1)).await?;
	time::advance(SOFT_TTL).await;

	let status = cache.entry_status(&key).await.expect("entry");

	assert_ne!(status.freshness, Freshness::Fresh, "age == soft_ttl can never be fresh");

	Ok(())
}
