//! Cache entry storage and freshness classification.

// std
use std::fmt::{self, Debug, Formatter};
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// Freshness of a cache entry relative to its configured windows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Freshness {
	/// Age below the staleness deadline; served with no side effects.
	Fresh,
	/// Age at or past the staleness deadline but before expiry; still served,
	/// while a background refresh becomes eligible.
	Stale,
	/// Age at or past expiry; never served, forces a synchronous recompute.
	Expired,
}

/// One cached computation result together with its freshness deadlines.
///
/// Deadlines are fixed at construction from the configured windows. Time only
/// moves an entry forward through [`Freshness::Fresh`], [`Freshness::Stale`],
/// and [`Freshness::Expired`]; the value itself never changes in place, it is
/// replaced wholesale by a successful fetch.
pub struct CacheEntry<T> {
	/// Last successfully computed value.
	pub value: Arc<T>,
	/// Wall-clock timestamp of the last successful compute, for reporting.
	pub refreshed_at: DateTime<Utc>,
	/// Monotonic instant of the last successful compute.
	pub computed_at: Instant,
	/// Monotonic deadline past which the entry is stale.
	pub stale_at: Instant,
	/// Monotonic deadline past which the entry must not be served.
	pub expires_at: Instant,
	/// Consecutive background refresh failures since the last success.
	pub error_count: u32,
}
impl<T> CacheEntry<T> {
	/// Create an entry computed now with the supplied deadlines.
	pub fn new(value: Arc<T>, stale_after: Duration, expires_after: Duration) -> Self {
		let computed_at = Instant::now();

		Self {
			value,
			refreshed_at: Utc::now(),
			computed_at,
			stale_at: computed_at + stale_after,
			expires_at: computed_at + expires_after,
			error_count: 0,
		}
	}

	/// Age of the entry at the given instant.
	pub fn age(&self, now: Instant) -> Duration {
		now.saturating_duration_since(self.computed_at)
	}

	/// Classify the entry's freshness at the given instant.
	pub fn freshness(&self, now: Instant) -> Freshness {
		if now < self.stale_at {
			Freshness::Fresh
		} else if now < self.expires_at {
			Freshness::Stale
		} else {
			Freshness::Expired
		}
	}

	/// Record one failed background refresh against this entry.
	pub fn bump_error(&mut self) {
		self.error_count = self.error_count.saturating_add(1);
	}
}
impl<T> Clone for CacheEntry<T> {
	fn clone(&self) -> Self {
		Self {
			value: self.value.clone(),
			refreshed_at: self.refreshed_at,
			computed_at: self.computed_at,
			stale_at: self.stale_at,
			expires_at: self.expires_at,
			error_count: self.error_count,
		}
	}
}
impl<T> Debug for CacheEntry<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("CacheEntry")
			.field("refreshed_at", &self.refreshed_at)
			.field("stale_at", &self.stale_at)
			.field("expires_at", &self.expires_at)
			.field("error_count", &self.error_count)
			.finish_non_exhaustive()
	}
}
