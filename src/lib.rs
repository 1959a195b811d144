//! Async stale-while-revalidate cache with keyed single-flight fetches, bounded background
//! refresh, and first-class staleness introspection.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod key;
pub mod metrics;

mod config;
mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")]
pub use crate::metrics::install_default_exporter;
pub use crate::{
	cache::{
		entry::{CacheEntry, Freshness},
		store::{CacheStatus, EntryStatus, RefreshingCache},
	},
	config::{CacheConfig, CacheConfigBuilder},
	error::{BoxError, Error, FetchResult, Result},
	key::{CacheKey, KeyBuilder},
};
