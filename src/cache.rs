//! Cache primitives: entry storage and the refreshing store.

pub mod entry;
pub mod store;
