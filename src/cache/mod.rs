//! Weather cache and its on-disk snapshot
//!
//! `WeatherCache` is the shared in-memory store read by the web layer and
//! written by the refresh scheduler. `SnapshotStore` persists it as a single
//! JSON document so a restarted process can serve data immediately and only
//! refresh what has gone stale.

mod snapshot;
mod store;

pub use snapshot::{SnapshotError, SnapshotStore};
pub use store::{CacheError, RefreshKind, WeatherCache};
