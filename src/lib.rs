//! citycast library
//!
//! A cache of hourly forecasts and UTC offsets for a fixed set of cities,
//! refreshed in the background and persisted to a JSON snapshot.

pub mod cache;
pub mod cli;
pub mod data;
pub mod refresh;

pub use cache::{CacheError, SnapshotError, SnapshotStore, WeatherCache};
pub use refresh::{RefreshConfig, RefreshHandle, Scheduler, SchedulerError};
