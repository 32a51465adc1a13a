//! In-memory weather cache
//!
//! Holds every tracked city next to its own lock, plus the two pass-level
//! "last refreshed" timestamps. Network calls always happen before a city's
//! lock is taken; the lock only covers the in-memory write.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::info;

use crate::data::{CityState, FetchError, Location, Sample, SeedCity, Upstream};

/// Layout of the local time shown next to a forecast
const DISPLAY_TIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

/// Which half of a city record a refresh touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    Offset,
    Weather,
}

impl fmt::Display for RefreshKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshKind::Offset => f.write_str("offset"),
            RefreshKind::Weather => f.write_str("weather"),
        }
    }
}

/// Errors raised by cache updates
#[derive(Debug, Error)]
pub enum CacheError {
    /// Caller asked for a city that is not tracked
    #[error("city index {index} out of range ({len} cities)")]
    IndexOutOfRange { index: usize, len: usize },

    /// Fetching fresh data for a city failed
    #[error("failed to update {kind} for city {city}: {source}")]
    Fetch {
        city: String,
        kind: RefreshKind,
        #[source]
        source: FetchError,
    },
}

#[derive(Debug)]
struct CityEntry {
    location: Location,
    state: Mutex<CityState>,
}

/// Shared cache of per-city offsets and forecasts
#[derive(Debug)]
pub struct WeatherCache {
    cities: Vec<CityEntry>,
    last_weather_update: Mutex<DateTime<Utc>>,
    last_offset_update: Mutex<DateTime<Utc>>,
}

impl WeatherCache {
    /// Creates a cache from already loaded city records
    pub fn new(
        cities: Vec<(Location, CityState)>,
        last_weather_update: DateTime<Utc>,
        last_offset_update: DateTime<Utc>,
    ) -> Self {
        Self {
            cities: cities
                .into_iter()
                .map(|(location, state)| CityEntry {
                    location,
                    state: Mutex::new(state),
                })
                .collect(),
            last_weather_update: Mutex::new(last_weather_update),
            last_offset_update: Mutex::new(last_offset_update),
        }
    }

    /// Creates a cache with no data yet, so every staleness check fires
    pub fn from_seeds(seeds: &[SeedCity]) -> Self {
        let cities = seeds
            .iter()
            .map(|seed| (seed.to_location(), CityState::default()))
            .collect();
        Self::new(cities, DateTime::<Utc>::UNIX_EPOCH, DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }

    pub fn location(&self, index: usize) -> Option<&Location> {
        self.cities.get(index).map(|entry| &entry.location)
    }

    /// Copy of one city's mutable state, taken under its lock
    pub fn city_state(&self, index: usize) -> Option<CityState> {
        self.cities
            .get(index)
            .map(|entry| lock(&entry.state).clone())
    }

    /// Iterates over every city in load order, locking each one in turn
    pub fn iter_cities(&self) -> impl Iterator<Item = (&Location, CityState)> + '_ {
        self.cities
            .iter()
            .map(|entry| (&entry.location, lock(&entry.state).clone()))
    }

    pub fn last_weather_update(&self) -> DateTime<Utc> {
        *lock(&self.last_weather_update)
    }

    pub fn last_offset_update(&self) -> DateTime<Utc> {
        *lock(&self.last_offset_update)
    }

    /// Records a completed weather pass; never moves the timestamp backwards
    pub fn mark_weather_updated(&self, at: DateTime<Utc>) {
        advance(&self.last_weather_update, at);
    }

    /// Records a completed offset pass; never moves the timestamp backwards
    pub fn mark_offset_updated(&self, at: DateTime<Utc>) {
        advance(&self.last_offset_update, at);
    }

    /// One display line per city for the current time
    pub fn get_cities(&self) -> Vec<String> {
        self.get_cities_at(Utc::now())
    }

    /// One display line per city, in load order
    ///
    /// Shows the first sample strictly after `now`, shifted by the city's
    /// offset. A city with no future sample yields an empty string.
    pub fn get_cities_at(&self, now: DateTime<Utc>) -> Vec<String> {
        self.cities
            .iter()
            .map(|entry| {
                let state = lock(&entry.state);
                state
                    .next_sample(now)
                    .map(|sample| format_line(&entry.location, state.offset, sample))
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Fetches and stores a fresh offset for one city
    pub async fn update_offset<U: Upstream>(
        &self,
        index: usize,
        upstream: &U,
    ) -> Result<(), CacheError> {
        let entry = self.entry(index)?;
        let offset = upstream
            .fetch_offset(&entry.location)
            .await
            .map_err(|source| CacheError::Fetch {
                city: entry.location.to_string(),
                kind: RefreshKind::Offset,
                source,
            })?;

        lock(&entry.state).offset = offset;
        info!(city = %entry.location, offset, "offset updated");
        Ok(())
    }

    /// Fetches and stores a fresh forecast for one city
    pub async fn update_weather<U: Upstream>(
        &self,
        index: usize,
        upstream: &U,
    ) -> Result<(), CacheError> {
        let entry = self.entry(index)?;
        let samples = upstream
            .fetch_forecast(&entry.location)
            .await
            .map_err(|source| CacheError::Fetch {
                city: entry.location.to_string(),
                kind: RefreshKind::Weather,
                source,
            })?;

        let count = samples.len();
        lock(&entry.state).samples = samples;
        info!(city = %entry.location, samples = count, "forecast updated");
        Ok(())
    }

    fn entry(&self, index: usize) -> Result<&CityEntry, CacheError> {
        self.cities.get(index).ok_or(CacheError::IndexOutOfRange {
            index,
            len: self.cities.len(),
        })
    }
}

/// Every write replaces whole values, so a poisoned lock still holds a usable record
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn advance(timestamp: &Mutex<DateTime<Utc>>, at: DateTime<Utc>) {
    let mut current = lock(timestamp);
    if at > *current {
        *current = at;
    }
}

fn format_line(location: &Location, offset: i32, sample: &Sample) -> String {
    let local = sample.time + Duration::hours(i64::from(offset));
    format!(
        "{}: {:.1} ({} GMT{:+})",
        location.title,
        sample.temperature,
        local.format(DISPLAY_TIME_LAYOUT),
        offset
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::upstream::fake::FakeUpstream;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
    }

    fn paris() -> (Location, CityState) {
        (
            Location::new("Paris", 48.85, 2.35),
            CityState::new(
                2,
                vec![Sample::new(at(10, 0), 5.0), Sample::new(at(11, 0), 6.0)],
            ),
        )
    }

    fn berlin() -> (Location, CityState) {
        (
            Location::new("Berlin", 52.52, 13.405),
            CityState::new(
                1,
                vec![Sample::new(at(10, 0), -1.0), Sample::new(at(11, 0), -2.0)],
            ),
        )
    }

    fn two_city_cache() -> WeatherCache {
        WeatherCache::new(vec![paris(), berlin()], at(9, 0), at(0, 0))
    }

    #[test]
    fn test_get_cities_scenario() {
        let cache = WeatherCache::new(vec![paris()], at(9, 0), at(0, 0));
        assert_eq!(
            cache.get_cities_at(at(10, 30)),
            vec!["Paris: 6.0 (2024-01-01 13:00:00 GMT+2)".to_string()]
        );
    }

    #[test]
    fn test_get_cities_shows_first_strictly_future_sample() {
        let cache = WeatherCache::new(vec![paris()], at(9, 0), at(0, 0));
        assert_eq!(
            cache.get_cities_at(at(9, 59)),
            vec!["Paris: 5.0 (2024-01-01 12:00:00 GMT+2)".to_string()]
        );
        // A sample exactly at `now` is already in the past
        assert_eq!(
            cache.get_cities_at(at(10, 0)),
            vec!["Paris: 6.0 (2024-01-01 13:00:00 GMT+2)".to_string()]
        );
    }

    #[test]
    fn test_get_cities_empty_line_when_forecast_exhausted() {
        let cache = two_city_cache();
        assert_eq!(cache.get_cities_at(at(11, 0)), vec![String::new(), String::new()]);
    }

    #[test]
    fn test_get_cities_keeps_load_order() {
        let cache = two_city_cache();
        let lines = cache.get_cities_at(at(10, 30));
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Paris: "));
        assert_eq!(lines[1], "Berlin: -2.0 (2024-01-01 12:00:00 GMT+1)");
    }

    #[test]
    fn test_get_cities_formats_negative_and_zero_offsets() {
        let samples = vec![Sample::new(at(12, 0), 3.3)];
        let cache = WeatherCache::new(
            vec![
                (Location::new("New York", 40.71, -74.0), CityState::new(-5, samples.clone())),
                (Location::new("London", 51.5, -0.12), CityState::new(0, samples)),
            ],
            at(0, 0),
            at(0, 0),
        );

        assert_eq!(
            cache.get_cities_at(at(11, 0)),
            vec![
                "New York: 3.3 (2024-01-01 07:00:00 GMT-5)".to_string(),
                "London: 3.3 (2024-01-01 12:00:00 GMT+0)".to_string(),
            ]
        );
    }

    #[test]
    fn test_from_seeds_starts_empty_and_stale() {
        let cache = WeatherCache::from_seeds(crate::data::all_seed_cities());
        assert_eq!(cache.len(), crate::data::all_seed_cities().len());
        assert_eq!(cache.last_weather_update(), DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(cache.last_offset_update(), DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(cache.city_state(0), Some(CityState::default()));
        assert!(cache.get_cities().iter().all(String::is_empty));
    }

    #[test]
    fn test_mark_updated_never_moves_backwards() {
        let cache = two_city_cache();

        cache.mark_weather_updated(at(12, 0));
        assert_eq!(cache.last_weather_update(), at(12, 0));

        cache.mark_weather_updated(at(8, 0));
        assert_eq!(cache.last_weather_update(), at(12, 0));

        cache.mark_offset_updated(at(1, 0));
        assert_eq!(cache.last_offset_update(), at(1, 0));
    }

    #[tokio::test]
    async fn test_update_weather_replaces_samples() {
        let cache = two_city_cache();
        let fresh = vec![Sample::new(at(14, 0), 12.0), Sample::new(at(15, 0), 13.0)];
        let upstream = FakeUpstream::new(3, fresh.clone());

        cache.update_weather(1, &upstream).await.unwrap();

        assert_eq!(cache.city_state(1).unwrap().samples, fresh);
        // Weather updates leave the offset alone
        assert_eq!(cache.city_state(1).unwrap().offset, 1);
        assert_eq!(cache.city_state(0), Some(paris().1));
        assert_eq!(upstream.forecast_calls(), vec!["Berlin".to_string()]);
    }

    #[tokio::test]
    async fn test_update_offset_replaces_offset() {
        let cache = two_city_cache();
        let upstream = FakeUpstream::new(3, Vec::new());

        cache.update_offset(0, &upstream).await.unwrap();

        let state = cache.city_state(0).unwrap();
        assert_eq!(state.offset, 3);
        assert_eq!(state.samples, paris().1.samples);
    }

    #[tokio::test]
    async fn test_update_out_of_range_index() {
        let cache = two_city_cache();
        let upstream = FakeUpstream::new(0, Vec::new());

        let err = cache.update_weather(2, &upstream).await.unwrap_err();
        assert!(matches!(err, CacheError::IndexOutOfRange { index: 2, len: 2 }));

        let err = cache.update_offset(7, &upstream).await.unwrap_err();
        assert!(matches!(err, CacheError::IndexOutOfRange { index: 7, len: 2 }));
        assert!(upstream.offset_calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_failure_carries_city_and_url() {
        let cache = two_city_cache();
        let upstream = FakeUpstream::new(5, Vec::new());
        upstream.fail_for(Some("Paris"));

        let err = cache.update_offset(0, &upstream).await.unwrap_err();

        match &err {
            CacheError::Fetch { city, kind, source } => {
                assert_eq!(city, "Paris (48.8500, 2.3500)");
                assert_eq!(*kind, RefreshKind::Offset);
                assert_eq!(source.url(), Some("http://fake/offset"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("offset"));
        assert_eq!(cache.city_state(0).unwrap().offset, 2);
    }

    /// Forecast source that parks inside the fetch until released
    struct GatedUpstream {
        started: Notify,
        release: Notify,
        samples: Vec<Sample>,
    }

    impl Upstream for GatedUpstream {
        async fn fetch_offset(&self, _location: &Location) -> Result<i32, FetchError> {
            Ok(0)
        }

        async fn fetch_forecast(&self, _location: &Location) -> Result<Vec<Sample>, FetchError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(self.samples.clone())
        }
    }

    #[tokio::test]
    async fn test_reads_are_not_blocked_by_in_flight_fetch() {
        let cache = two_city_cache();
        let upstream = GatedUpstream {
            started: Notify::new(),
            release: Notify::new(),
            samples: vec![Sample::new(at(11, 0), 20.0)],
        };
        let before = cache.get_cities_at(at(10, 30));

        let update = cache.update_weather(0, &upstream);
        let reader = async {
            upstream.started.notified().await;
            // The fetch is parked, yet both cities are readable and unchanged
            let during = cache.get_cities_at(at(10, 30));
            upstream.release.notify_one();
            during
        };
        let (result, during) = tokio::join!(update, reader);

        result.unwrap();
        assert_eq!(during, before);
        let after = cache.get_cities_at(at(10, 30));
        assert_eq!(after[0], "Paris: 20.0 (2024-01-01 13:00:00 GMT+2)");
        assert_eq!(after[1], before[1]);
    }

    /// Forecast source that alternates between two complete windows
    struct AlternatingUpstream {
        calls: AtomicUsize,
        windows: [Vec<Sample>; 2],
    }

    impl Upstream for AlternatingUpstream {
        async fn fetch_offset(&self, _location: &Location) -> Result<i32, FetchError> {
            Ok(0)
        }

        async fn fetch_forecast(&self, _location: &Location) -> Result<Vec<Sample>, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.windows[call % 2].clone())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_reads_never_see_torn_records() {
        let window_a: Vec<Sample> = (0..48)
            .map(|h| Sample::new(at(0, 0) + Duration::hours(h), 1.0))
            .collect();
        let window_b: Vec<Sample> = (0..48)
            .map(|h| Sample::new(at(0, 0) + Duration::hours(h), 2.0))
            .collect();

        let cache = Arc::new(WeatherCache::new(
            vec![
                (Location::new("A", 0.0, 0.0), CityState::new(0, window_a.clone())),
                berlin(),
            ],
            at(0, 0),
            at(0, 0),
        ));
        let upstream = AlternatingUpstream {
            calls: AtomicUsize::new(0),
            windows: [window_b, window_a],
        };
        let now = at(5, 30);
        let berlin_line = cache.get_cities_at(now)[1].clone();

        let reader_cache = Arc::clone(&cache);
        let reader = std::thread::spawn(move || {
            for _ in 0..2_000 {
                let lines = reader_cache.get_cities_at(now);
                assert!(
                    lines[0] == "A: 1.0 (2024-01-01 06:00:00 GMT+0)"
                        || lines[0] == "A: 2.0 (2024-01-01 06:00:00 GMT+0)",
                    "torn read: {}",
                    lines[0]
                );
                assert_eq!(lines[1], berlin_line);
            }
        });

        for _ in 0..500 {
            cache.update_weather(0, &upstream).await.unwrap();
        }
        reader.join().expect("reader thread panicked");

        let state = cache.city_state(0).unwrap();
        assert_eq!(state.samples.len(), 48);
        let first = state.samples[0].temperature;
        assert!(state.samples.iter().all(|s| s.temperature == first));
    }
}
