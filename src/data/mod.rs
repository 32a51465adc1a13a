//! Core data models for the city weather cache
//!
//! This module contains the per-city record types together with the upstream
//! clients that produce fresh offsets and hourly forecasts for them.

pub mod cities;
pub mod timezone;
pub mod upstream;
pub mod weather;

pub use cities::{all_seed_cities, SeedCity};
pub use timezone::TimezoneClient;
pub use upstream::{FetchError, HttpUpstream, Upstream, UpstreamConfig};
pub use weather::WeatherClient;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable identity of a tracked city
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Human-readable name shown on the weather page
    pub title: String,
    /// Latitude coordinate
    pub latitude: f64,
    /// Longitude coordinate
    pub longitude: f64,
}

impl Location {
    pub fn new(title: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            title: title.into(),
            latitude,
            longitude,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.4}, {:.4})", self.title, self.latitude, self.longitude)
    }
}

/// A single hourly forecast point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Forecast hour in UTC
    pub time: DateTime<Utc>,
    /// Temperature in Celsius
    pub temperature: f64,
}

impl Sample {
    pub fn new(time: DateTime<Utc>, temperature: f64) -> Self {
        Self { time, temperature }
    }
}

/// Mutable part of a city record, written only under that city's lock
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CityState {
    /// Offset from UTC in whole hours
    pub offset: i32,
    /// Hourly forecast window, strictly increasing by time
    pub samples: Vec<Sample>,
}

impl CityState {
    pub fn new(offset: i32, samples: Vec<Sample>) -> Self {
        Self { offset, samples }
    }

    /// Returns the first sample strictly after `now`
    pub fn next_sample(&self, now: DateTime<Utc>) -> Option<&Sample> {
        self.samples.iter().find(|sample| sample.time > now)
    }
}

/// Checks that sample times are strictly increasing
pub fn is_strictly_increasing(samples: &[Sample]) -> bool {
    samples.windows(2).all(|pair| pair[0].time < pair[1].time)
}
