//! Built-in seed cities
//!
//! Used only when a fresh snapshot is bootstrapped; once a snapshot exists the
//! tracked set comes from the file.

use super::Location;

/// A seed entry with coordinates but no weather data yet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeedCity {
    /// Human-readable name of the city
    pub title: &'static str,
    /// Latitude coordinate
    pub latitude: f64,
    /// Longitude coordinate
    pub longitude: f64,
}

impl SeedCity {
    pub fn to_location(&self) -> Location {
        Location::new(self.title, self.latitude, self.longitude)
    }
}

/// Static array of seed cities, in display order
pub static SEED_CITIES: [SeedCity; 6] = [
    SeedCity {
        title: "Moscow",
        latitude: 55.7558,
        longitude: 37.6173,
    },
    SeedCity {
        title: "Saint Petersburg",
        latitude: 59.9343,
        longitude: 30.3351,
    },
    SeedCity {
        title: "Berlin",
        latitude: 52.5200,
        longitude: 13.4050,
    },
    SeedCity {
        title: "Paris",
        latitude: 48.8566,
        longitude: 2.3522,
    },
    SeedCity {
        title: "New York",
        latitude: 40.7128,
        longitude: -74.0060,
    },
    SeedCity {
        title: "Tokyo",
        latitude: 35.6762,
        longitude: 139.6503,
    },
];

/// Get all seed cities
pub fn all_seed_cities() -> &'static [SeedCity] {
    &SEED_CITIES
}
