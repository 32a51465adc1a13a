//! Snapshot persistence for the weather cache
//!
//! Stores the whole cache as one pretty-printed JSON document so a restart can
//! pick up where the previous process left off without calling the upstream
//! APIs again.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::store::WeatherCache;
use crate::data::{is_strictly_increasing, CityState, Location, Sample, SeedCity};

/// Directory next to the executable that holds the snapshot
const SNAPSHOT_DIR: &str = "weatherdata";

/// File name of the snapshot
const SNAPSHOT_FILE: &str = "weatherdata.json";

/// Errors raised while loading or saving a snapshot
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// No snapshot at the configured path
    #[error("snapshot {} does not exist", .path.display())]
    Missing { path: PathBuf },

    /// The file exists but could not be read
    #[error("failed to read snapshot {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file is not a valid snapshot document
    #[error("failed to parse snapshot {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The document parsed but tracks no cities
    #[error("snapshot {} contains no cities", .path.display())]
    Empty { path: PathBuf },

    /// A city record breaks the forecast invariants
    #[error("snapshot {} has an invalid record for {city}: {reason}", .path.display())]
    Invalid {
        path: PathBuf,
        city: String,
        reason: String,
    },

    /// The cache could not be serialized
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),

    /// Writing the snapshot to disk failed
    #[error("failed to write snapshot {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The default location could not be resolved
    #[error("cannot locate the running executable: {0}")]
    Executable(#[source] io::Error),
}

/// On-disk representation of one city
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SnapshotCity {
    latitude: f64,
    longitude: f64,
    title: String,
    #[serde(rename = "dstOffset", default)]
    offset: i32,
    #[serde(default)]
    time: Vec<DateTime<Utc>>,
    #[serde(default)]
    temperature_2m: Vec<f64>,
}

/// On-disk representation of the whole cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SnapshotDocument {
    available_cities: Vec<SnapshotCity>,
    #[serde(default)]
    last_weather_update: DateTime<Utc>,
    #[serde(default)]
    last_offset_update: DateTime<Utc>,
}

impl SnapshotDocument {
    /// Copies the cache, locking one city at a time
    fn capture(cache: &WeatherCache) -> Self {
        let available_cities = cache
            .iter_cities()
            .map(|(location, state)| SnapshotCity {
                latitude: location.latitude,
                longitude: location.longitude,
                title: location.title.clone(),
                offset: state.offset,
                time: state.samples.iter().map(|s| s.time).collect(),
                temperature_2m: state.samples.iter().map(|s| s.temperature).collect(),
            })
            .collect();

        Self {
            available_cities,
            last_weather_update: cache.last_weather_update(),
            last_offset_update: cache.last_offset_update(),
        }
    }

    fn into_cache(self, path: &Path) -> Result<WeatherCache, SnapshotError> {
        if self.available_cities.is_empty() {
            return Err(SnapshotError::Empty {
                path: path.to_path_buf(),
            });
        }

        let mut cities = Vec::with_capacity(self.available_cities.len());
        for city in self.available_cities {
            let location = Location::new(city.title, city.latitude, city.longitude);
            if city.time.len() != city.temperature_2m.len() {
                return Err(SnapshotError::Invalid {
                    path: path.to_path_buf(),
                    city: location.to_string(),
                    reason: format!(
                        "{} timestamps but {} temperatures",
                        city.time.len(),
                        city.temperature_2m.len()
                    ),
                });
            }

            let samples: Vec<Sample> = city
                .time
                .into_iter()
                .zip(city.temperature_2m)
                .map(|(time, temperature)| Sample::new(time, temperature))
                .collect();
            if !is_strictly_increasing(&samples) {
                return Err(SnapshotError::Invalid {
                    path: path.to_path_buf(),
                    city: location.to_string(),
                    reason: "timestamps are not strictly increasing".to_string(),
                });
            }

            cities.push((location, CityState::new(city.offset, samples)));
        }

        Ok(WeatherCache::new(
            cities,
            self.last_weather_update,
            self.last_offset_update,
        ))
    }
}

/// Reads and writes the cache snapshot file
///
/// The snapshot is rewritten wholesale on every save: the document goes to a
/// sibling temporary file first and is then renamed over the previous one.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    /// Location of the snapshot document
    path: PathBuf,
}

impl SnapshotStore {
    /// Creates a store for the given snapshot file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `weatherdata/weatherdata.json` next to the running executable
    pub fn default_path() -> Result<PathBuf, SnapshotError> {
        let exe = std::env::current_exe().map_err(SnapshotError::Executable)?;
        let dir = exe.parent().unwrap_or_else(|| Path::new("."));
        Ok(dir.join(SNAPSHOT_DIR).join(SNAPSHOT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the snapshot, failing if it is missing, corrupt or empty
    pub fn load(&self) -> Result<WeatherCache, SnapshotError> {
        let content = fs::read_to_string(&self.path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                SnapshotError::Missing {
                    path: self.path.clone(),
                }
            } else {
                SnapshotError::Read {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;

        let document: SnapshotDocument =
            serde_json::from_str(&content).map_err(|source| SnapshotError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        let cache = document.into_cache(&self.path)?;

        for (location, _) in cache.iter_cities() {
            info!(city = %location, "loaded city");
        }
        info!(
            path = %self.path.display(),
            last_weather_update = %cache.last_weather_update(),
            last_offset_update = %cache.last_offset_update(),
            "snapshot loaded"
        );

        Ok(cache)
    }

    /// Loads the snapshot, or creates one from `seeds` if none exists yet
    pub fn load_or_bootstrap(&self, seeds: &[SeedCity]) -> Result<WeatherCache, SnapshotError> {
        match self.load() {
            Err(SnapshotError::Missing { .. }) => {
                info!(
                    path = %self.path.display(),
                    cities = seeds.len(),
                    "no snapshot found, bootstrapping from seed cities"
                );
                let cache = WeatherCache::from_seeds(seeds);
                if cache.is_empty() {
                    return Err(SnapshotError::Empty {
                        path: self.path.clone(),
                    });
                }
                self.save(&cache)?;
                Ok(cache)
            }
            other => other,
        }
    }

    /// Writes the whole cache to disk
    pub fn save(&self, cache: &WeatherCache) -> Result<(), SnapshotError> {
        let document = SnapshotDocument::capture(cache);
        let mut json = serde_json::to_string_pretty(&document).map_err(SnapshotError::Encode)?;
        json.push('\n');

        let write_err = |source| SnapshotError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(write_err)?;
        }

        let tmp_path = self.tmp_path();
        fs::write(&tmp_path, json).map_err(write_err)?;
        fs::rename(&tmp_path, &self.path).map_err(write_err)?;

        info!(path = %self.path.display(), "snapshot saved");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| SNAPSHOT_FILE.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
