//! Command-line interface parsing for citycast
//!
//! This module handles parsing of CLI arguments using clap and resolves them
//! into the startup configuration for the weather service.

use std::path::PathBuf;

use clap::Parser;
use reqwest::Url;
use thiserror::Error;

use crate::cache::{SnapshotError, SnapshotStore};
use crate::data::UpstreamConfig;
use crate::refresh::RefreshConfig;

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// An endpoint override is not an http(s) URL
    #[error("Invalid {name} URL: '{value}'")]
    InvalidUrl { name: &'static str, value: String },

    /// The GeoNames username was given but empty
    #[error("GeoNames username must not be empty")]
    EmptyUsername,

    /// The default snapshot location could not be resolved
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// citycast - Cached city weather, kept fresh from GeoNames and Open-Meteo
#[derive(Parser, Debug)]
#[command(name = "citycast")]
#[command(about = "Cached city weather, kept fresh from GeoNames and Open-Meteo")]
#[command(version)]
pub struct Cli {
    /// Snapshot file [default: weatherdata/weatherdata.json next to the binary]
    #[arg(long, value_name = "PATH", env = "CITYCAST_DATA_FILE")]
    pub data_file: Option<PathBuf>,

    /// Create the snapshot from the built-in city list if it does not exist
    #[arg(long)]
    pub bootstrap: bool,

    /// Refresh stale data, print the current forecast lines and exit
    #[arg(long)]
    pub once: bool,

    /// GeoNames account used for timezone lookups
    #[arg(long, value_name = "USER", env = "CITYCAST_GEONAMES_USERNAME")]
    pub geonames_username: Option<String>,

    /// Override the GeoNames timezone endpoint
    #[arg(long, value_name = "URL")]
    pub timezone_url: Option<String>,

    /// Override the Open-Meteo forecast endpoint
    #[arg(long, value_name = "URL")]
    pub forecast_url: Option<String>,
}

/// Configuration derived from CLI arguments for application startup
#[derive(Debug, Clone)]
pub struct StartupConfig {
    /// Where the cache snapshot lives
    pub snapshot_path: PathBuf,
    /// Whether a missing snapshot may be created from seed cities
    pub bootstrap: bool,
    /// Print once and exit instead of running the scheduler
    pub once: bool,
    /// Upstream endpoints and identity
    pub upstream: UpstreamConfig,
    /// Refresh intervals and thresholds
    pub refresh: RefreshConfig,
}

/// Checks that an endpoint override is an absolute http(s) URL
fn parse_endpoint(name: &'static str, value: &str) -> Result<String, CliError> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(value.to_string()),
        _ => Err(CliError::InvalidUrl {
            name,
            value: value.to_string(),
        }),
    }
}

impl StartupConfig {
    /// Creates a StartupConfig from parsed CLI arguments.
    ///
    /// # Arguments
    /// * `cli` - The parsed CLI struct
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` with defaults filled in
    /// * `Err(CliError)` if an override is invalid or the default path cannot be resolved
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let snapshot_path = match &cli.data_file {
            Some(path) => path.clone(),
            None => SnapshotStore::default_path()?,
        };

        let mut upstream = UpstreamConfig::default();
        if let Some(username) = &cli.geonames_username {
            if username.trim().is_empty() {
                return Err(CliError::EmptyUsername);
            }
            upstream.geonames_username = username.clone();
        }
        if let Some(url) = &cli.timezone_url {
            upstream.timezone_url = parse_endpoint("timezone", url)?;
        }
        if let Some(url) = &cli.forecast_url {
            upstream.forecast_url = parse_endpoint("forecast", url)?;
        }

        Ok(StartupConfig {
            snapshot_path,
            bootstrap: cli.bootstrap,
            once: cli.once,
            upstream,
            refresh: RefreshConfig::default(),
        })
    }
}
