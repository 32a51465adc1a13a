//! Shared plumbing for the upstream HTTP APIs
//!
//! Both the timezone and forecast clients go through one `reqwest::Client`
//! with a fixed identity and timeout. The `Upstream` trait is the seam the
//! cache uses, so refresh logic never talks to the network directly.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use thiserror::Error;
use tracing::debug;

use super::timezone::{TimezoneClient, GEONAMES_BASE_URL, GEONAMES_USERNAME};
use super::weather::{WeatherClient, OPEN_METEO_BASE_URL};
use super::{Location, Sample};

/// Identity sent with every upstream request
const USER_AGENT: &str = concat!("citycast/", env!("CARGO_PKG_VERSION"));

/// Upper bound for a single upstream request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur when talking to an upstream API
#[derive(Debug, Error)]
pub enum FetchError {
    /// The shared HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Base URL and query parameters did not form a valid URL
    #[error("invalid request URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Transport-level failure (connect, timeout, body read)
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The API answered with something other than 200 OK
    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: StatusCode },

    /// The API answered 200 but reported an error in its payload
    #[error("API error from {url}: {message}")]
    Api { url: String, message: String },

    /// Response body was not the JSON we expected
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// A timestamp did not match the expected layout
    #[error("invalid time value '{value}' in response from {url}")]
    InvalidTimeFormat { url: String, value: String },

    /// The API declared a time unit we do not parse
    #[error("unsupported time format '{format}' in response from {url}")]
    UnsupportedTimeFormat { url: String, format: String },

    /// Parallel hourly arrays disagree on length
    #[error("hourly series from {url} have mismatched lengths ({times} times, {temperatures} temperatures)")]
    MismatchedSeries {
        url: String,
        times: usize,
        temperatures: usize,
    },

    /// Hourly timestamps are not strictly increasing
    #[error("hourly timestamps from {url} are not strictly increasing")]
    UnorderedSeries { url: String },
}

impl FetchError {
    /// Whether the failure came from parsing a response rather than from the transport
    pub fn is_parse(&self) -> bool {
        matches!(
            self,
            FetchError::Decode { .. }
                | FetchError::InvalidTimeFormat { .. }
                | FetchError::UnsupportedTimeFormat { .. }
                | FetchError::MismatchedSeries { .. }
                | FetchError::UnorderedSeries { .. }
        )
    }

    /// The request URL this error relates to, if one was built
    pub fn url(&self) -> Option<&str> {
        match self {
            FetchError::Client(_) => None,
            FetchError::InvalidUrl { url, .. }
            | FetchError::Request { url, .. }
            | FetchError::Status { url, .. }
            | FetchError::Api { url, .. }
            | FetchError::Decode { url, .. }
            | FetchError::InvalidTimeFormat { url, .. }
            | FetchError::UnsupportedTimeFormat { url, .. }
            | FetchError::MismatchedSeries { url, .. }
            | FetchError::UnorderedSeries { url } => Some(url.as_str()),
        }
    }
}

/// Source of fresh per-city data
///
/// Implementations must not touch the cache; they only translate a location
/// into values, which lets fetches for different cities run side by side.
pub trait Upstream: Send + Sync {
    /// Current UTC offset for the location, in whole hours
    fn fetch_offset(
        &self,
        location: &Location,
    ) -> impl Future<Output = Result<i32, FetchError>> + Send;

    /// Hourly temperature forecast for the location
    fn fetch_forecast(
        &self,
        location: &Location,
    ) -> impl Future<Output = Result<Vec<Sample>, FetchError>> + Send;
}

/// Endpoints and identity used by the HTTP clients
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// GeoNames `timezoneJSON` endpoint
    pub timezone_url: String,
    /// GeoNames account name sent as `username`
    pub geonames_username: String,
    /// Open-Meteo forecast endpoint
    pub forecast_url: String,
    /// Request timeout applied to every call
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timezone_url: GEONAMES_BASE_URL.to_string(),
            geonames_username: GEONAMES_USERNAME.to_string(),
            forecast_url: OPEN_METEO_BASE_URL.to_string(),
            timeout: REQUEST_TIMEOUT,
        }
    }
}

/// `Upstream` backed by the real GeoNames and Open-Meteo APIs
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    timezone: TimezoneClient,
    weather: WeatherClient,
}

impl HttpUpstream {
    /// Creates both clients on top of one shared HTTP client
    pub fn new(config: &UpstreamConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            timezone: TimezoneClient::with_client(client.clone())
                .with_base_url(&config.timezone_url)
                .with_username(&config.geonames_username),
            weather: WeatherClient::with_client(client).with_base_url(&config.forecast_url),
        })
    }
}

impl Upstream for HttpUpstream {
    async fn fetch_offset(&self, location: &Location) -> Result<i32, FetchError> {
        self.timezone
            .fetch_offset(location.latitude, location.longitude)
            .await
    }

    async fn fetch_forecast(&self, location: &Location) -> Result<Vec<Sample>, FetchError> {
        self.weather
            .fetch_hourly(location.latitude, location.longitude)
            .await
    }
}

/// Builds `base?key=value&...` with proper query encoding
pub(crate) fn build_url(base: &str, params: &[(&str, String)]) -> Result<String, FetchError> {
    Url::parse_with_params(base, params)
        .map(String::from)
        .map_err(|e| FetchError::InvalidUrl {
            url: base.to_string(),
            reason: e.to_string(),
        })
}

/// Formats a coordinate the way both APIs are queried
pub(crate) fn format_coordinate(value: f64) -> String {
    format!("{:.4}", value)
}

/// Issues a GET and returns the body of a 200 response
pub(crate) async fn get_body(client: &Client, url: &str) -> Result<String, FetchError> {
    debug!(url, "requesting upstream");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(FetchError::Status {
            url: url.to_string(),
            status,
        });
    }

    response.text().await.map_err(|source| FetchError::Request {
        url: url.to_string(),
        source,
    })
}
