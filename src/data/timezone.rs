//! GeoNames timezone API client
//!
//! Looks up the current UTC offset (daylight saving included) for a pair of
//! coordinates.

use reqwest::Client;
use serde::Deserialize;

use super::upstream::{build_url, format_coordinate, get_body, FetchError};

/// Base URL for the GeoNames timezone lookup
pub const GEONAMES_BASE_URL: &str = "http://api.geonames.org/timezoneJSON";

/// Account name the lookups are made under
pub const GEONAMES_USERNAME: &str = "amazing.website";

/// Client for fetching UTC offsets from GeoNames
#[derive(Debug, Clone)]
pub struct TimezoneClient {
    client: Client,
    base_url: String,
    username: String,
}

impl TimezoneClient {
    /// Wraps an existing HTTP client; the caller owns its timeout and identity
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            base_url: GEONAMES_BASE_URL.to_string(),
            username: GEONAMES_USERNAME.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn timezone_url(&self, lat: f64, lon: f64) -> Result<String, FetchError> {
        build_url(
            &self.base_url,
            &[
                ("lat", format_coordinate(lat)),
                ("lng", format_coordinate(lon)),
                ("username", self.username.clone()),
            ],
        )
    }

    /// Fetch the current offset from UTC, in whole hours
    pub async fn fetch_offset(&self, lat: f64, lon: f64) -> Result<i32, FetchError> {
        let url = self.timezone_url(lat, lon)?;
        let text = get_body(&self.client, &url).await?;
        parse_offset(&text, &url)
    }
}

/// Parse a GeoNames `timezoneJSON` body into an hour offset
///
/// GeoNames answers quota and account problems with HTTP 200 and a `status`
/// object instead of the offset fields. Fractional offsets (e.g. 5.5) are
/// truncated toward zero.
pub(crate) fn parse_offset(body: &str, url: &str) -> Result<i32, FetchError> {
    let response: GeoNamesResponse =
        serde_json::from_str(body).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })?;

    if let Some(status) = response.status {
        return Err(FetchError::Api {
            url: url.to_string(),
            message: status.message,
        });
    }

    match response.dst_offset {
        Some(offset) => Ok(offset.trunc() as i32),
        None => Err(FetchError::Api {
            url: url.to_string(),
            message: "response has no dstOffset".to_string(),
        }),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeoNamesResponse {
    dst_offset: Option<f64>,
    status: Option<GeoNamesStatus>,
}

#[derive(Debug, Deserialize)]
struct GeoNamesStatus {
    message: String,
}
