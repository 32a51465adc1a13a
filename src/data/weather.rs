//! Open-Meteo weather API client
//!
//! This module fetches hourly temperature forecasts from the Open-Meteo API
//! and parses them into `Sample` series.

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::upstream::{build_url, format_coordinate, get_body, FetchError};
use super::{is_strictly_increasing, Sample};

/// Base URL for the Open-Meteo API
pub const OPEN_METEO_BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Layout of hourly timestamps (local time without zone suffix)
const HOURLY_TIME_LAYOUT: &str = "%Y-%m-%dT%H:%M";

/// The only `hourly_units.time` value we know how to parse
const ISO8601_UNIT: &str = "iso8601";

/// Client for fetching hourly forecasts from Open-Meteo API
#[derive(Debug, Clone)]
pub struct WeatherClient {
    client: Client,
    base_url: String,
}

impl WeatherClient {
    /// Create a WeatherClient on top of a configured HTTP client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            base_url: OPEN_METEO_BASE_URL.to_string(),
        }
    }

    /// Point the client at a different forecast endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build the request URL for the given coordinates
    pub fn forecast_url(&self, lat: f64, lon: f64) -> Result<String, FetchError> {
        build_url(
            &self.base_url,
            &[
                ("latitude", format_coordinate(lat)),
                ("longitude", format_coordinate(lon)),
                ("hourly", "temperature_2m".to_string()),
            ],
        )
    }

    /// Fetch the hourly temperature forecast for the given coordinates
    ///
    /// # Arguments
    /// * `lat` - Latitude coordinate
    /// * `lon` - Longitude coordinate
    ///
    /// # Returns
    /// * `Ok(Vec<Sample>)` - Forecast samples in chronological order
    /// * `Err(FetchError)` - If the request, status check or parsing fails
    pub async fn fetch_hourly(&self, lat: f64, lon: f64) -> Result<Vec<Sample>, FetchError> {
        let url = self.forecast_url(lat, lon)?;
        let text = get_body(&self.client, &url).await?;
        parse_forecast(&text, &url)
    }
}

/// Parse an Open-Meteo response body into forecast samples
pub(crate) fn parse_forecast(body: &str, url: &str) -> Result<Vec<Sample>, FetchError> {
    let response: OpenMeteoResponse =
        serde_json::from_str(body).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })?;

    if let Some(units) = &response.hourly_units {
        if units.time != ISO8601_UNIT {
            return Err(FetchError::UnsupportedTimeFormat {
                url: url.to_string(),
                format: units.time.clone(),
            });
        }
    }

    let hourly = response.hourly;
    if hourly.time.len() != hourly.temperature_2m.len() {
        return Err(FetchError::MismatchedSeries {
            url: url.to_string(),
            times: hourly.time.len(),
            temperatures: hourly.temperature_2m.len(),
        });
    }

    let mut samples = Vec::with_capacity(hourly.time.len());
    for (raw, temperature) in hourly.time.iter().zip(hourly.temperature_2m) {
        let time = parse_datetime(raw).ok_or_else(|| FetchError::InvalidTimeFormat {
            url: url.to_string(),
            value: raw.clone(),
        })?;
        samples.push(Sample::new(time, temperature));
    }

    if !is_strictly_increasing(&samples) {
        return Err(FetchError::UnorderedSeries {
            url: url.to_string(),
        });
    }

    Ok(samples)
}

/// Parse a datetime string in ISO 8601 format (e.g., "2024-07-15T05:30") as UTC
fn parse_datetime(datetime_str: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(datetime_str, HOURLY_TIME_LAYOUT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Open-Meteo API response structure
#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    hourly: HourlyWeather,
    hourly_units: Option<HourlyUnits>,
}

/// Hourly weather data from Open-Meteo
#[derive(Debug, Deserialize)]
struct HourlyWeather {
    time: Vec<String>,
    temperature_2m: Vec<f64>,
}

/// Units declared for the hourly arrays
#[derive(Debug, Deserialize)]
struct HourlyUnits {
    time: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const URL: &str = "https://api.open-meteo.com/v1/forecast?latitude=48.8500";

    /// Sample valid Open-Meteo API response
    const VALID_RESPONSE: &str = r#"{
        "latitude": 48.86,
        "longitude": 2.3399997,
        "generationtime_ms": 0.04,
        "utc_offset_seconds": 0,
        "timezone": "GMT",
        "timezone_abbreviation": "GMT",
        "elevation": 43.0,
        "hourly_units": {
            "time": "iso8601",
            "temperature_2m": "°C"
        },
        "hourly": {
            "time": ["2024-01-01T10:00", "2024-01-01T11:00", "2024-01-01T12:00"],
            "temperature_2m": [5.0, 6.0, 6.4]
        }
    }"#;

    #[test]
    fn test_parse_valid_response() {
        let samples = parse_forecast(VALID_RESPONSE, URL).expect("Failed to parse forecast");

        assert_eq!(samples.len(), 3);
        assert_eq!(
            samples[0].time,
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
        );
        assert!((samples[0].temperature - 5.0).abs() < 0.01);
        assert_eq!(
            samples[2].time,
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
        );
        assert!((samples[2].temperature - 6.4).abs() < 0.01);
    }

    #[test]
    fn test_parse_without_units_is_accepted() {
        let body = r#"{"hourly": {"time": ["2024-01-01T10:00"], "temperature_2m": [1.5]}}"#;
        let samples = parse_forecast(body, URL).expect("Failed to parse forecast");
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn test_parse_rejects_unsupported_time_unit() {
        let body = r#"{
            "hourly_units": {"time": "unixtime"},
            "hourly": {"time": ["1704103200"], "temperature_2m": [1.5]}
        }"#;
        let err = parse_forecast(body, URL).unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedTimeFormat { ref format, .. } if format == "unixtime"));
        assert!(err.is_parse());
    }

    #[test]
    fn test_parse_rejects_time_with_zone_suffix() {
        let body = r#"{"hourly": {"time": ["2024-01-01T10:00Z"], "temperature_2m": [1.5]}}"#;
        let err = parse_forecast(body, URL).unwrap_err();
        assert!(matches!(err, FetchError::InvalidTimeFormat { ref value, .. } if value == "2024-01-01T10:00Z"));
        assert_eq!(err.url(), Some(URL));
    }

    #[test]
    fn test_parse_rejects_mismatched_lengths() {
        let body = r#"{"hourly": {"time": ["2024-01-01T10:00", "2024-01-01T11:00"], "temperature_2m": [1.5]}}"#;
        let err = parse_forecast(body, URL).unwrap_err();
        assert!(matches!(
            err,
            FetchError::MismatchedSeries {
                times: 2,
                temperatures: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_rejects_unordered_times() {
        let body = r#"{"hourly": {"time": ["2024-01-01T11:00", "2024-01-01T10:00"], "temperature_2m": [1.5, 2.5]}}"#;
        let err = parse_forecast(body, URL).unwrap_err();
        assert!(matches!(err, FetchError::UnorderedSeries { .. }));
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        let err = parse_forecast("{\"hourly\": ", URL).unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
        assert!(err.is_parse());
    }

    #[test]
    fn test_parse_datetime() {
        let time = parse_datetime("2024-07-15T05:30").expect("Failed to parse time");
        assert_eq!(time, Utc.with_ymd_and_hms(2024, 7, 15, 5, 30, 0).unwrap());

        assert!(parse_datetime("2024-07-15 05:30").is_none());
        assert!(parse_datetime("not a time").is_none());
    }

    #[test]
    fn test_forecast_url_requests_hourly_temperature() {
        let client = WeatherClient::with_client(Client::new());
        let url = client.forecast_url(48.85, 2.35).unwrap();
        assert_eq!(
            url,
            "https://api.open-meteo.com/v1/forecast?latitude=48.8500&longitude=2.3500&hourly=temperature_2m"
        );
    }

    #[test]
    fn test_with_base_url_overrides_endpoint() {
        let client = WeatherClient::with_client(Client::new()).with_base_url("http://localhost:9000/v1/forecast");
        let url = client.forecast_url(0.0, 0.0).unwrap();
        assert!(url.starts_with("http://localhost:9000/v1/forecast?"));
    }
}
