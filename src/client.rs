//! Blocking HTTP client for the city directory and the OpenWeatherMap day summary.
//!
//! - Uses `ureq` (no async).
//! - Returns response bodies untouched; they are stored as raw blobs and parsed by the refiner.

use crate::error::FetchError;
use chrono::NaiveDate;
use http::StatusCode;
use std::time::Duration;

pub struct WeatherClient {
    agent: ureq::Agent,
    cities_url: String,
    weather_url: String,
    api_key: String,
}

impl WeatherClient {
    pub fn new(
        cities_url: impl Into<String>,
        weather_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        WeatherClient {
            agent,
            cities_url: cities_url.into(),
            weather_url: weather_url.into(),
            api_key: api_key.into(),
        }
    }

    /// The full city directory as served.
    pub fn get_cities(&self) -> Result<Vec<u8>, FetchError> {
        self.get_bytes(&self.cities_url, &[])
    }

    /// Daily aggregate for one coordinate pair, metric units.
    pub fn get_day_summary(&self, lat: f64, lon: f64, date: NaiveDate) -> Result<Vec<u8>, FetchError> {
        let (lat, lon, date) = (lat.to_string(), lon.to_string(), date.to_string());
        self.get_bytes(
            &self.weather_url,
            &[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("date", date.as_str()),
                ("units", "metric"),
                ("appid", self.api_key.as_str()),
            ],
        )
    }

    fn get_bytes(&self, url: &str, query: &[(&str, &str)]) -> Result<Vec<u8>, FetchError> {
        let mut req = self.agent.get(url).header("Accept", "application/json");
        for (k, v) in query {
            req = req.query(*k, *v);
        }

        let mut resp = req.call().map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;
        if resp.status() != StatusCode::OK {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: resp.status(),
            });
        }
        resp.body_mut().read_to_vec().map_err(|source| FetchError::Body {
            url: url.to_string(),
            source,
        })
    }
}

/// The two upstream calls the extract stage makes.
pub trait WeatherApi {
    fn get_cities(&self) -> Result<Vec<u8>, FetchError>;
    fn get_day_summary(&self, lat: f64, lon: f64, date: NaiveDate) -> Result<Vec<u8>, FetchError>;
}

impl WeatherApi for WeatherClient {
    fn get_cities(&self) -> Result<Vec<u8>, FetchError> {
        WeatherClient::get_cities(self)
    }

    fn get_day_summary(&self, lat: f64, lon: f64, date: NaiveDate) -> Result<Vec<u8>, FetchError> {
        WeatherClient::get_day_summary(self, lat, lon, date)
    }
}
