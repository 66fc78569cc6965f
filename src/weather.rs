//! Current temperature lookup and unit conversion.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::{Interrupted, RequestContext};

#[derive(thiserror::Error, Debug)]
pub enum WeatherError {
    #[error("weather request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("weather api returned status {0}")]
    Status(u16),

    #[error("malformed weather payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("weather lookup timed out")]
    Timeout,

    #[error("weather lookup cancelled")]
    Cancelled,
}

impl From<Interrupted> for WeatherError {
    fn from(i: Interrupted) -> Self {
        match i {
            Interrupted::DeadlineExceeded => WeatherError::Timeout,
            Interrupted::Cancelled => WeatherError::Cancelled,
        }
    }
}

/// A temperature in the three units the service reports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    #[serde(rename = "temp_C")]
    pub celsius: f64,
    #[serde(rename = "temp_F")]
    pub fahrenheit: f64,
    #[serde(rename = "temp_K")]
    pub kelvin: f64,
}

impl Temperature {
    pub fn from_celsius(celsius: f64) -> Self {
        Self {
            celsius,
            fahrenheit: celsius * 1.8 + 32.0,
            kelvin: celsius + 273.15,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WeatherApiResponse {
    current: Current,
}

#[derive(Debug, Deserialize)]
struct Current {
    temp_c: f64,
}

/// Client for the WeatherAPI `current.json` endpoint.
#[derive(Debug, Clone)]
pub struct WeatherClient {
    url: String,
    api_key: String,
    http: reqwest::Client,
}

impl WeatherClient {
    /// `url` is the full endpoint, e.g. `http://api.weatherapi.com/v1/current.json`.
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            http,
        }
    }

    /// Current temperature in Celsius for `city`, bounded by `ctx`.
    pub async fn current_celsius(
        &self,
        city: &str,
        ctx: &RequestContext,
    ) -> Result<f64, WeatherError> {
        debug!(city, "looking up temperature");
        ctx.run(self.fetch(city)).await?
    }

    async fn fetch(&self, city: &str) -> Result<f64, WeatherError> {
        let resp = self
            .http
            .get(&self.url)
            .query(&[("key", self.api_key.as_str()), ("q", city), ("aqi", "no")])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(WeatherError::Status(status.as_u16()));
        }

        let body = resp.bytes().await?;
        let parsed: WeatherApiResponse = serde_json::from_slice(&body)?;
        Ok(parsed.current.temp_c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn converts_celsius() {
        for (c, f, k) in [(0.0, 32.0, 273.15), (100.0, 212.0, 373.15), (-10.0, 14.0, 263.15)] {
            let t = Temperature::from_celsius(c);
            assert!(close(t.fahrenheit, f), "{c}C -> {}F", t.fahrenheit);
            assert!(close(t.kelvin, k), "{c}C -> {}K", t.kelvin);
        }
    }

    #[test]
    fn serializes_with_unit_suffixed_keys() {
        let json = serde_json::to_value(Temperature::from_celsius(22.0)).unwrap();
        assert_eq!(json["temp_C"], 22.0);
        assert!(close(json["temp_F"].as_f64().unwrap(), 71.6));
        assert!(close(json["temp_K"].as_f64().unwrap(), 295.15));
    }
}
