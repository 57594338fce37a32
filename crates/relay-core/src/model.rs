use serde::{Deserialize, Serialize};

/// One weather reading as published by the producer and accepted by the
/// ingestion API.
///
/// Optional readings are `None` when the producer had no value for them. They
/// are left out of the serialized form entirely so that absence survives a
/// decode/encode pass instead of turning into `0` or `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub source: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: String,
    pub temperature_c: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_speed_m_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precipitation_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_description: Option<String>,
}

impl Observation {
    pub fn present_optional_fields(&self) -> Vec<&'static str> {
        let mut present = Vec::new();
        if self.humidity.is_some() {
            present.push("humidity");
        }
        if self.wind_speed_m_s.is_some() {
            present.push("wind_speed_m_s");
        }
        if self.weather_code.is_some() {
            present.push("weather_code");
        }
        if self.precipitation_probability.is_some() {
            present.push("precipitation_probability");
        }
        if self.weather_description.is_some() {
            present.push("weather_description");
        }
        present
    }
}
