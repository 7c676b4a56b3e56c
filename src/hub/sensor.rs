use crate::error::SensorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Latest measurement from one bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub bin_id: String,
    /// Percent full, 0..=100
    pub fill_level: f32,
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    pub received_at: DateTime<Utc>,
}

impl SensorReading {
    /// Same measurement, ignoring when it arrived
    pub fn same_measurement(&self, other: &SensorReading) -> bool {
        self.bin_id == other.bin_id
            && self.fill_level == other.fill_level
            && self.temperature == other.temperature
            && self.humidity == other.humidity
    }
}

/// Sensor ingestion body as sent by bin hardware
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SensorPayload {
    #[serde(default, alias = "sensor_id")]
    pub bin_id: Option<String>,
    #[serde(default, alias = "bin_level", alias = "level")]
    pub fill_level: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
}

fn malformed(details: impl Into<String>) -> SensorError {
    SensorError::MalformedSensorReading {
        details: details.into(),
    }
}

impl SensorPayload {
    /// Parse an arbitrary JSON body
    pub fn from_json(value: serde_json::Value) -> Result<Self, SensorError> {
        serde_json::from_value(value).map_err(|e| malformed(e.to_string()))
    }

    /// Parse a raw request body; anything that is not a JSON object is malformed
    pub fn from_slice(body: &[u8]) -> Result<Self, SensorError> {
        serde_json::from_slice(body).map_err(|e| malformed(e.to_string()))
    }

    /// Validate into a reading stamped with the current time
    pub fn into_reading(self) -> Result<SensorReading, SensorError> {
        let bin_id = self
            .bin_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| malformed("bin_id is required"))?;

        let fill_level = self
            .fill_level
            .ok_or_else(|| malformed("fill_level is required"))?;
        if !fill_level.is_finite() || !(0.0..=100.0).contains(&fill_level) {
            return Err(malformed(format!(
                "fill_level must be within [0, 100], got {}",
                fill_level
            )));
        }

        if let Some(temperature) = self.temperature {
            if !temperature.is_finite() {
                return Err(malformed("temperature must be a finite number"));
            }
        }

        if let Some(humidity) = self.humidity {
            if !humidity.is_finite() || !(0.0..=100.0).contains(&humidity) {
                return Err(malformed(format!(
                    "humidity must be within [0, 100], got {}",
                    humidity
                )));
            }
        }

        Ok(SensorReading {
            bin_id,
            fill_level: fill_level as f32,
            temperature: self.temperature.map(|t| t as f32),
            humidity: self.humidity.map(|h| h as f32),
            received_at: Utc::now(),
        })
    }
}

/// Fill status of a bin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinLevel {
    Normal,
    Warning,
    Full,
}

impl BinLevel {
    pub fn from_fill(fill_level: f32, warning_level: f32, full_level: f32) -> Self {
        if fill_level >= full_level {
            BinLevel::Full
        } else if fill_level >= warning_level {
            BinLevel::Warning
        } else {
            BinLevel::Normal
        }
    }
}

impl fmt::Display for BinLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinLevel::Normal => f.write_str("normal"),
            BinLevel::Warning => f.write_str("warning"),
            BinLevel::Full => f.write_str("full"),
        }
    }
}

/// Latest reading for a bin with its derived level
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinStatus {
    pub bin_id: String,
    pub fill_level: f32,
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    pub status: BinLevel,
    pub last_updated: DateTime<Utc>,
}

impl BinStatus {
    pub fn from_reading(reading: &SensorReading, status: BinLevel) -> Self {
        Self {
            bin_id: reading.bin_id.clone(),
            fill_level: reading.fill_level,
            temperature: reading.temperature,
            humidity: reading.humidity,
            status,
            last_updated: reading.received_at,
        }
    }
}
