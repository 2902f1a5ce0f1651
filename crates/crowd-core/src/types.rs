//! Domain types for crowd readings.
//!
//! Contains the entity key, the crowd level classification, the reading
//! itself and the wire payload shared by the REST API and the push channel.

use crate::error::{CoreError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Placeholder shown for a temple before any data has arrived.
pub const LOADING_PLACEHOLDER: &str = "Loading...";

/// Timestamp format the backend uses for `lastUpdated`.
pub const LAST_UPDATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Identifier of a monitored temple.
///
/// Keys are compared case-sensitively and must match the registry exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    /// Create a key without validation.
    ///
    /// Wire keys go through this path: an invalid key simply never matches
    /// the registry.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Create a key for registry use, rejecting empty or padded names.
    pub fn parse(key: &str) -> Result<Self> {
        if key.is_empty() || key.trim() != key {
            return Err(CoreError::InvalidEntityKey(key.to_string()));
        }
        Ok(Self(key.to_string()))
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Categorical occupancy classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CrowdLevel {
    Low,
    Medium,
    High,
    /// No classification available ("N/A", "Loading...", anything unrecognized).
    #[default]
    Unknown,
}

impl CrowdLevel {
    /// Parse a wire label. Never fails: unrecognized labels map to `Unknown`.
    pub fn parse(label: &str) -> Self {
        match label {
            "Low" => Self::Low,
            "Medium" => Self::Medium,
            "High" => Self::High,
            _ => Self::Unknown,
        }
    }

    /// Classify a raw people count with the backend's thresholds.
    pub fn categorize(people_count: u32) -> Self {
        match people_count {
            0..=20 => Self::Low,
            21..=40 => Self::Medium,
            _ => Self::High,
        }
    }

    /// Wire label for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Unknown => "N/A",
        }
    }
}

impl fmt::Display for CrowdLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CrowdLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CrowdLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(Self::parse(&label))
    }
}

/// Latest known state of one temple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// Temple this reading belongs to.
    pub entity: EntityKey,
    /// Number of people counted by the sensor.
    pub people_count: u32,
    /// Timestamp or human-readable string from the backend.
    pub last_updated: String,
    /// Forecast for the next hour.
    pub next_hour: CrowdLevel,
    /// Current crowd level.
    pub crowd_level: CrowdLevel,
}

impl Reading {
    /// Create a new reading.
    pub fn new(
        entity: EntityKey,
        people_count: u32,
        last_updated: impl Into<String>,
        next_hour: CrowdLevel,
        crowd_level: CrowdLevel,
    ) -> Self {
        Self {
            entity,
            people_count,
            last_updated: last_updated.into(),
            next_hour,
            crowd_level,
        }
    }

    /// Default reading shown before any source has reported.
    pub fn placeholder(entity: EntityKey) -> Self {
        Self::new(
            entity,
            0,
            LOADING_PLACEHOLDER,
            CrowdLevel::Unknown,
            CrowdLevel::Unknown,
        )
    }

    /// Whether this is still the startup placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.last_updated == LOADING_PLACEHOLDER
    }

    /// Parse `last_updated` as a backend timestamp.
    ///
    /// Returns `None` for human strings such as the loading placeholder.
    pub fn last_updated_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.last_updated, LAST_UPDATED_FORMAT).ok()
    }
}

/// Reading as exchanged on the wire.
///
/// Format: `{"temple": "TempleB", "peopleCount": 12, "lastUpdated": "...",
/// "nextHour": "Low", "crowdLevel": "Low"}`. Every field is required; a
/// negative or fractional `peopleCount` is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingPayload {
    pub temple: String,
    pub people_count: u32,
    pub last_updated: String,
    pub next_hour: String,
    pub crowd_level: String,
}

impl ReadingPayload {
    /// Decode a payload from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let payload: Self = serde_json::from_value(value)?;
        if payload.temple.is_empty() {
            return Err(CoreError::InvalidReading(
                "temple must not be empty".to_string(),
            ));
        }
        Ok(payload)
    }

    /// Convert into a typed reading.
    pub fn into_reading(self) -> Reading {
        Reading {
            entity: EntityKey::new(self.temple),
            people_count: self.people_count,
            last_updated: self.last_updated,
            next_hour: CrowdLevel::parse(&self.next_hour),
            crowd_level: CrowdLevel::parse(&self.crowd_level),
        }
    }
}

impl From<&Reading> for ReadingPayload {
    fn from(reading: &Reading) -> Self {
        Self {
            temple: reading.entity.to_string(),
            people_count: reading.people_count,
            last_updated: reading.last_updated.clone(),
            next_hour: reading.next_hour.to_string(),
            crowd_level: reading.crowd_level.to_string(),
        }
    }
}

/// Push channel connectivity as exposed to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    #[default]
    Disconnected,
    Connected,
}

impl ConnectivityState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}
