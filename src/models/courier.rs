use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type CourierId = u64;

/// Longitude first, matching the order geosets store members in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub longitude: f64,
    pub latitude: f64,
}

impl Coordinate {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CourierStatus {
    Offline,
    Available,
    Busy,
}

impl CourierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourierStatus::Offline => "offline",
            CourierStatus::Available => "available",
            CourierStatus::Busy => "busy",
        }
    }
}

impl fmt::Display for CourierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CourierStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline" => Ok(CourierStatus::Offline),
            "available" => Ok(CourierStatus::Available),
            "busy" => Ok(CourierStatus::Busy),
            other => Err(format!(
                "unknown courier status: {other}, expected offline/available/busy"
            )),
        }
    }
}

/// Read model of a courier as seen by the geo-index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierLocation {
    pub courier_id: CourierId,
    pub status: CourierStatus,
    /// Present only while the courier is a member of a geoset.
    pub coordinate: Option<Coordinate>,
    pub updated_at: DateTime<Utc>,
}
