//! Core point types for VoltageEMS
//!
//! Protocol drivers report point values as [`PointUpdate`]s; the core writes
//! them into the collector hash `comsrv:{channel}:{type}`.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Four Remote Point Types
// ============================================================================

/// Four Remote Point Types used in industrial SCADA systems
///
/// - T (Telemetry): Analog measurements (YC)
/// - S (Signal): Digital status (YX)
/// - C (Control): Digital commands (YK)
/// - A (Adjustment): Analog setpoints (YT)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointType {
    #[serde(rename = "T", alias = "YC", alias = "yc", alias = "telemetry")]
    Telemetry,

    #[serde(rename = "S", alias = "YX", alias = "yx", alias = "signal")]
    Signal,

    #[serde(rename = "C", alias = "YK", alias = "yk", alias = "control")]
    Control,

    #[serde(
        rename = "A",
        alias = "YT",
        alias = "yt",
        alias = "adjustment",
        alias = "setpoint"
    )]
    Adjustment,
}

impl PointType {
    /// Convert to key suffix
    ///
    /// # Examples
    /// ```
    /// # use voltage_model::PointType;
    /// assert_eq!(PointType::Telemetry.as_str(), "T");
    /// assert_eq!(PointType::Signal.as_str(), "S");
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            PointType::Telemetry => "T",
            PointType::Signal => "S",
            PointType::Control => "C",
            PointType::Adjustment => "A",
        }
    }

    /// Check if this is a measurement type (T or S)
    pub fn is_measurement(&self) -> bool {
        matches!(self, PointType::Telemetry | PointType::Signal)
    }
}

impl fmt::Display for PointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PointType {
    type Err = crate::ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "T" | "t" | "YC" | "yc" => Ok(PointType::Telemetry),
            "S" | "s" | "YX" | "yx" => Ok(PointType::Signal),
            "C" | "c" | "YK" | "yk" => Ok(PointType::Control),
            "A" | "a" | "YT" | "yt" => Ok(PointType::Adjustment),
            _ => Err(crate::ModelError::InvalidPointType(s.to_string())),
        }
    }
}

// ============================================================================
// Point updates
// ============================================================================

/// One value reported by a protocol driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointUpdate {
    pub channel_id: u32,
    pub telemetry_type: PointType,
    pub point_id: u32,
    pub value: f64,
    /// Milliseconds since epoch; the store clock is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl PointUpdate {
    /// Hash field holding the value
    pub fn value_field(&self) -> String {
        self.point_id.to_string()
    }

    /// Hash field holding the timestamp
    pub fn ts_field(&self) -> String {
        format!("{}:ts", self.point_id)
    }
}
