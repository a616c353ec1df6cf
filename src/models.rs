use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::datetime_from_ms;

/// Identifier of the user that owns a pin (session id or anonymous auth uid).
pub type UserId = String;

/// Owner recorded for legacy records that predate `createdBy`.
pub const UNKNOWN_OWNER: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PinId(String);

impl PinId {
    pub const TEMP_PREFIX: &'static str = "temp-";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Placeholder id for an optimistic pin: `temp-<isoTimestamp>`.
    pub fn temporary(created_at: &DateTime<Utc>) -> Self {
        Self(format!(
            "{}{}",
            Self::TEMP_PREFIX,
            created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        ))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(Self::TEMP_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PinId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PinId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinColor {
    Red,
    Blue,
    Green,
    Yellow,
    Purple,
    Orange,
}

impl PinColor {
    pub const ALL: [PinColor; 6] = [
        PinColor::Red,
        PinColor::Blue,
        PinColor::Green,
        PinColor::Yellow,
        PinColor::Purple,
        PinColor::Orange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PinColor::Red => "red",
            PinColor::Blue => "blue",
            PinColor::Green => "green",
            PinColor::Yellow => "yellow",
            PinColor::Purple => "purple",
            PinColor::Orange => "orange",
        }
    }
}

impl Default for PinColor {
    fn default() -> Self {
        PinColor::Red
    }
}

impl fmt::Display for PinColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown pin color '{0}'")]
pub struct UnknownColor(pub String);

impl FromStr for PinColor {
    type Err = UnknownColor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PinColor::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownColor(s.to_string()))
    }
}

pub fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Where a pin sits on the image. Normalized coordinates win; the pixel pair
/// is only read for legacy records that carry nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x_pct: Option<f64>,
    pub y_pct: Option<f64>,
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Build from a click at `(x, y)` pixels on an image of `width` x `height`.
    pub fn from_click(x: f64, y: f64, width: f64, height: f64) -> Self {
        let pct = |v: f64, extent: f64| if extent > 0.0 { clamp01(v / extent) } else { 0.0 };
        Self {
            x_pct: Some(pct(x, width)),
            y_pct: Some(pct(y, height)),
            x,
            y,
        }
    }

    pub fn legacy(x: f64, y: f64) -> Self {
        Self { x_pct: None, y_pct: None, x, y }
    }

    pub fn normalized(&self) -> Option<(f64, f64)> {
        match (self.x_pct, self.y_pct) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Some((x, y)),
            _ => None,
        }
    }
}

/// An active pin as the rest of the crate sees it: an immutable snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Pin {
    pub id: PinId,
    pub position: Position,
    pub color: PinColor,
    pub created_at: DateTime<Utc>,
    pub created_at_ms: i64,
    pub created_by: UserId,
}

impl Pin {
    pub fn to_record(&self) -> PinRecord {
        PinRecord {
            x_pct: self.position.x_pct,
            y_pct: self.position.y_pct,
            x: self.position.x,
            y: self.position.y,
            color: self.color,
            created_at: Some(self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            created_at_ms: Some(self.created_at_ms),
            created_by: Some(self.created_by.clone()),
        }
    }

    /// Build a pin from a backend record. `received_at_ms` stands in for the
    /// creation time of records that carry no usable timestamp at all.
    pub fn from_record(id: PinId, record: &PinRecord, received_at_ms: i64) -> Self {
        let created_at_ms = record.effective_created_at_ms().unwrap_or(received_at_ms);
        let created_at = record
            .parsed_created_at()
            .filter(|_| record.created_at_ms.is_none())
            .unwrap_or_else(|| datetime_from_ms(created_at_ms));
        Self {
            id,
            position: Position {
                x_pct: record.x_pct,
                y_pct: record.y_pct,
                x: record.x,
                y: record.y,
            },
            color: record.color,
            created_at,
            created_at_ms,
            created_by: record
                .created_by
                .clone()
                .unwrap_or_else(|| UNKNOWN_OWNER.to_string()),
        }
    }
}

/// Wire schema of a pin in the `pins` collection and the date-keyed log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_pct: Option<f64>,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    pub color: PinColor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<UserId>,
}

impl PinRecord {
    fn parsed_created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
    }

    /// `createdAtMs` when present, otherwise derived from the ISO string.
    pub fn effective_created_at_ms(&self) -> Option<i64> {
        self.created_at_ms
            .or_else(|| self.parsed_created_at().map(|d| d.timestamp_millis()))
    }

    /// UTC calendar day the record is filed under in the log collection.
    pub fn log_day(&self) -> Option<NaiveDate> {
        self.effective_created_at_ms()
            .map(|ms| datetime_from_ms(ms).date_naive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_ids_carry_iso_timestamp() {
        let at = datetime_from_ms(1_700_000_000_123);
        let id = PinId::temporary(&at);
        assert_eq!(id.as_str(), "temp-2023-11-14T22:13:20.123Z");
        assert!(id.is_temporary());
        assert!(!PinId::from("pin-0000000001").is_temporary());
    }

    #[test]
    fn click_position_is_clamped() {
        let p = Position::from_click(1200.0, -5.0, 800.0, 600.0);
        assert_eq!(p.normalized(), Some((1.0, 0.0)));
        assert_eq!(p.x, 1200.0);
    }

    #[test]
    fn color_parses_case_insensitively() {
        assert_eq!("Blue".parse::<PinColor>().unwrap(), PinColor::Blue);
        assert!("magenta".parse::<PinColor>().is_err());
    }

    #[test]
    fn record_uses_camel_case_fields() {
        let pin = Pin {
            id: PinId::from("k1"),
            position: Position::from_click(400.0, 300.0, 800.0, 600.0),
            color: PinColor::Green,
            created_at: datetime_from_ms(1_000),
            created_at_ms: 1_000,
            created_by: "alice".into(),
        };
        let json = serde_json::to_value(pin.to_record()).unwrap();
        assert_eq!(json["xPct"], 0.5);
        assert_eq!(json["createdAtMs"], 1_000);
        assert_eq!(json["createdBy"], "alice");
        assert_eq!(json["color"], "green");
    }

    #[test]
    fn legacy_record_falls_back_to_iso_and_unknown_owner() {
        let record: PinRecord = serde_json::from_value(serde_json::json!({
            "x": 12.0, "y": 34.0, "color": "red", "createdAt": "2024-05-01T10:00:00.000Z"
        }))
        .unwrap();
        let pin = Pin::from_record(PinId::from("old"), &record, 99);
        assert_eq!(pin.created_at_ms, 1_714_557_600_000);
        assert_eq!(pin.created_by, UNKNOWN_OWNER);
        assert_eq!(pin.position.normalized(), None);
        assert_eq!(record.log_day(), NaiveDate::from_ymd_opt(2024, 5, 1));
    }

    #[test]
    fn record_without_any_timestamp_uses_receive_time() {
        let record: PinRecord =
            serde_json::from_value(serde_json::json!({ "color": "blue" })).unwrap();
        let pin = Pin::from_record(PinId::from("bare"), &record, 5_000);
        assert_eq!(pin.created_at_ms, 5_000);
    }
}
