//! Sensor payload codecs
//!
//! The gateway publishes either a JSON report to `mailbox/{device_id}/sensors`
//! or the legacy `"<lux>.<proximity>"` text to `swiftmail/sensors`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReadingError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("payload is empty")]
    Empty,
    #[error("expected '<lux>.<proximity>', got '{0}'")]
    Malformed(String),
    #[error("invalid {field} value '{value}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("invalid gateway report: {0}")]
    Json(String),
}

/// One light/proximity sample; either half may be missing
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub lux: Option<f64>,
    pub proximity: Option<i64>,
}

impl SensorReading {
    pub fn new(lux: f64, proximity: i64) -> Self {
        Self {
            lux: Some(lux),
            proximity: Some(proximity),
        }
    }

    /// Parse either payload form; JSON is recognised by a leading `{`
    pub fn parse(payload: &[u8]) -> Result<Self, ReadingError> {
        let text = std::str::from_utf8(payload).map_err(|_| ReadingError::NotUtf8)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ReadingError::Empty);
        }

        if text.starts_with('{') {
            let report: GatewayReport =
                serde_json::from_str(text).map_err(|e| ReadingError::Json(e.to_string()))?;
            Ok(report.reading())
        } else {
            Self::parse_legacy(text)
        }
    }

    /// `"<lux>.<proximity>"`, split at the last `.` so fractional lux survives
    pub fn parse_legacy(text: &str) -> Result<Self, ReadingError> {
        let (lux, proximity) = text
            .rsplit_once('.')
            .ok_or_else(|| ReadingError::Malformed(text.to_string()))?;

        let lux: f64 = lux.parse().map_err(|_| ReadingError::InvalidNumber {
            field: "lux",
            value: lux.to_string(),
        })?;
        if !lux.is_finite() {
            return Err(ReadingError::InvalidNumber {
                field: "lux",
                value: lux.to_string(),
            });
        }
        let proximity: i64 = proximity.parse().map_err(|_| ReadingError::InvalidNumber {
            field: "proximity",
            value: proximity.to_string(),
        })?;

        Ok(Self::new(lux, proximity))
    }

    /// Legacy text form; `None` unless both values are present
    pub fn to_legacy(&self) -> Option<String> {
        match (self.lux, self.proximity) {
            (Some(lux), Some(proximity)) => Some(format!("{lux:.3}.{proximity}")),
            _ => None,
        }
    }
}

/// Thresholds as reported by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportThresholds {
    pub proximity_mail_threshold_mm: i64,
    pub lux_open_threshold: f64,
}

/// JSON document the gateway publishes every sampling period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayReport {
    pub device_id: String,
    pub timestamp: NaiveDateTime,
    pub proximity_mm: Option<i64>,
    pub lux: Option<f64>,
    pub has_mail: bool,
    pub is_open: bool,
    pub state_changed: bool,
    pub last_mail_detected: Option<NaiveDateTime>,
    pub last_opened: Option<NaiveDateTime>,
    pub thresholds: ReportThresholds,
}

impl GatewayReport {
    pub fn reading(&self) -> SensorReading {
        SensorReading {
            lux: self.lux,
            proximity: self.proximity_mm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GATEWAY_JSON: &str = r#"{
        "device_id": "mailbox_01",
        "timestamp": "2024-11-02T14:03:27.512345",
        "proximity_mm": 2450,
        "lux": 3.5,
        "has_mail": true,
        "is_open": false,
        "state_changed": true,
        "last_mail_detected": "2024-11-02T14:03:27.512001",
        "last_opened": null,
        "thresholds": {"proximity_mail_threshold_mm": 2000, "lux_open_threshold": 500}
    }"#;

    #[test]
    fn test_parse_legacy_with_fractional_lux() {
        let reading = SensorReading::parse(b"12.345.8001").unwrap();
        assert_eq!(reading.lux, Some(12.345));
        assert_eq!(reading.proximity, Some(8001));
    }

    #[test]
    fn test_parse_legacy_integer_lux() {
        let reading = SensorReading::parse(b"19.120").unwrap();
        assert_eq!(reading, SensorReading::new(19.0, 120));
    }

    #[test]
    fn test_parse_legacy_trims_whitespace() {
        let reading = SensorReading::parse(b" 4.250.9000\n").unwrap();
        assert_eq!(reading, SensorReading::new(4.25, 9000));
    }

    #[test]
    fn test_parse_legacy_errors() {
        assert_eq!(SensorReading::parse(b""), Err(ReadingError::Empty));
        assert_eq!(SensorReading::parse(&[0xff, 0x2e, 0x31]), Err(ReadingError::NotUtf8));
        assert!(matches!(
            SensorReading::parse(b"8001"),
            Err(ReadingError::Malformed(_))
        ));
        assert!(matches!(
            SensorReading::parse(b"dark.8001"),
            Err(ReadingError::InvalidNumber { field: "lux", .. })
        ));
        assert!(matches!(
            SensorReading::parse(b"12.5.near"),
            Err(ReadingError::InvalidNumber {
                field: "proximity",
                ..
            })
        ));
        assert!(matches!(
            SensorReading::parse(b"inf.5"),
            Err(ReadingError::InvalidNumber { field: "lux", .. })
        ));
    }

    #[test]
    fn test_parse_gateway_report() {
        let reading = SensorReading::parse(GATEWAY_JSON.as_bytes()).unwrap();
        assert_eq!(reading, SensorReading::new(3.5, 2450));

        let report: GatewayReport = serde_json::from_str(GATEWAY_JSON).unwrap();
        assert_eq!(report.device_id, "mailbox_01");
        assert!(report.has_mail);
        assert_eq!(report.last_opened, None);
        assert_eq!(report.thresholds.proximity_mail_threshold_mm, 2000);
    }

    #[test]
    fn test_parse_gateway_report_with_missing_sensor() {
        let json = GATEWAY_JSON.replace("\"lux\": 3.5", "\"lux\": null");
        let reading = SensorReading::parse(json.as_bytes()).unwrap();
        assert_eq!(reading.lux, None);
        assert_eq!(reading.proximity, Some(2450));
    }

    #[test]
    fn test_parse_broken_json() {
        assert!(matches!(
            SensorReading::parse(b"{\"lux\": 3"),
            Err(ReadingError::Json(_))
        ));
    }

    #[test]
    fn test_to_legacy() {
        assert_eq!(
            SensorReading::new(12.3456, 8001).to_legacy().as_deref(),
            Some("12.346.8001")
        );
        let partial = SensorReading {
            lux: None,
            proximity: Some(1),
        };
        assert_eq!(partial.to_legacy(), None);
    }
}
