//! Mailbox state tracking
//!
//! Turns a stream of sensor readings into edge-triggered events: the door
//! events fire only when the door state flips, mail delivery only on the
//! rising edge of the proximity signal.

use super::reading::{GatewayReport, ReportThresholds, SensorReading};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LUX_OPEN_THRESHOLD: f64 = 18.0;
pub const DEFAULT_PROXIMITY_MAIL_THRESHOLD: i64 = 8000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Door counts as open above this light level
    pub lux_open: f64,
    /// Mail counts as present above this proximity value
    pub proximity_mail: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            lux_open: DEFAULT_LUX_OPEN_THRESHOLD,
            proximity_mail: DEFAULT_PROXIMITY_MAIL_THRESHOLD,
        }
    }
}

impl Thresholds {
    /// Fractional lux is dropped before comparing
    pub fn door_open(&self, lux: f64) -> bool {
        lux.trunc() > self.lux_open
    }

    pub fn has_mail(&self, proximity: i64) -> bool {
        proximity > self.proximity_mail
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MailboxEvent {
    DoorOpened { at: DateTime<Utc> },
    DoorClosed { at: DateTime<Utc> },
    MailDelivered { at: DateTime<Utc> },
    MailCollected { at: DateTime<Utc> },
}

impl MailboxEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MailboxEvent::DoorOpened { .. } => "door_opened",
            MailboxEvent::DoorClosed { .. } => "door_closed",
            MailboxEvent::MailDelivered { .. } => "mail_delivered",
            MailboxEvent::MailCollected { .. } => "mail_collected",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MailboxState {
    pub is_open: bool,
    pub has_mail: bool,
    pub last_delivery: Option<DateTime<Utc>>,
    pub last_opened: Option<DateTime<Utc>>,
}

/// Mailbox starts closed and empty
#[derive(Debug, Clone, Default)]
pub struct MailboxMonitor {
    thresholds: Thresholds,
    state: MailboxState,
}

impl MailboxMonitor {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            state: MailboxState::default(),
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn state(&self) -> MailboxState {
        self.state
    }

    /// Fold one reading into the state and return the edges it produced
    pub fn apply(&mut self, reading: &SensorReading, at: DateTime<Utc>) -> Vec<MailboxEvent> {
        let mut events = Vec::new();

        if let Some(lux) = reading.lux {
            let open = self.thresholds.door_open(lux);
            if open != self.state.is_open {
                self.state.is_open = open;
                if open {
                    self.state.last_opened = Some(at);
                    events.push(MailboxEvent::DoorOpened { at });
                } else {
                    events.push(MailboxEvent::DoorClosed { at });
                }
            }
        }

        if let Some(proximity) = reading.proximity {
            let has_mail = self.thresholds.has_mail(proximity);
            if has_mail != self.state.has_mail {
                self.state.has_mail = has_mail;
                if has_mail {
                    self.state.last_delivery = Some(at);
                    events.push(MailboxEvent::MailDelivered { at });
                } else {
                    events.push(MailboxEvent::MailCollected { at });
                }
            }
        }

        events
    }

    /// Apply a reading and describe the result the way the gateway reports it
    pub fn report(&mut self, device_id: &str, reading: &SensorReading, at: DateTime<Utc>) -> GatewayReport {
        let state_changed = !self.apply(reading, at).is_empty();
        GatewayReport {
            device_id: device_id.to_string(),
            timestamp: at.naive_utc(),
            proximity_mm: reading.proximity,
            lux: reading.lux,
            has_mail: self.state.has_mail,
            is_open: self.state.is_open,
            state_changed,
            last_mail_detected: self.state.last_delivery.map(|t| t.naive_utc()),
            last_opened: self.state.last_opened.map(|t| t.naive_utc()),
            thresholds: ReportThresholds {
                proximity_mail_threshold_mm: self.thresholds.proximity_mail,
                lux_open_threshold: self.thresholds.lux_open,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_door_events_only_on_change() {
        let mut monitor = MailboxMonitor::default();

        assert_eq!(
            monitor.apply(&SensorReading::new(25.0, 100), at(0)),
            vec![MailboxEvent::DoorOpened { at: at(0) }]
        );
        assert!(monitor.apply(&SensorReading::new(30.0, 100), at(2)).is_empty());
        assert_eq!(
            monitor.apply(&SensorReading::new(2.0, 100), at(4)),
            vec![MailboxEvent::DoorClosed { at: at(4) }]
        );
        assert!(monitor.apply(&SensorReading::new(1.0, 100), at(6)).is_empty());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let mut monitor = MailboxMonitor::default();
        assert!(monitor.apply(&SensorReading::new(18.0, 8000), at(0)).is_empty());
        assert!(!monitor.state().is_open);
        assert!(!monitor.state().has_mail);
    }

    #[test]
    fn test_fractional_lux_truncated_before_threshold() {
        let thresholds = Thresholds::default();
        assert!(!thresholds.door_open(18.5));
        assert!(!thresholds.door_open(18.999));
        assert!(thresholds.door_open(19.0));

        let mut monitor = MailboxMonitor::default();
        assert!(monitor.apply(&SensorReading::new(18.5, 100), at(0)).is_empty());
        assert!(!monitor.state().is_open);
    }

    #[test]
    fn test_mail_delivered_once_per_rising_edge() {
        let mut monitor = MailboxMonitor::default();

        let events = monitor.apply(&SensorReading::new(0.0, 8500), at(10));
        assert_eq!(events, vec![MailboxEvent::MailDelivered { at: at(10) }]);
        assert_eq!(monitor.state().last_delivery, Some(at(10)));

        assert!(monitor.apply(&SensorReading::new(0.0, 9000), at(12)).is_empty());
        assert_eq!(monitor.state().last_delivery, Some(at(10)));

        assert_eq!(
            monitor.apply(&SensorReading::new(0.0, 300), at(14)),
            vec![MailboxEvent::MailCollected { at: at(14) }]
        );
        assert_eq!(monitor.state().last_delivery, Some(at(10)));

        assert_eq!(
            monitor.apply(&SensorReading::new(0.0, 8100), at(16)),
            vec![MailboxEvent::MailDelivered { at: at(16) }]
        );
        assert_eq!(monitor.state().last_delivery, Some(at(16)));
    }

    #[test]
    fn test_missing_values_leave_state_untouched() {
        let mut monitor = MailboxMonitor::default();
        monitor.apply(&SensorReading::new(40.0, 9000), at(0));

        let lux_only = SensorReading {
            lux: Some(40.0),
            proximity: None,
        };
        assert!(monitor.apply(&lux_only, at(2)).is_empty());
        assert!(monitor.state().has_mail);

        let proximity_only = SensorReading {
            lux: None,
            proximity: Some(9000),
        };
        assert!(monitor.apply(&proximity_only, at(4)).is_empty());
        assert!(monitor.state().is_open);
    }

    #[test]
    fn test_custom_thresholds() {
        let mut monitor = MailboxMonitor::new(Thresholds {
            lux_open: 500.0,
            proximity_mail: 2000,
        });
        assert!(monitor.apply(&SensorReading::new(100.0, 1500), at(0)).is_empty());
        assert_eq!(monitor.apply(&SensorReading::new(600.0, 2500), at(2)).len(), 2);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(MailboxEvent::MailDelivered { at: at(0) }).unwrap();
        assert_eq!(json["event"], "mail_delivered");
        assert!(json["at"].is_string());
        assert_eq!(MailboxEvent::DoorClosed { at: at(0) }.name(), "door_closed");
    }

    #[test]
    fn test_report_reflects_state() {
        let mut monitor = MailboxMonitor::default();
        let report = monitor.report("mailbox_01", &SensorReading::new(50.0, 9000), at(0));

        assert_eq!(report.device_id, "mailbox_01");
        assert!(report.is_open);
        assert!(report.has_mail);
        assert!(report.state_changed);
        assert_eq!(report.last_mail_detected, Some(at(0).naive_utc()));
        assert_eq!(report.thresholds.lux_open_threshold, 18.0);

        let again = monitor.report("mailbox_01", &SensorReading::new(50.0, 9000), at(2));
        assert!(!again.state_changed);
    }
}
