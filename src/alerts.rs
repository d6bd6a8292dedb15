//! The alerting sink the monitor forwards fixes and advisories to. The real
//! deployment backs this with a cloud document store; the crate only knows
//! the narrow interface: set the current location, append to its history,
//! and push typed alerts.

use crate::location::FixRecord;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    error::Error,
    fmt::Display,
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

/// The category of a pushed alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    /// Fall detected by the accelerometer.
    Fall,
    /// Obstacle detected ahead of the stick.
    Obstacle,
    /// Environmental reading out of range.
    Environment,
    /// Explicit emergency raised by the user.
    Emergency,
    /// Driver/device health advisory.
    System,
}

/// A typed alert payload, tagged with its kind and a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// What category of event this is.
    pub kind: AlertKind,
    /// Human-readable description.
    pub message: String,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
}

impl Alert {
    /// Build an alert stamped with the current time.
    pub fn new(kind: AlertKind, message: impl Into<String>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Alert {
            kind,
            message: message.into(),
            timestamp_ms,
        }
    }
}

/// A sink delivery failure. The monitor logs these and moves on; a broken
/// sink must never stop location acquisition.
#[derive(Debug)]
pub enum AlertError {
    /// The payload could not be serialized.
    Serialize(serde_json::Error),
    /// The backing store rejected or never acknowledged the write.
    Delivery(String),
}

impl Display for AlertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertError::Serialize(e) => write!(f, "could not serialize payload: {e}"),
            AlertError::Delivery(why) => write!(f, "sink delivery failed: {why}"),
        }
    }
}

impl Error for AlertError {}

impl From<serde_json::Error> for AlertError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialize(value)
    }
}

/// The narrow interface to the external alerting/storage collaborator.
/// Injected into the monitor explicitly; there is no process-wide client.
pub trait AlertSink {
    /// Overwrite the externally visible current location.
    fn set_current_location(&mut self, fix: &FixRecord) -> Result<(), AlertError>;

    /// Append a location to the history stream.
    fn append_location_history(&mut self, fix: &FixRecord) -> Result<(), AlertError>;

    /// Push a typed alert.
    fn send_alert(&mut self, alert: &Alert) -> Result<(), AlertError>;
}

/// A sink that serializes payloads and writes them to the log. Useful on a
/// bench without network access, and as the default for the daemon until a
/// cloud backend is wired in.
#[derive(Debug, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn set_current_location(&mut self, fix: &FixRecord) -> Result<(), AlertError> {
        info!("location/current <- {}", serde_json::to_string(fix)?);
        Ok(())
    }

    fn append_location_history(&mut self, fix: &FixRecord) -> Result<(), AlertError> {
        info!("location/history <- {}", serde_json::to_string(fix)?);
        Ok(())
    }

    fn send_alert(&mut self, alert: &Alert) -> Result<(), AlertError> {
        info!("alerts <- {}", serde_json::to_string(alert)?);
        Ok(())
    }
}

/// An in-memory sink recording everything it is handed, for tests. The
/// inner state is shared so a cloned handle survives moving the sink into
/// the monitor thread.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemorySinkState>>,
}

/// What a [MemorySink] has received so far.
#[derive(Debug, Default)]
pub struct MemorySinkState {
    /// Last value handed to `set_current_location`.
    pub current: Option<FixRecord>,
    /// Everything handed to `append_location_history`, in order.
    pub history: Vec<FixRecord>,
    /// Every alert pushed, in order.
    pub alerts: Vec<Alert>,
}

impl MemorySink {
    /// A fresh, empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the recorded state.
    pub fn with_state<R>(&self, f: impl FnOnce(&MemorySinkState) -> R) -> R {
        f(&self.inner.lock().unwrap())
    }
}

impl AlertSink for MemorySink {
    fn set_current_location(&mut self, fix: &FixRecord) -> Result<(), AlertError> {
        self.inner.lock().unwrap().current = Some(fix.clone());
        Ok(())
    }

    fn append_location_history(&mut self, fix: &FixRecord) -> Result<(), AlertError> {
        self.inner.lock().unwrap().history.push(fix.clone());
        Ok(())
    }

    fn send_alert(&mut self, alert: &Alert) -> Result<(), AlertError> {
        self.inner.lock().unwrap().alerts.push(alert.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_serializes_with_lowercase_kind_tag() {
        let alert = Alert {
            kind: AlertKind::Fall,
            message: "fall detected".to_owned(),
            timestamp_ms: 1735689600000,
        };
        let json = serde_json::to_string(&alert).unwrap();
        assert!(json.contains("\"kind\":\"fall\""));
        assert!(json.contains("1735689600000"));
    }

    #[test]
    fn memory_sink_records_in_order() {
        let mut sink = MemorySink::new();
        let handle = sink.clone();

        sink.send_alert(&Alert::new(AlertKind::System, "device reinitialized"))
            .unwrap();
        sink.send_alert(&Alert::new(AlertKind::Obstacle, "obstacle at 40cm"))
            .unwrap();

        handle.with_state(|state| {
            assert_eq!(state.alerts.len(), 2);
            assert_eq!(state.alerts[0].kind, AlertKind::System);
            assert_eq!(state.alerts[1].kind, AlertKind::Obstacle);
        });
    }
}
