//! Position records produced by the driver and the rate-limited default
//! location used when no satellite fix is available.

use crate::response_decoder::GnssInf;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// HDOP reported on default-location records; 99.99 is the conventional
/// "no quality information" value.
pub const DEFAULT_HDOP: f64 = 99.99;

/// One GPS reading. The most recent valid-or-default record is the
/// externally visible "current location".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixRecord {
    /// Latitude in decimal degrees, [-90, 90].
    pub latitude: f64,
    /// Longitude in decimal degrees, [-180, 180].
    pub longitude: f64,
    /// MSL altitude in meters.
    pub altitude: f64,
    /// Horizontal dilution of precision.
    pub hdop: f64,
    /// Satellites in view when the fix was taken.
    pub satellites: u32,
    /// Whether this record describes a usable position.
    pub valid: bool,
    /// True when this is the hardcoded fallback coordinate, not a fix.
    pub is_default: bool,
    /// Unix timestamp in milliseconds at record creation.
    pub timestamp_ms: u64,
}

impl FixRecord {
    /// Build a record from a parsed `+CGNSINF` line that holds a fix.
    /// Returns `None` when the coordinates are out of range or all-zero;
    /// such a reading counts as "no fix", never as a real record.
    pub fn from_gnss(inf: &GnssInf) -> Option<FixRecord> {
        if !inf.has_fix() || !coordinates_plausible(inf.latitude, inf.longitude) {
            return None;
        }
        Some(FixRecord {
            latitude: inf.latitude,
            longitude: inf.longitude,
            altitude: inf.altitude,
            hdop: inf.hdop,
            satellites: inf.satellites,
            valid: true,
            is_default: false,
            timestamp_ms: now_ms(),
        })
    }
}

/// In-range and not the (0, 0) null island a cold receiver reports.
pub fn coordinates_plausible(latitude: f64, longitude: f64) -> bool {
    (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
        && (latitude != 0.0 || longitude != 0.0)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The fixed fallback coordinate pair plus a minimum re-send interval.
/// Default records are never emitted more often than once per interval, so a
/// downstream sink is not flooded with synthetic positions.
#[derive(Debug, Clone)]
pub struct DefaultLocationPolicy {
    latitude: f64,
    longitude: f64,
    min_interval: Duration,
    last_emitted: Option<Instant>,
}

impl DefaultLocationPolicy {
    /// A policy around the given fallback coordinates.
    pub fn new(latitude: f64, longitude: f64, min_interval: Duration) -> Self {
        DefaultLocationPolicy {
            latitude,
            longitude,
            min_interval,
            last_emitted: None,
        }
    }

    /// The fallback coordinates as `(latitude, longitude)`.
    pub fn coordinates(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }

    /// Emit a default-marked record if at least the minimum interval has
    /// elapsed since the last emission (or none has happened yet); `None`
    /// otherwise. `None` means "nothing new to report", not an error.
    pub fn take_default(&mut self) -> Option<FixRecord> {
        let now = Instant::now();
        if let Some(last) = self.last_emitted {
            if now.duration_since(last) < self.min_interval {
                return None;
            }
        }
        self.last_emitted = Some(now);
        Some(FixRecord {
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: 0.0,
            hdop: DEFAULT_HDOP,
            satellites: 0,
            valid: true,
            is_default: true,
            timestamp_ms: now_ms(),
        })
    }
}

impl Default for DefaultLocationPolicy {
    /// The walking stick's home coordinates (9.6560° N, 6.5287° E), resent
    /// at most once a minute.
    fn default() -> Self {
        DefaultLocationPolicy::new(9.6560, 6.5287, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn fix_record_round_trips_parsed_fields() {
        let inf = GnssInf::from_str(
            "+CGNSINF: 1,1,20250101010101.000,9.656000,6.528700,350.0,0.0,0.0,1,,1.2,,,,,7,",
        )
        .unwrap();

        let record = FixRecord::from_gnss(&inf).unwrap();
        assert_eq!(record.latitude, 9.656);
        assert_eq!(record.longitude, 6.5287);
        assert_eq!(record.altitude, 350.0);
        assert_eq!(record.satellites, 7);
        assert_eq!(record.hdop, 1.2);
        assert!(record.valid);
        assert!(!record.is_default);
    }

    #[test]
    fn all_zero_coordinates_are_no_fix() {
        let inf = GnssInf::from_str("+CGNSINF: 1,1,,0,0,0,0,0,0,,,,,,,0,").unwrap();
        assert!(FixRecord::from_gnss(&inf).is_none());
    }

    #[test]
    fn out_of_range_coordinates_are_no_fix() {
        let inf =
            GnssInf::from_str("+CGNSINF: 1,1,,95.0,6.5287,0,0,0,0,,,,,,,4,").unwrap();
        assert!(FixRecord::from_gnss(&inf).is_none());
        let inf =
            GnssInf::from_str("+CGNSINF: 1,1,,9.656,-181.0,0,0,0,0,,,,,,,4,").unwrap();
        assert!(FixRecord::from_gnss(&inf).is_none());
    }

    #[test]
    fn no_fix_status_yields_no_record() {
        let inf = GnssInf::from_str("+CGNSINF: 1,0,,9.656,6.5287,0,0,0,0,,,,,,,4,").unwrap();
        assert!(FixRecord::from_gnss(&inf).is_none());
    }

    #[test]
    fn default_policy_rate_limits() {
        let mut policy = DefaultLocationPolicy::new(9.6560, 6.5287, Duration::from_secs(60));

        let first = policy.take_default().expect("first emission is allowed");
        assert!(first.is_default);
        assert_eq!(first.latitude, 9.6560);
        assert_eq!(first.longitude, 6.5287);
        assert_eq!(first.hdop, DEFAULT_HDOP);

        // Within the interval nothing new is reported.
        assert!(policy.take_default().is_none());
    }

    #[test]
    fn default_policy_emits_again_after_interval() {
        let mut policy = DefaultLocationPolicy::new(9.6560, 6.5287, Duration::ZERO);
        assert!(policy.take_default().is_some());
        assert!(policy.take_default().is_some());
    }
}
