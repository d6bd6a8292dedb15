//! Typed decoders for the AT responses the driver consumes: `+CGNSINF`
//! (GNSS status and fix), `+CSQ` (signal quality), `+CREG` (network
//! registration) and `+CPIN` (SIM readiness). Each decoder scans the raw
//! response text for its line, parses it with nom, and yields a typed value
//! through [`FromStr`].

use nom::{
    bytes::complete::{tag, take_while},
    character::complete::{char, space0, u8 as nom_u8},
    combinator::opt,
    multi::separated_list0,
    sequence::preceded,
    Finish, IResult,
};
use std::{error::Error, fmt::Display, str::FromStr};

/// Why a response could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The expected `+XXX:` line was nowhere in the response.
    MissingLine(&'static str),
    /// The line was present but did not parse.
    Syntax(String),
    /// A `+CGNSINF` line with fewer comma-separated fields than the device
    /// is documented to emit.
    TooFewFields(usize),
    /// A field that must carry a number was empty or malformed.
    BadField(&'static str),
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::MissingLine(prefix) => write!(f, "no {prefix} line in response"),
            DecodeError::Syntax(line) => write!(f, "unparseable response line: {line}"),
            DecodeError::TooFewFields(n) => write!(f, "+CGNSINF carried only {n} fields"),
            DecodeError::BadField(name) => write!(f, "bad value in {name} field"),
        }
    }
}

impl Error for DecodeError {}

/// The minimum number of comma-separated fields a `+CGNSINF` line must carry
/// (the full SIMCom layout through satellites-in-view).
pub const MIN_GNSS_FIELDS: usize = 15;

/// A decoded `+CGNSINF` line: GNSS run state plus, when fixed, the position
/// solution and its quality metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct GnssInf {
    /// 1 when the GNSS engine is running.
    pub run_status: u8,
    /// 1 when a position fix is held.
    pub fix_status: u8,
    /// UTC date and time as reported, `yyyyMMddhhmmss.sss`.
    pub utc: String,
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// MSL altitude in meters.
    pub altitude: f64,
    /// Speed over ground in km/h.
    pub speed: f64,
    /// Course over ground in degrees.
    pub course: f64,
    /// Horizontal dilution of precision. 0.0 when unreported.
    pub hdop: f64,
    /// Satellites in view.
    pub satellites: u32,
}

impl GnssInf {
    /// True when the engine runs and holds a fix.
    pub fn has_fix(&self) -> bool {
        self.run_status == 1 && self.fix_status == 1
    }
}

fn field_chunk(s: &str) -> IResult<&str, &str> {
    take_while(|c: char| c != ',' && c != '\r' && c != '\n')(s)
}

fn parse_gnss_fields(s: &str) -> IResult<&str, Vec<&str>> {
    preceded(
        tag("+CGNSINF:"),
        preceded(space0, separated_list0(char(','), field_chunk)),
    )(s)
}

/// Numeric field access: empty fields decode as `None`, malformed fields as
/// an error surfaced by the caller.
fn num<T: FromStr>(fields: &[&str], index: usize) -> Result<Option<T>, ()> {
    match fields.get(index).map(|f| f.trim()) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| ()),
    }
}

fn required<T: FromStr>(
    fields: &[&str],
    index: usize,
    name: &'static str,
) -> Result<T, DecodeError> {
    num::<T>(fields, index)
        .map_err(|_| DecodeError::BadField(name))?
        .ok_or(DecodeError::BadField(name))
}

impl FromStr for GnssInf {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with("+CGNSINF:"))
            .ok_or(DecodeError::MissingLine("+CGNSINF:"))?;

        let fields = match parse_gnss_fields(line).finish() {
            Ok((_remaining, fields)) => fields,
            Err(_) => return Err(DecodeError::Syntax(line.to_owned())),
        };

        if fields.len() < MIN_GNSS_FIELDS {
            return Err(DecodeError::TooFewFields(fields.len()));
        }

        let run_status = required(&fields, 0, "run status")?;
        let fix_status = required(&fields, 1, "fix status")?;

        // Field layouts drift between firmware revisions: satellites-in-view
        // is usually field 14, but some modules report an extra reserved
        // field and push it to 15. Accept either.
        let satellites = match num::<u32>(&fields, 14).map_err(|_| DecodeError::BadField("satellites"))? {
            Some(n) => n,
            None => num::<u32>(&fields, 15)
                .map_err(|_| DecodeError::BadField("satellites"))?
                .unwrap_or(0),
        };

        Ok(GnssInf {
            run_status,
            fix_status,
            utc: fields[2].trim().to_owned(),
            latitude: num(&fields, 3)
                .map_err(|_| DecodeError::BadField("latitude"))?
                .unwrap_or(0.0),
            longitude: num(&fields, 4)
                .map_err(|_| DecodeError::BadField("longitude"))?
                .unwrap_or(0.0),
            altitude: num(&fields, 5)
                .map_err(|_| DecodeError::BadField("altitude"))?
                .unwrap_or(0.0),
            speed: num(&fields, 6)
                .map_err(|_| DecodeError::BadField("speed"))?
                .unwrap_or(0.0),
            course: num(&fields, 7)
                .map_err(|_| DecodeError::BadField("course"))?
                .unwrap_or(0.0),
            hdop: num(&fields, 10)
                .map_err(|_| DecodeError::BadField("hdop"))?
                .unwrap_or(0.0),
            satellites,
        })
    }
}

/// A decoded `+CSQ` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalQuality {
    /// Received signal strength, 0–31, or 99 when unknown.
    pub rssi: u8,
    /// Bit error rate index as reported.
    pub ber: u8,
}

impl SignalQuality {
    /// True when the module reported a measurable strength.
    pub fn is_known(&self) -> bool {
        self.rssi <= 31
    }

    /// True when the strength is known and at or above `minimum`.
    pub fn is_usable(&self, minimum: u8) -> bool {
        self.is_known() && self.rssi >= minimum
    }
}

fn parse_csq(s: &str) -> IResult<&str, SignalQuality> {
    let (s, _) = tag("+CSQ:")(s)?;
    let (s, _) = space0(s)?;
    let (s, rssi) = nom_u8(s)?;
    let (s, _) = char(',')(s)?;
    let (s, ber) = nom_u8(s)?;
    Ok((s, SignalQuality { rssi, ber }))
}

impl FromStr for SignalQuality {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with("+CSQ:"))
            .ok_or(DecodeError::MissingLine("+CSQ:"))?;
        match parse_csq(line).finish() {
            Ok((_remaining, quality)) => Ok(quality),
            Err(_) => Err(DecodeError::Syntax(line.to_owned())),
        }
    }
}

/// Network registration status, the `<stat>` of a `+CREG` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Not registered, not searching.
    NotRegistered,
    /// Registered to the home network.
    Home,
    /// Not registered, searching for an operator.
    Searching,
    /// Registration denied by the network.
    Denied,
    /// Status unknown.
    Unknown,
    /// Registered while roaming.
    Roaming,
}

impl Registration {
    /// True for home or roaming registration.
    pub fn is_registered(&self) -> bool {
        matches!(self, Registration::Home | Registration::Roaming)
    }

    fn from_stat(stat: u8) -> Self {
        match stat {
            0 => Registration::NotRegistered,
            1 => Registration::Home,
            2 => Registration::Searching,
            3 => Registration::Denied,
            5 => Registration::Roaming,
            _ => Registration::Unknown,
        }
    }
}

fn parse_creg(s: &str) -> IResult<&str, u8> {
    let (s, _) = tag("+CREG:")(s)?;
    let (s, _) = space0(s)?;
    let (s, first) = nom_u8(s)?;
    let (s, second) = opt(preceded(char(','), nom_u8))(s)?;
    // Solicited form is "<n>,<stat>"; the unsolicited report carries only
    // "<stat>".
    Ok((s, second.unwrap_or(first)))
}

impl FromStr for Registration {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with("+CREG:"))
            .ok_or(DecodeError::MissingLine("+CREG:"))?;
        match parse_creg(line).finish() {
            Ok((_remaining, stat)) => Ok(Registration::from_stat(stat)),
            Err(_) => Err(DecodeError::Syntax(line.to_owned())),
        }
    }
}

/// SIM card readiness from `+CPIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimStatus {
    /// The SIM is present and unlocked.
    Ready,
    /// Anything else the module reported (PIN required, no SIM, ...).
    NotReady,
}

impl FromStr for SimStatus {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with("+CPIN:"))
            .ok_or(DecodeError::MissingLine("+CPIN:"))?;
        if line.contains("READY") {
            Ok(SimStatus::Ready)
        } else {
            Ok(SimStatus::NotReady)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gnss_full_fix_parses_field_by_field() {
        let s = "+CGNSINF: 1,1,20250101010101.000,9.656000,6.528700,350.0,0.0,0.0,1,,1.2,,,,,7,";

        let inf = GnssInf::from_str(s).unwrap();

        assert!(inf.has_fix());
        assert_eq!(inf.run_status, 1);
        assert_eq!(inf.fix_status, 1);
        assert_eq!(inf.utc, "20250101010101.000");
        assert_eq!(inf.latitude, 9.656);
        assert_eq!(inf.longitude, 6.5287);
        assert_eq!(inf.altitude, 350.0);
        assert_eq!(inf.hdop, 1.2);
        assert_eq!(inf.satellites, 7);
    }

    #[test]
    fn gnss_satellites_at_canonical_index() {
        let s = "+CGNSINF: 1,1,20250101010101.000,9.656000,6.528700,350.0,0.0,0.0,1,,1.1,1.4,0.9,,9,11";

        let inf = GnssInf::from_str(s).unwrap();
        assert_eq!(inf.satellites, 9);
        assert_eq!(inf.hdop, 1.1);
    }

    #[test]
    fn gnss_no_fix_line_parses() {
        let s = "+CGNSINF: 0,0,,0,0,0,0,0,0,,,,,,,0,";

        let inf = GnssInf::from_str(s).unwrap();
        assert!(!inf.has_fix());
        assert_eq!(inf.latitude, 0.0);
        assert_eq!(inf.longitude, 0.0);
    }

    #[test]
    fn gnss_line_found_amid_echo_and_terminator() {
        let s = "AT+CGNSINF\r\n+CGNSINF: 1,1,20250101010101.000,9.656000,6.528700,350.0,0.0,0.0,1,,1.2,,,,,7,\r\n\r\nOK";
        assert!(GnssInf::from_str(s).unwrap().has_fix());
    }

    #[test]
    fn gnss_short_field_list_rejected() {
        let s = "+CGNSINF: 1,1,20250101010101.000,9.656000,6.528700,350.0";
        assert_eq!(GnssInf::from_str(s).unwrap_err(), DecodeError::TooFewFields(6));
    }

    #[test]
    fn gnss_missing_line_rejected() {
        assert_eq!(
            GnssInf::from_str("OK").unwrap_err(),
            DecodeError::MissingLine("+CGNSINF:")
        );
    }

    #[test]
    fn csq_parses() {
        let q = SignalQuality::from_str("+CSQ: 18,0\r\n\r\nOK").unwrap();
        assert_eq!(q.rssi, 18);
        assert_eq!(q.ber, 0);
        assert!(q.is_usable(10));
    }

    #[test]
    fn csq_threshold_boundary() {
        let at_minimum = SignalQuality { rssi: 10, ber: 0 };
        let below = SignalQuality { rssi: 9, ber: 0 };
        assert!(at_minimum.is_usable(10));
        assert!(!below.is_usable(10));
    }

    #[test]
    fn csq_unknown_strength_not_usable() {
        let q = SignalQuality::from_str("+CSQ: 99,99").unwrap();
        assert!(!q.is_known());
        assert!(!q.is_usable(10));
    }

    #[test]
    fn creg_solicited_forms() {
        assert_eq!(
            Registration::from_str("+CREG: 1,1\r\nOK").unwrap(),
            Registration::Home
        );
        assert_eq!(
            Registration::from_str("+CREG: 0,5").unwrap(),
            Registration::Roaming
        );
        assert_eq!(
            Registration::from_str("+CREG: 0,2").unwrap(),
            Registration::Searching
        );
        assert_eq!(
            Registration::from_str("+CREG: 0,3").unwrap(),
            Registration::Denied
        );
    }

    #[test]
    fn creg_unsolicited_single_field() {
        assert_eq!(Registration::from_str("+CREG: 5").unwrap(), Registration::Roaming);
    }

    #[test]
    fn cpin_ready_and_not() {
        assert_eq!(SimStatus::from_str("+CPIN: READY\r\nOK").unwrap(), SimStatus::Ready);
        assert_eq!(
            SimStatus::from_str("+CPIN: SIM PIN").unwrap(),
            SimStatus::NotReady
        );
    }
}
