//! The serial transport underneath the AT command layer. Owns the one open
//! connection to the A9G module and implements the raw write-then-accumulate
//! exchange: write `command\r\n`, then collect bytes until an `OK` or `ERROR`
//! token shows up in the buffer or the wait deadline passes.

use log::{debug, warn};
use serial2::{CharSize, FlowControl, Parity, SerialPort, Settings, StopBits};
use std::{
    error::Error,
    fmt::Display,
    io,
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

/// How long a single blocking read may sit before we re-check the deadline.
const READ_SLICE: Duration = Duration::from_millis(100);

/// Pause between closing and reopening the port during a reconnect, long
/// enough for the A9G's UART to settle.
const RECONNECT_PAUSE: Duration = Duration::from_millis(500);

/// Things that can go wrong underneath the command layer.
#[derive(Debug)]
pub enum TransportError {
    /// No connection is open. Reported as a value so callers can degrade
    /// instead of unwinding.
    NotConnected,
    /// The OS rejected a read or write on the open port.
    Io(io::Error),
}

impl Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::NotConnected => write!(f, "serial port is not open"),
            TransportError::Io(e) => write!(f, "serial i/o error: {e}"),
        }
    }
}

impl Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// One request/response exchange with the device. The command layer sits on
/// top of this; tests and the dev fallback sit on a scripted implementation.
pub trait Transport {
    /// Write `command` terminated by CR/LF, then accumulate response bytes
    /// until `OK`/`ERROR` appears or `wait` elapses. Returns whatever bytes
    /// arrived, possibly none. Stale input from a previous exchange is
    /// discarded before the write.
    fn send(&mut self, command: &str, wait: Duration) -> Result<Vec<u8>, TransportError>;

    /// Write raw bytes with no line terminator appended, then accumulate a
    /// response the same way. Used for the SMS body and its 0x1A terminator.
    fn send_raw(&mut self, bytes: &[u8], wait: Duration) -> Result<Vec<u8>, TransportError>;

    /// Close, pause, and reopen the connection. The command layer calls this
    /// exactly once after an I/O fault.
    fn reconnect(&mut self) -> Result<(), TransportError>;

    /// Whether a connection is currently open.
    fn is_connected(&self) -> bool;
}

/// Returns true once the accumulated buffer contains a response terminator.
pub(crate) fn has_terminator(buf: &[u8]) -> bool {
    contains(buf, b"OK") || contains(buf, b"ERROR")
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// A [Transport] over a real serial device, 8N1 with hardware flow control,
/// matching the wiring between the Pi and the A9G board.
pub struct SerialTransport {
    path: PathBuf,
    baud_rate: u32,
    port: Option<SerialPort>,
}

impl SerialTransport {
    /// Open `path` at `baud_rate` and configure it for the A9G.
    pub fn open(path: impl Into<PathBuf>, baud_rate: u32) -> Result<Self, TransportError> {
        let path = path.into();
        let port = open_port(&path, baud_rate)?;
        debug!("opened serial port {} at {} baud", path.display(), baud_rate);
        Ok(SerialTransport {
            path,
            baud_rate,
            port: Some(port),
        })
    }

    /// The device path this transport talks to.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Enumerate serial devices present on this host.
    pub fn available_ports() -> io::Result<Vec<PathBuf>> {
        SerialPort::available_ports()
    }

    fn exchange(&mut self, payload: &[u8], wait: Duration) -> Result<Vec<u8>, TransportError> {
        let port = self.port.as_ref().ok_or(TransportError::NotConnected)?;

        // Discard whatever a previous exchange (or the module's unsolicited
        // chatter) left in the input buffer.
        port.discard_input_buffer()?;
        port.write_all(payload)?;

        let deadline = Instant::now() + wait;
        let mut response = Vec::new();
        let mut chunk = [0u8; 256];

        while Instant::now() < deadline && !has_terminator(&response) {
            match port.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => response.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(response)
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, command: &str, wait: Duration) -> Result<Vec<u8>, TransportError> {
        let mut payload = command.as_bytes().to_vec();
        payload.extend_from_slice(b"\r\n");
        self.exchange(&payload, wait)
    }

    fn send_raw(&mut self, bytes: &[u8], wait: Duration) -> Result<Vec<u8>, TransportError> {
        self.exchange(bytes, wait)
    }

    fn reconnect(&mut self) -> Result<(), TransportError> {
        warn!("reconnecting serial port {}", self.path.display());
        self.port = None;
        thread::sleep(RECONNECT_PAUSE);
        self.port = Some(open_port(&self.path, self.baud_rate)?);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

fn open_port(path: &PathBuf, baud_rate: u32) -> Result<SerialPort, TransportError> {
    let mut port = SerialPort::open(path, |mut settings: Settings| {
        settings.set_raw();
        settings.set_baud_rate(baud_rate)?;
        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::One);
        settings.set_parity(Parity::None);
        settings.set_flow_control(FlowControl::RtsCts);
        Ok(settings)
    })?;
    port.set_read_timeout(READ_SLICE)?;
    port.set_write_timeout(Duration::from_secs(1))?;
    // The A9G also expects DTR asserted when flow control is wired up.
    if let Err(e) = port.set_dtr(true) {
        warn!("could not assert DTR on {}: {e}", path.display());
    }
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminator_detection() {
        assert!(has_terminator(b"\r\nOK\r\n"));
        assert!(has_terminator(b"+CME ERROR: 10\r\n"));
        assert!(!has_terminator(b"+CGNSINF: 1,1"));
        assert!(!has_terminator(b""));
    }

    #[test]
    fn terminator_found_mid_buffer() {
        assert!(has_terminator(b"+CSQ: 18,0\r\n\r\nOK\r\npartial"));
    }
}
