//! A scripted, in-memory [Transport] that stands in for the A9G hardware.
//! Tests use it to script exact response sequences; the `--sim` flag on the
//! daemon uses [`SimTransport::healthy_module`] to run the whole pipeline
//! without a device on the desk.

use crate::transport::{Transport, TransportError};
use rand::prelude::*;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

/// A [Transport] that answers from a script instead of a serial port.
///
/// Responses are queued per command; once a command's queue is exhausted a
/// sticky per-command response is used if one was set, then the global
/// fallback, and with neither the command "times out" by yielding no bytes
/// at all. Every command sent is recorded in a shared log that tests can
/// inspect even after the transport has moved into the monitor thread.
pub struct SimTransport {
    scripted: HashMap<String, VecDeque<String>>,
    sticky: HashMap<String, String>,
    fallback: Option<String>,
    sent: Arc<Mutex<Vec<String>>>,
    pending_io_faults: usize,
    connected: bool,
}

impl SimTransport {
    /// A transport with no script at all: every command times out.
    pub fn new() -> Self {
        SimTransport {
            scripted: HashMap::new(),
            sticky: HashMap::new(),
            fallback: None,
            sent: Arc::new(Mutex::new(Vec::new())),
            pending_io_faults: 0,
            connected: true,
        }
    }

    /// A transport that answers `OK` to everything, like a healthy module
    /// with no GPS fix yet.
    pub fn always_ok() -> Self {
        Self::new().with_fallback("OK")
    }

    /// A transport scripted like a healthy module with a stable fix near the
    /// default test coordinates, jittered a little so consecutive reads
    /// differ the way a real receiver's do.
    pub fn healthy_module() -> Self {
        let mut rng = thread_rng();
        let lat = 9.6560 + rng.gen_range(-0.0005..0.0005);
        let lon = 6.5287 + rng.gen_range(-0.0005..0.0005);
        let inf = format!(
            "+CGNSINF: 1,1,20250101010101.000,{lat:.6},{lon:.6},352.1,0.0,0.0,1,,1.1,1.4,0.9,,9,11\r\n\r\nOK"
        );
        Self::new()
            .with_fallback("OK")
            .with_sticky("AT+CGNSINF", &inf)
            .with_sticky("AT+CSQ", "+CSQ: 18,0\r\n\r\nOK")
            .with_sticky("AT+CREG?", "+CREG: 1,1\r\n\r\nOK")
            .with_sticky("AT+CPIN?", "+CPIN: READY\r\n\r\nOK")
    }

    /// Queue one response for `command`. May be called repeatedly to script
    /// a sequence; responses are consumed in order.
    pub fn with_response(mut self, command: &str, response: &str) -> Self {
        self.scripted
            .entry(command.to_owned())
            .or_default()
            .push_back(response.to_owned());
        self
    }

    /// Queue the same response for `command` `n` times.
    pub fn with_response_n(mut self, command: &str, response: &str, n: usize) -> Self {
        for _ in 0..n {
            self = self.with_response(command, response);
        }
        self
    }

    /// Answer `command` with `response` every time, once its queued
    /// responses (if any) are exhausted.
    pub fn with_sticky(mut self, command: &str, response: &str) -> Self {
        self.sticky.insert(command.to_owned(), response.to_owned());
        self
    }

    /// Answer every unscripted command with `response`.
    pub fn with_fallback(mut self, response: &str) -> Self {
        self.fallback = Some(response.to_owned());
        self
    }

    /// Fail the next `n` sends with an I/O fault, to exercise the command
    /// layer's reconnect-once behavior.
    pub fn with_io_faults(mut self, n: usize) -> Self {
        self.pending_io_faults = n;
        self
    }

    /// A handle on the log of sent commands, cloneable before the transport
    /// moves into a thread.
    pub fn sent_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.sent)
    }

    fn next_response(&mut self, command: &str) -> Option<String> {
        if let Some(queue) = self.scripted.get_mut(command) {
            if let Some(response) = queue.pop_front() {
                return Some(response);
            }
        }
        if let Some(response) = self.sticky.get(command) {
            return Some(response.clone());
        }
        self.fallback.clone()
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimTransport {
    fn send(&mut self, command: &str, _wait: Duration) -> Result<Vec<u8>, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.pending_io_faults > 0 {
            self.pending_io_faults -= 1;
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated serial fault",
            )));
        }
        self.sent.lock().unwrap().push(command.to_owned());
        Ok(self
            .next_response(command)
            .map(|r| r.into_bytes())
            .unwrap_or_default())
    }

    fn send_raw(&mut self, bytes: &[u8], _wait: Duration) -> Result<Vec<u8>, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.sent
            .lock()
            .unwrap()
            .push(format!("<raw {} bytes>", bytes.len()));
        // A real module acknowledges the terminated SMS body with +CMGS.
        Ok(b"+CMGS: 1\r\n\r\nOK".to_vec())
    }

    fn reconnect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        self.sent.lock().unwrap().push("<reconnect>".to_owned());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
