//! The synchronous AT command layer: one command out, one classified
//! response back. Sits directly on a [Transport] and owns the serial
//! conversation; nothing else in the crate touches the port.

use crate::transport::{Transport, TransportError};
use log::{debug, warn};
use std::time::{Duration, Instant};

/// How one AT exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The response contained the `OK` terminator.
    Ok,
    /// The response contained `ERROR` (including `+CME ERROR` forms).
    Error,
    /// Nothing conclusive arrived within the wait, or the transport faulted
    /// and could not be brought back.
    Timeout,
}

/// The outcome of sending one AT command. Created per call, not retained.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Lossily decoded response text, trimmed.
    pub text: String,
    /// Tri-state classification of the exchange.
    pub outcome: Outcome,
    /// How long the exchange took.
    pub elapsed: Duration,
}

impl CommandResult {
    /// True when the exchange ended in `OK`.
    pub fn is_ok(&self) -> bool {
        self.outcome == Outcome::Ok
    }
}

/// Classify decoded response text. `ERROR` wins over `OK` when both appear;
/// an empty response is always a timeout — in particular an empty answer to
/// the bare `AT` probe must never read as success.
fn classify(text: &str) -> Outcome {
    if text.contains("ERROR") {
        Outcome::Error
    } else if text.contains("OK") {
        Outcome::Ok
    } else {
        Outcome::Timeout
    }
}

/// Issues AT commands over a [Transport] and classifies the responses.
pub struct Commander<T: Transport> {
    transport: T,
}

impl<T: Transport> Commander<T> {
    /// Wrap a transport. The commander takes ownership: only one logical
    /// conversation may be in flight on the port at a time.
    pub fn new(transport: T) -> Self {
        Commander { transport }
    }

    /// Send `command` and wait up to `wait` for `OK`/`ERROR`. On a serial
    /// I/O fault, attempts exactly one reconnect and one re-send; if the
    /// reconnect itself fails the result is a [Outcome::Timeout].
    pub fn execute(&mut self, command: &str, wait: Duration) -> CommandResult {
        let started = Instant::now();
        let bytes = match self.transport.send(command, wait) {
            Ok(bytes) => bytes,
            Err(TransportError::NotConnected) | Err(TransportError::Io(_)) => {
                warn!("serial fault on '{command}', attempting one reconnect");
                match self.transport.reconnect() {
                    Ok(()) => self.transport.send(command, wait).unwrap_or_default(),
                    Err(e) => {
                        warn!("reconnect failed: {e}");
                        Vec::new()
                    }
                }
            }
        };

        let text = String::from_utf8_lossy(&bytes).trim().to_string();
        let outcome = classify(&text);
        let elapsed = started.elapsed();
        debug!("{command} -> {outcome:?} in {elapsed:?}");
        CommandResult {
            text,
            outcome,
            elapsed,
        }
    }

    /// Send raw bytes (no CR/LF appended) and classify the response the same
    /// way. Used for the SMS body terminated by 0x1A.
    pub fn execute_raw(&mut self, bytes: &[u8], wait: Duration) -> CommandResult {
        let started = Instant::now();
        let response = self.transport.send_raw(bytes, wait).unwrap_or_default();
        let text = String::from_utf8_lossy(&response).trim().to_string();
        let outcome = classify(&text);
        CommandResult {
            text,
            outcome,
            elapsed: started.elapsed(),
        }
    }

    /// Whether the underlying transport believes it is connected.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}
