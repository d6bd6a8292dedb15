//! Host-side GPS/GSM telemetry for the smart walking stick. The stick's
//! Raspberry Pi talks to an A9G combined GPS/GSM module over a serial line
//! using AT commands; this crate owns that conversation: bringing the module
//! up through its initialization sequence, polling for network registration,
//! acquiring GPS fixes with retry and a rate-limited default-location
//! fallback, and running the background monitor that publishes positions to
//! the external alerting sink and recovers the module when it stops
//! responding.
//!
//! The layering runs bottom-up: [transport] owns the serial port and the raw
//! write-then-accumulate exchange, [command] classifies one AT exchange into
//! Ok/Error/Timeout, [response_decoder] turns response text into typed
//! values, [a9g] is the driver proper, and [monitor] supervises it on its
//! own thread. Sensors, the camera, and the voice assistant live elsewhere
//! and reach this crate only through the [alerts] interface.

#![warn(missing_docs)]
pub mod a9g;
pub mod alerts;
pub mod args;
pub mod command;
pub mod location;
pub mod monitor;
pub mod response_decoder;
pub mod sim;
pub mod transport;
