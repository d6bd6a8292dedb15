//! The background monitor: a dedicated thread that repeatedly acquires a
//! fix, publishes the latest record into a shared slot, forwards it to the
//! alerting sink at a throttled rate, and recovers the module when it stops
//! responding. Stops only on an explicit signal; `stop()` joins the thread.

use crate::a9g::A9g;
use crate::alerts::{Alert, AlertKind, AlertSink};
use crate::location::FixRecord;
use crate::transport::Transport;
use log::{debug, info, warn};
use std::{
    sync::{mpsc, Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

/// Policy knobs for the monitor loop.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Minimum interval between forwards to the sink.
    pub update_interval: Duration,
    /// Sleep between cycles after a success, and the backoff floor.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Consecutive failed cycles before the module is probed and, if
    /// unresponsive, reinitialized.
    pub failure_threshold: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            update_interval: Duration::from_secs(30),
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            failure_threshold: 3,
        }
    }
}

/// Backoff after a failed cycle: double, capped.
pub fn next_backoff(current: Duration, cap: Duration) -> Duration {
    (current * 2).min(cap)
}

enum Signal {
    UpdateInterval(Duration),
    Stop,
}

/// Handle on the running monitor thread. The latest acquired record is
/// readable from any thread; it may be stale by one cycle, which is part of
/// the contract.
pub struct LocationMonitor {
    handle: Option<thread::JoinHandle<()>>,
    tx: mpsc::Sender<Signal>,
    latest: Arc<Mutex<Option<FixRecord>>>,
}

impl LocationMonitor {
    /// Take ownership of an initialized module and a sink and start the
    /// loop on its own thread.
    pub fn spawn<T, S>(mut module: A9g<T>, mut sink: S, config: MonitorConfig) -> Self
    where
        T: Transport + Send + 'static,
        S: AlertSink + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Signal>();
        let latest = Arc::new(Mutex::new(None));
        let th_latest = Arc::clone(&latest);

        let handle = thread::spawn(move || {
            let mut running = true;
            let mut update_interval = config.update_interval;
            let mut delay = config.base_delay;
            let mut failures = 0u32;
            let mut last_forward: Option<Instant> = None;

            while running {
                while let Ok(signal) = rx.try_recv() {
                    match signal {
                        Signal::UpdateInterval(interval) => update_interval = interval,
                        Signal::Stop => running = false,
                    }
                }
                if !running {
                    break;
                }

                match module.get_fix() {
                    Some(fix) => {
                        *th_latest.lock().unwrap() = Some(fix.clone());

                        let due = last_forward
                            .map_or(true, |at| at.elapsed() >= update_interval);
                        if due {
                            if let Err(e) = sink.set_current_location(&fix) {
                                warn!("could not update current location: {e}");
                            }
                            if let Err(e) = sink.append_location_history(&fix) {
                                warn!("could not append location history: {e}");
                            }
                            last_forward = Some(Instant::now());
                        }

                        failures = 0;
                        delay = config.base_delay;
                    }
                    None => {
                        failures += 1;
                        debug!("no fix this cycle ({failures} consecutive)");

                        if failures >= config.failure_threshold {
                            info!("repeated acquisition failures, probing module");
                            if !module.probe() {
                                warn!("module unresponsive, reinitializing");
                                let advisory = Alert::new(
                                    AlertKind::System,
                                    "A9G unresponsive, reinitializing",
                                );
                                if let Err(e) = sink.send_alert(&advisory) {
                                    warn!("could not push system alert: {e}");
                                }
                                if let Err(e) = module.init() {
                                    warn!("reinitialization failed: {e}");
                                }
                            }
                            failures = 0;
                        }

                        delay = next_backoff(delay, config.max_delay);
                    }
                }

                thread::sleep(delay);
            }

            module.shutdown();
            info!("location monitor terminated");
        });

        LocationMonitor {
            handle: Some(handle),
            tx,
            latest,
        }
    }

    /// The most recent record the loop produced, if any. May lag the device
    /// by one cycle.
    pub fn latest_fix(&self) -> Option<FixRecord> {
        self.latest.lock().unwrap().clone()
    }

    /// Adjust the minimum interval between sink forwards. Takes effect at
    /// the top of the next cycle.
    pub fn set_update_interval(&self, interval: Duration) {
        let _ = self.tx.send(Signal::UpdateInterval(interval));
    }

    /// Request the loop to stop and wait for it to observe the request. The
    /// current command's wait is a hard bound on how long this blocks.
    pub fn stop(&mut self) {
        let _ = self.tx.send(Signal::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("monitor thread panicked before joining");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a9g::ModuleConfig;
    use crate::alerts::MemorySink;
    use crate::sim::SimTransport;

    fn fast_module(sim: SimTransport) -> A9g<SimTransport> {
        let config = ModuleConfig {
            max_network_retries: 1,
            network_retry_delay: Duration::ZERO,
            gps_max_retries: 1,
            gps_retry_delay: Duration::ZERO,
            ..ModuleConfig::default()
        };
        A9g::with_transport(sim, config)
    }

    fn fast_monitor_config() -> MonitorConfig {
        MonitorConfig {
            update_interval: Duration::ZERO,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
            failure_threshold: 3,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let cap = Duration::from_secs(30);
        let mut delay = Duration::from_secs(2);
        delay = next_backoff(delay, cap);
        assert_eq!(delay, Duration::from_secs(4));
        delay = next_backoff(delay, cap);
        assert_eq!(delay, Duration::from_secs(8));
        delay = next_backoff(delay, cap);
        assert_eq!(delay, Duration::from_secs(16));
        delay = next_backoff(delay, cap);
        assert_eq!(delay, Duration::from_secs(30));
        delay = next_backoff(delay, cap);
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[test]
    fn monitor_publishes_and_forwards_fixes() {
        let module = fast_module(SimTransport::healthy_module());
        let sink = MemorySink::new();
        let sink_handle = sink.clone();

        let mut monitor = LocationMonitor::spawn(module, sink, fast_monitor_config());
        thread::sleep(Duration::from_millis(50));
        monitor.stop();

        let fix = monitor.latest_fix().expect("a fix should be published");
        assert!(!fix.is_default);
        sink_handle.with_state(|state| {
            let current = state.current.as_ref().expect("current location set");
            assert!(!current.is_default);
            assert!(!state.history.is_empty());
        });
    }

    #[test]
    fn forwarding_is_throttled_by_update_interval() {
        let module = fast_module(SimTransport::healthy_module());
        let sink = MemorySink::new();
        let sink_handle = sink.clone();

        let config = MonitorConfig {
            update_interval: Duration::from_secs(3600),
            ..fast_monitor_config()
        };
        let mut monitor = LocationMonitor::spawn(module, sink, config);
        thread::sleep(Duration::from_millis(50));
        monitor.stop();

        // Many cycles ran, but the sink saw exactly one forward.
        sink_handle.with_state(|state| assert_eq!(state.history.len(), 1));
        assert!(monitor.latest_fix().is_some());
    }

    #[test]
    fn unresponsive_module_triggers_reinit_and_system_alert() {
        // Scenario: the device answers nothing at all. The first cycle still
        // emits the rate-limited default; every following cycle fails, and
        // each episode of three failures probes AT and reinitializes.
        let sim = SimTransport::new();
        let log = sim.sent_log();
        let module = fast_module(sim);
        let sink = MemorySink::new();
        let sink_handle = sink.clone();

        let mut monitor = LocationMonitor::spawn(module, sink, fast_monitor_config());
        thread::sleep(Duration::from_millis(150));
        monitor.stop();

        sink_handle.with_state(|state| {
            assert!(
                state.alerts.iter().any(|a| a.kind == AlertKind::System),
                "a system advisory should have been pushed"
            );
        });
        let sent = log.lock().unwrap();
        assert!(
            sent.iter().any(|c| c == "AT"),
            "the module should have been probed with AT"
        );
    }

    #[test]
    fn stop_joins_the_thread() {
        let module = fast_module(SimTransport::healthy_module());
        let mut monitor =
            LocationMonitor::spawn(module, MemorySink::new(), fast_monitor_config());
        monitor.stop();
        // A second stop is harmless.
        monitor.stop();
    }
}
