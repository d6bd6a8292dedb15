//! The monitoring daemon: opens the A9G module (or a simulated one), runs
//! the initialization sequence, starts the background monitor, and reports
//! the latest position on the log.

use canelink::{
    a9g::{A9g, ModuleConfig},
    alerts::LogSink,
    args::CaneArgs,
    monitor::{LocationMonitor, MonitorConfig},
    sim::SimTransport,
};
use clap::Parser;
use log::{info, warn};
use std::{thread::sleep, time::Duration};

// Example:
// cargo run --bin canelink -- --port /dev/serial0 --baud 115200 --update 30

fn main() {
    env_logger::init();
    let args = CaneArgs::parse();

    let module_config = ModuleConfig {
        port: args.port.clone(),
        baud_rate: args.baud_rate,
        ..ModuleConfig::default()
    };
    let monitor_config = MonitorConfig {
        update_interval: Duration::from_secs(args.update_secs),
        ..MonitorConfig::default()
    };

    let monitor = if args.sim {
        info!("running against a simulated module");
        let mut module = A9g::with_transport(SimTransport::healthy_module(), module_config);
        if let Err(e) = module.init() {
            warn!("initialization failed: {e}; monitor will keep retrying");
        }
        LocationMonitor::spawn(module, LogSink, monitor_config)
    } else {
        let mut module = A9g::open(module_config);
        if module.is_dev_mode() {
            warn!("no module attached; reporting the default location only");
        }
        if let Err(e) = module.init() {
            warn!("initialization failed: {e}; monitor will keep retrying");
        }
        LocationMonitor::spawn(module, LogSink, monitor_config)
    };

    loop {
        match monitor.latest_fix() {
            Some(fix) if fix.is_default => info!(
                "position (default): {:.6}, {:.6}",
                fix.latitude, fix.longitude
            ),
            Some(fix) => info!(
                "position: {:.6}, {:.6} alt {:.1}m sats {} hdop {:.2}",
                fix.latitude, fix.longitude, fix.altitude, fix.satellites, fix.hdop
            ),
            None => info!("no position yet"),
        }
        sleep(Duration::from_secs(5));
    }
}
