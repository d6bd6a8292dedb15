//! Bench diagnostics for the A9G: enumerate serial devices, probe the usual
//! ports at the usual baud rates until something answers `AT`, then report
//! SIM, signal, registration and GNSS status. Optionally sends a test SMS.

use canelink::{
    a9g::{A9g, ModuleConfig, FALLBACK_PORTS},
    command::Commander,
    transport::SerialTransport,
};
use clap::Parser;
use log::warn;
use std::time::Duration;

/// Arguments for the diagnostics run.
#[derive(Debug, Parser)]
#[clap(version, about)]
struct CheckArgs {
    /// Serial device to probe; when omitted, the usual Pi ports are scanned
    #[arg(short = 'p', long = "port")]
    port: Option<String>,

    /// Send a test SMS to this number after the status report
    #[arg(long = "sms")]
    sms: Option<String>,
}

/// Bauds tried per port, the module's default first.
const PROBE_BAUDS: &[u32] = &[115_200, 9_600, 38_400];

fn main() {
    env_logger::init();
    let args = CheckArgs::parse();

    match SerialTransport::available_ports() {
        Ok(ports) => {
            println!("Available devices:");
            for port in ports {
                println!("\t{}", port.display());
            }
        }
        Err(e) => warn!("could not enumerate serial ports: {e}"),
    }

    let candidates: Vec<String> = match &args.port {
        Some(port) => vec![port.clone()],
        None => FALLBACK_PORTS.iter().map(|p| (*p).to_owned()).collect(),
    };

    let Some((path, baud)) = find_responding(&candidates) else {
        eprintln!("No responding A9G module found on {candidates:?}.");
        std::process::exit(1);
    };
    println!("\nModule responding on {path} at {baud} baud");

    let config = ModuleConfig {
        port: path,
        baud_rate: baud,
        ..ModuleConfig::default()
    };
    let mut module = A9g::open(config);
    if let Err(e) = module.init() {
        eprintln!("Initialization failed: {e}");
        std::process::exit(1);
    }

    let state = module.state().clone();
    println!("SIM ready:          {}", state.sim_ready);
    println!(
        "Signal strength:    {}",
        state
            .signal_strength
            .map(|s| format!("{s}/31"))
            .unwrap_or_else(|| "unknown".to_owned())
    );
    println!("Network registered: {}", state.network_registered);
    println!("GNSS powered:       {}", state.gnss_powered);

    if let Some(fix) = module.get_fix() {
        if fix.is_default {
            println!("Position:           default ({:.6}, {:.6})", fix.latitude, fix.longitude);
        } else {
            println!(
                "Position:           {:.6}, {:.6} alt {:.1}m sats {}",
                fix.latitude, fix.longitude, fix.altitude, fix.satellites
            );
        }
    } else {
        println!("Position:           no fix yet");
    }

    if let Some(number) = args.sms {
        println!("Sending test SMS to {number}...");
        if module.send_sms(&number, "canelink test message") {
            println!("SMS confirmed.");
        } else {
            println!("SMS not confirmed.");
        }
    }

    module.shutdown();
}

/// Try each candidate port at each baud until one answers `AT`.
fn find_responding(candidates: &[String]) -> Option<(String, u32)> {
    for path in candidates {
        for &baud in PROBE_BAUDS {
            let Ok(transport) = SerialTransport::open(path, baud) else {
                continue;
            };
            let mut commander = Commander::new(transport);
            for _ in 0..3 {
                if commander.execute("AT", Duration::from_secs(1)).is_ok() {
                    return Some((path.clone(), baud));
                }
            }
        }
    }
    None
}
