// Commandline argument parser using clap for the canelink daemon

use clap::Parser;

/// Arguments for the monitoring daemon.
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct CaneArgs {
    /// Serial device the A9G module is wired to
    #[arg(short = 'p', long = "port", default_value = "/dev/serial0")]
    pub port: String,

    /// Baud rate of the module's UART; the A9G ships at 115200
    #[arg(short = 'b', long = "baud", default_value_t = 115_200)]
    pub baud_rate: u32,

    /// Minimum seconds between location forwards to the alerting sink
    #[arg(short = 'u', long = "update", default_value_t = 30)]
    pub update_secs: u64,

    /// Run against a simulated module instead of real hardware
    #[arg(long = "sim")]
    pub sim: bool,
}
