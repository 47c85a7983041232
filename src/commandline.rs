use bmslog_lib::transport::CandidatePorts;
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::PathBuf;
use std::time::Duration;

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    /// Append one row per poll cycle to a new CSV file
    Csv,
    /// Print every snapshot to the console
    Console,
    /// Print one JSON object per poll cycle
    Json,
}

fn port_number(s: &str) -> Result<u16, String> {
    let numbers = CandidatePorts::default_numbers();
    clap_num::number_range(s, *numbers.start(), *numbers.end())
}

/// A humantime duration ("2s", "500ms"), or a bare number of milliseconds.
pub fn duration_or_millis(s: &str) -> Result<Duration, humantime::DurationError> {
    match s.trim().parse::<u64>() {
        Ok(millis) => Ok(Duration::from_millis(millis)),
        Err(_) => humantime::parse_duration(s),
    }
}

const fn about_text() -> &'static str {
    "daly bms telemetry logger"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Serial port device path, skips the port scan (e.g., /dev/ttyUSB0 on Linux, COM3 on Windows)
    #[arg(short, long, conflicts_with = "port_number")]
    pub device: Option<String>,

    /// Number of the serial port appended to the port prefix, skips the port scan (1..=256 on Windows, 0..=255 elsewhere)
    #[arg(short = 'c', long, value_parser = port_number)]
    pub port_number: Option<u16>,

    /// Device name prefix of the scanned ports (default "COM" on Windows, "/dev/ttyUSB" elsewhere)
    #[arg(long)]
    pub port_prefix: Option<String>,

    /// Delay between two poll cycles (e.g., "2s", "500ms", plain numbers are milliseconds) [default: 2s]
    #[arg(short = 't', long, value_parser = duration_or_millis)]
    pub delay: Option<Duration>,

    /// Wait after opening a port before probing it [default: 500ms]
    #[arg(long, value_parser = humantime::parse_duration)]
    pub settle: Option<Duration>,

    // Some USB - RS485 dongles requires at least 10ms to switch between TX and RX, so use a save delay between frames
    /// Minimum gap between two frames on the wire
    #[arg(value_parser = humantime::parse_duration, long, default_value = "4ms")]
    pub frame_delay: Duration,

    /// Maximum silence between two received bytes once a reply has started
    #[arg(value_parser = humantime::parse_duration, long, default_value = "50ms")]
    pub read_interval: Duration,

    /// Constant part of the total read timeout
    #[arg(value_parser = humantime::parse_duration, long, default_value = "50ms")]
    pub read_constant: Duration,

    /// Per byte part of the total read timeout
    #[arg(value_parser = humantime::parse_duration, long, default_value = "10ms")]
    pub read_multiplier: Duration,

    /// Constant part of the total write timeout
    #[arg(value_parser = humantime::parse_duration, long, default_value = "50ms")]
    pub write_constant: Duration,

    /// Per byte part of the total write timeout
    #[arg(value_parser = humantime::parse_duration, long, default_value = "10ms")]
    pub write_multiplier: Duration,

    /// Write/read attempts per request [default: 1]
    #[arg(long)]
    pub attempts: Option<u8>,

    /// Where every completed snapshot goes
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    pub output: OutputFormat,

    /// Directory of the CSV file [default: .]
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Optional YAML settings file, command line values take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,
}
