use crate::commandline::{duration_or_millis, CliArgs, OutputFormat};
use anyhow::{Context, Result};
use bmslog_lib::discovery::DEFAULT_SETTLE;
use bmslog_lib::poll::{RetryPolicy, DEFAULT_INTERVAL};
use bmslog_lib::protocol::MINIMUM_DELAY;
use bmslog_lib::serialport::{SerialConnector, SerialTimeouts};
use bmslog_lib::transport::CandidatePorts;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Contents of the optional YAML settings file. Durations are humantime strings ("2s", "500ms") or
/// plain milliseconds.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileSettings {
    pub device: Option<String>,
    pub port_prefix: Option<String>,
    pub delay: Option<String>,
    pub settle: Option<String>,
    pub attempts: Option<u8>,
    pub output_dir: Option<PathBuf>,
}

impl FileSettings {
    pub fn load(config_file_path: &Path) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open config file {config_file_path:?}"))?;
        let settings: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read config from file: {config_file_path:?}"))?;
        Ok(settings)
    }
}

fn parse_duration(field: &str, value: Option<&str>) -> Result<Option<Duration>> {
    value
        .map(|value| {
            duration_or_millis(value)
                .with_context(|| format!("Invalid duration {value:?} for '{field}'"))
        })
        .transpose()
}

/// Effective settings after merging command line, settings file and defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Explicit port, bypasses the scan.
    pub identifier: Option<String>,
    pub candidates: CandidatePorts,
    pub delay: Duration,
    pub settle: Duration,
    pub retry: RetryPolicy,
    pub connector: SerialConnector,
    pub output: OutputFormat,
    pub output_dir: PathBuf,
}

impl Settings {
    pub fn resolve(args: &CliArgs) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileSettings::load(path)?,
            None => FileSettings::default(),
        };
        Self::merge(args, file)
    }

    pub fn merge(args: &CliArgs, file: FileSettings) -> Result<Self> {
        let mut candidates = CandidatePorts::default();
        if let Some(prefix) = args.port_prefix.clone().or(file.port_prefix) {
            candidates = candidates.with_prefix(prefix);
        }

        let identifier = match (&args.device, args.port_number) {
            (Some(device), _) => Some(device.clone()),
            (None, Some(number)) => Some(candidates.name(number)),
            (None, None) => file.device,
        };

        let delay = match args.delay {
            Some(delay) => delay,
            None => parse_duration("delay", file.delay.as_deref())?.unwrap_or(DEFAULT_INTERVAL),
        };
        let settle = match args.settle {
            Some(settle) => settle,
            None => parse_duration("settle", file.settle.as_deref())?.unwrap_or(DEFAULT_SETTLE),
        };

        let attempts = args.attempts.or(file.attempts).unwrap_or(1);
        if attempts == 0 {
            anyhow::bail!("At least one attempt per request is required");
        }

        Ok(Self {
            identifier,
            candidates,
            delay,
            settle,
            retry: RetryPolicy::new(attempts),
            connector: SerialConnector {
                timeouts: SerialTimeouts {
                    read_interval: args.read_interval,
                    read_constant: args.read_constant,
                    read_multiplier: args.read_multiplier,
                    write_constant: args.write_constant,
                    write_multiplier: args.write_multiplier,
                },
                delay: Duration::max(args.frame_delay, MINIMUM_DELAY),
            },
            output: args.output,
            output_dir: args
                .output_dir
                .clone()
                .or(file.output_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
        })
    }

    /// The identifiers discovery tries, in order.
    pub fn discovery_candidates(&self) -> Vec<String> {
        match &self.identifier {
            Some(identifier) => vec![identifier.clone()],
            None => self.candidates.iter().collect(),
        }
    }
}
