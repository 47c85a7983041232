mod commandline;
mod config;
mod output;

use anyhow::{Context, Result};
use bmslog_lib::discovery::discover;
use bmslog_lib::poll::{Poller, Shutdown};
use bmslog_lib::snapshot::Sink;
use clap::Parser;
use commandline::{CliArgs, OutputFormat};
use config::Settings;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{ops::Deref, panic};

fn logging_init(loglevel: LevelFilter) -> Result<LoggerHandle> {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .context("Cannot init logging")?
        .start()
        .context("Cannot start logging")?;

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    Ok(log_handle)
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Requests a shutdown on Ctrl+C (and SIGTERM on unix) from a helper thread.
fn install_signal_handler(shutdown: Shutdown) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Cannot build signal runtime")?;
    std::thread::Builder::new()
        .name("signal".into())
        .spawn(move || match runtime.block_on(wait_for_signal()) {
            Ok(()) => {
                info!("Stop requested");
                shutdown.request();
            }
            Err(err) => error!("Cannot listen for stop signals: {err}"),
        })
        .context("Cannot spawn signal thread")?;
    Ok(())
}

fn create_sink(settings: &Settings) -> Result<Box<dyn Sink>> {
    Ok(match settings.output {
        OutputFormat::Csv => Box::new(output::CsvSink::create(&settings.output_dir)?),
        OutputFormat::Console => Box::new(output::ConsoleSink),
        OutputFormat::Json => Box::new(output::JsonSink),
    })
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter())?;

    let settings = Settings::resolve(&args)?;
    debug!("{settings:?}");

    let mut connector = settings.connector.clone();
    let discovered = discover(
        &mut connector,
        settings.discovery_candidates(),
        settings.settle,
    )
    .context("Cannot find the BMS on any serial port")?;

    let shutdown = Shutdown::new();
    install_signal_handler(shutdown.clone())?;

    let mut sink = create_sink(&settings)?;

    let mut poller = Poller::new(discovered.transport, discovered.device_address);
    poller.set_retry_policy(settings.retry);
    let result = poller.run(&mut sink, settings.delay, &shutdown);

    drop(poller.into_transport());
    info!("Closed {}", discovered.identifier);
    result.context("Cannot flush output")
}
