//! The fixed nine-request poll cycle and the loop that repeats it.

use crate::protocol::{Command, Reply, RequestFrame, ResponseFrame, RX_BUFFER_LENGTH};
use crate::snapshot::{Sink, TelemetrySnapshot};
use crate::transport::Transport;
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pause between two poll cycles when nothing else is configured.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(2000);

const SHUTDOWN_POLL_SLICE: Duration = Duration::from_millis(50);

/// How many write/read round trips a single request may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u8,
}

impl RetryPolicy {
    /// A budget of zero is raised to one, every request is tried at least once.
    pub fn new(attempts: u8) -> Self {
        Self {
            attempts: attempts.max(1),
        }
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Cooperative stop request shared between the poll loop and a signal handler.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless a stop is requested earlier. Returns `true` on a stop request.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_requested() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(SHUTDOWN_POLL_SLICE.min(deadline - now));
        }
    }
}

/// Result of one pass over [`Command::POLL_SEQUENCE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every request was issued, `failed` of them did not update the snapshot.
    Completed { failed: usize },
    /// A stop request arrived between two requests.
    Interrupted,
}

/// Owns the transport and the snapshot for the lifetime of the process.
#[derive(Debug)]
pub struct Poller<T: Transport> {
    transport: T,
    device_address: u8,
    retry: RetryPolicy,
    snapshot: TelemetrySnapshot,
    line_number: u64,
}

impl<T: Transport> Poller<T> {
    pub fn new(transport: T, device_address: u8) -> Self {
        Self {
            transport,
            device_address,
            retry: RetryPolicy::default(),
            snapshot: TelemetrySnapshot::new(),
            line_number: 1,
        }
    }

    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        log::trace!("set retry policy to {retry:?}");
        self.retry = retry;
    }

    pub fn snapshot(&self) -> &TelemetrySnapshot {
        &self.snapshot
    }

    /// Line number the next completed snapshot is handed over with.
    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn send_and_receive(&mut self, command: Command) -> Result<Vec<u8>> {
        let request = RequestFrame::new(command);
        log::trace!("write bytes: {request:?}");
        let written = self.transport.write(&*request)?;
        if written != request.len() {
            log::warn!("Short write - expected={} written={written}", request.len());
        }
        let rx_buffer = self.transport.read(RX_BUFFER_LENGTH)?;
        log::trace!("receive bytes: {rx_buffer:02X?}");
        Ok(rx_buffer)
    }

    /// Decodes a reply and merges it into the snapshot. Replies with an unknown command code are
    /// dropped without error.
    fn handle_reply(&mut self, requested: Command, rx_buffer: &[u8]) -> Result<()> {
        let frame = ResponseFrame::decode(rx_buffer, self.device_address)?;
        let command = match Command::try_from(frame.command) {
            Ok(command) => command,
            Err(err) => {
                log::debug!("Reply ignored: {err}");
                return Ok(());
            }
        };
        if command != requested {
            log::warn!(
                "Reply to {requested:?} carries command {:#04X}, decoding as {command:?}",
                frame.command
            );
        }
        let reply = Reply::decode(command, frame.payload, self.snapshot.layout)?;
        log::debug!("{reply:?}");
        self.snapshot.apply(reply);
        Ok(())
    }

    /// Issues one request within the retry budget.
    pub fn request(&mut self, command: Command) -> Result<()> {
        let attempts = self.retry.attempts();
        let mut attempt = 1;
        loop {
            let result = self
                .send_and_receive(command)
                .and_then(|rx_buffer| self.handle_reply(command, &rx_buffer));
            match result {
                Ok(()) => return Ok(()),
                Err(err) if attempt < attempts => {
                    log::debug!(
                        "Failed try {attempt} of {attempts} for {command:?}, repeating ({err})"
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Runs the nine requests once. Failures are logged and leave the affected fields untouched.
    pub fn poll_cycle(&mut self, shutdown: &Shutdown) -> CycleOutcome {
        let mut failed = 0;
        for command in Command::POLL_SEQUENCE {
            if shutdown.is_requested() {
                return CycleOutcome::Interrupted;
            }
            if let Err(err) = self.request(command) {
                log::warn!("Request {command:?} failed: {err}");
                failed += 1;
            }
        }
        CycleOutcome::Completed { failed }
    }

    /// Polls until `shutdown` is requested, handing every completed snapshot to `sink`.
    ///
    /// Sink failures are logged and do not stop the loop. The sink is flushed before returning.
    pub fn run<S: Sink>(
        &mut self,
        sink: &mut S,
        interval: Duration,
        shutdown: &Shutdown,
    ) -> Result<()> {
        log::info!("Start polling every {interval:?}");
        while !shutdown.is_requested() {
            match self.poll_cycle(shutdown) {
                CycleOutcome::Completed { failed } => {
                    if let Err(err) = sink.consume(self.line_number, &self.snapshot) {
                        log::error!("Cannot hand over line {}: {err}", self.line_number);
                    }
                    log::info!(
                        "Cycle {} complete, {failed} request(s) failed",
                        self.line_number
                    );
                    self.line_number += 1;
                }
                CycleOutcome::Interrupted => break,
            }
            if shutdown.sleep(interval) {
                break;
            }
        }
        log::info!("Polling stopped");
        sink.flush()
    }
}
