use crate::protocol::MINIMUM_DELAY;
use crate::transport::{Connector, Transport};
use crate::{Error, Result};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

/// Read and write deadlines of a serial link.
///
/// A read may take `read_constant + read_multiplier * max_bytes` in total and ends early once
/// no further byte arrives within `read_interval` after the first one. Writes are bounded by
/// `write_constant + write_multiplier * len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialTimeouts {
    pub read_interval: Duration,
    pub read_constant: Duration,
    pub read_multiplier: Duration,
    pub write_constant: Duration,
    pub write_multiplier: Duration,
}

impl Default for SerialTimeouts {
    fn default() -> Self {
        Self {
            read_interval: Duration::from_millis(50),
            read_constant: Duration::from_millis(50),
            read_multiplier: Duration::from_millis(10),
            write_constant: Duration::from_millis(50),
            write_multiplier: Duration::from_millis(10),
        }
    }
}

impl SerialTimeouts {
    pub fn read_total(&self, max_bytes: usize) -> Duration {
        self.read_constant + self.read_multiplier * max_bytes as u32
    }

    pub fn write_total(&self, len: usize) -> Duration {
        self.write_constant + self.write_multiplier * len as u32
    }
}

/// A BMS link over a local serial port, 9600 baud 8N1.
#[derive(Debug)]
pub struct SerialTransport {
    serial: Box<dyn serialport::SerialPort>,
    timeouts: SerialTimeouts,
    last_execution: Instant,
    delay: Duration,
}

impl SerialTransport {
    pub fn new(port: &str, timeouts: SerialTimeouts) -> Result<Self> {
        Ok(Self {
            serial: serialport::new(port, 9600)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                .flow_control(serialport::FlowControl::None)
                .timeout(timeouts.read_constant)
                .open()?,
            timeouts,
            last_execution: Instant::now(),
            delay: MINIMUM_DELAY,
        })
    }

    pub fn set_delay(&mut self, delay: Duration) {
        if delay < MINIMUM_DELAY {
            log::warn!("delay {delay:?} lower minimum {MINIMUM_DELAY:?}, use minimum");
        }
        self.delay = Duration::max(delay, MINIMUM_DELAY);
    }

    fn serial_await_delay(&self) {
        let last_exec_diff = Instant::now().duration_since(self.last_execution);
        if let Some(time_until_delay_reached) = self.delay.checked_sub(last_exec_diff) {
            std::thread::sleep(time_until_delay_reached);
        }
    }

    // clear all incoming serial to avoid data collision
    fn drain_pending(&mut self) -> Result<()> {
        loop {
            let pending = self.serial.bytes_to_read()?;
            if pending == 0 {
                return Ok(());
            }
            log::trace!("Got {} pending bytes", pending);
            let mut buf: Vec<u8> = vec![0; 64];
            self.serial.set_timeout(self.timeouts.read_interval)?;
            let received = self.serial.read(buf.as_mut_slice())?;
            log::trace!("Read {} pending bytes", received);
        }
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        self.drain_pending()?;
        self.serial_await_delay();

        self.serial.set_timeout(self.timeouts.write_total(bytes.len()))?;
        match self.serial.write_all(bytes) {
            Ok(()) => Ok(bytes.len()),
            Err(err) if err.kind() == ErrorKind::TimedOut => Err(Error::TransportTimeout),
            Err(err) => Err(err.into()),
        }
    }

    fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.timeouts.read_total(max_bytes);
        let mut rx_buffer = vec![0; max_bytes];
        let mut received = 0;

        while received < max_bytes {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;
            let wait = if received == 0 {
                remaining
            } else {
                remaining.min(self.timeouts.read_interval)
            };
            self.serial.set_timeout(wait)?;
            match self.serial.read(&mut rx_buffer[received..]) {
                Ok(0) => break,
                Ok(n) => received += n,
                Err(err) if err.kind() == ErrorKind::TimedOut => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        self.last_execution = Instant::now();

        if received == 0 {
            return Err(Error::TransportTimeout);
        }
        rx_buffer.truncate(received);
        log::trace!("receive_bytes: {:02X?}", rx_buffer);
        Ok(rx_buffer)
    }
}

/// Opens serial ports by device name with fixed timeouts.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    pub timeouts: SerialTimeouts,
    pub delay: Duration,
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self {
            timeouts: SerialTimeouts::default(),
            delay: MINIMUM_DELAY,
        }
    }
}

impl Connector for SerialConnector {
    type Transport = SerialTransport;

    fn open(&mut self, identifier: &str) -> Result<SerialTransport> {
        let mut transport = SerialTransport::new(identifier, self.timeouts)?;
        transport.set_delay(self.delay);
        Ok(transport)
    }
}
