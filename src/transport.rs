//! The narrow byte-level interface the protocol layer needs from a serial link.

use crate::Result;
use std::ops::RangeInclusive;

/// A point-to-point link to one responder.
///
/// Both calls block at most for the timeouts the link was configured with. Closing happens on
/// drop.
pub trait Transport {
    /// Writes the whole frame and returns the number of bytes written.
    fn write(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Reads up to `max_bytes`. Fails with [`crate::Error::TransportTimeout`] when nothing arrived.
    fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        (**self).write(bytes)
    }

    fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>> {
        (**self).read(max_bytes)
    }
}

/// Opens transports by identifier, e.g. a serial device path.
pub trait Connector {
    type Transport: Transport;

    fn open(&mut self, identifier: &str) -> Result<Self::Transport>;
}

/// Numbered endpoint names such as `COM1 ..= COM256`, in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePorts {
    prefix: String,
    numbers: RangeInclusive<u16>,
}

impl CandidatePorts {
    pub fn new(prefix: impl Into<String>, numbers: RangeInclusive<u16>) -> Self {
        Self {
            prefix: prefix.into(),
            numbers,
        }
    }

    /// Same numbers, different device name prefix.
    pub fn with_prefix(self, prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..self
        }
    }

    pub fn name(&self, number: u16) -> String {
        format!("{}{}", self.prefix, number)
    }

    pub fn iter(&self) -> impl Iterator<Item = String> + '_ {
        self.numbers.clone().map(|number| self.name(number))
    }

    /// Port numbers of the platform namespace: `1..=256` on Windows, `0..=255` elsewhere.
    pub fn default_numbers() -> RangeInclusive<u16> {
        if cfg!(target_os = "windows") {
            1..=256
        } else {
            0..=255
        }
    }
}

impl Default for CandidatePorts {
    fn default() -> Self {
        let prefix = if cfg!(target_os = "windows") {
            "COM"
        } else {
            "/dev/ttyUSB"
        };
        Self::new(prefix, Self::default_numbers())
    }
}
