#![allow(dead_code)]

use bmslog_lib::poll::Shutdown;
use bmslog_lib::protocol::{checksum, Address, Command, FRAME_LENGTH};
use bmslog_lib::snapshot::{Sink, TelemetrySnapshot};
use bmslog_lib::transport::{Connector, Transport};
use bmslog_lib::{Error, Result};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// A 13 byte reply frame from `address` with the given command echo and data bytes.
pub fn frame_from(address: u8, command: u8, data: [u8; 8]) -> Vec<u8> {
    let mut frame = vec![0xa5, address, command, 0x08];
    frame.extend_from_slice(&data);
    frame.push(checksum(&frame));
    assert_eq!(frame.len(), FRAME_LENGTH);
    frame
}

pub fn frame(command: Command, data: [u8; 8]) -> Vec<u8> {
    frame_from(Address::Bms as u8, command.code(), data)
}

/// A healthy four cell, two sensor pack, one reply per request of a poll cycle.
pub fn healthy_cycle() -> Vec<Vec<u8>> {
    vec![
        // 52.3 V, 5.0 A, 80.5 %
        frame(Command::Soc, [0x02, 0x0b, 0x02, 0x0b, 0x75, 0x62, 0x03, 0x25]),
        frame(Command::CellVoltageRange, [0x0c, 0xee, 2, 0x0c, 0xda, 4, 0, 0]),
        frame(Command::TemperatureRange, [65, 1, 60, 2, 0, 0, 0, 0]),
        frame(Command::MosfetStatus, [1, 1, 1, 9, 0, 0, 0xa4, 0x10]),
        frame(Command::Status, [4, 2, 0, 1, 0x01, 0x00, 0x07, 0]),
        [
            frame(Command::CellVoltages, [1, 0x0c, 0xe4, 0x0c, 0xe5, 0x0c, 0xe6, 0]),
            frame(Command::CellVoltages, [2, 0x0c, 0xe7, 0, 0, 0, 0, 0]),
        ]
        .concat(),
        frame(Command::CellTemperatures, [1, 65, 60, 0, 0, 0, 0, 0]),
        frame(Command::CellBalanceState, [0, 1, 0, 1, 0, 0, 0, 0]),
        frame(Command::Alarms, [0b1011_0000, 0, 0, 0, 0, 0, 0, 0]),
    ]
}

/// Hands out scripted replies in order; `None` and an empty script read as a timeout.
#[derive(Debug)]
pub struct ScriptedTransport {
    pub replies: VecDeque<Option<Vec<u8>>>,
    pub writes: Rc<RefCell<Vec<Vec<u8>>>>,
    /// Requested as soon as this many frames were written.
    pub stop_after_writes: Option<(usize, Shutdown)>,
    closed: Option<(String, Rc<RefCell<HashMap<String, usize>>>)>,
}

impl ScriptedTransport {
    pub fn new(replies: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self::with_script(replies.into_iter().map(Some).collect(), None)
    }

    fn with_script(
        replies: VecDeque<Option<Vec<u8>>>,
        closed: Option<(String, Rc<RefCell<HashMap<String, usize>>>)>,
    ) -> Self {
        Self {
            replies,
            writes: Rc::default(),
            stop_after_writes: None,
            closed,
        }
    }

    pub fn push_timeout(&mut self) {
        self.replies.push_back(None);
    }

    pub fn push(&mut self, reply: Vec<u8>) {
        self.replies.push_back(Some(reply));
    }
}

impl Transport for ScriptedTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        self.writes.borrow_mut().push(bytes.to_vec());
        if let Some((count, shutdown)) = &self.stop_after_writes {
            if self.writes.borrow().len() >= *count {
                shutdown.request();
            }
        }
        Ok(bytes.len())
    }

    fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>> {
        match self.replies.pop_front().flatten() {
            Some(mut reply) => {
                reply.truncate(max_bytes);
                Ok(reply)
            }
            None => Err(Error::TransportTimeout),
        }
    }
}

impl Drop for ScriptedTransport {
    fn drop(&mut self) {
        if let Some((identifier, closed)) = &self.closed {
            *closed.borrow_mut().entry(identifier.clone()).or_default() += 1;
        }
    }
}

/// Opens a [`ScriptedTransport`] per identifier and counts how often each one is closed.
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    pub scripts: HashMap<String, Vec<Option<Vec<u8>>>>,
    pub unavailable: Vec<String>,
    pub opened: Vec<String>,
    pub closed: Rc<RefCell<HashMap<String, usize>>>,
}

impl ScriptedConnector {
    pub fn closed_count(&self, identifier: &str) -> usize {
        self.closed.borrow().get(identifier).copied().unwrap_or(0)
    }
}

impl Connector for ScriptedConnector {
    type Transport = ScriptedTransport;

    fn open(&mut self, identifier: &str) -> Result<ScriptedTransport> {
        if self.unavailable.iter().any(|name| name == identifier) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{identifier} does not exist"),
            )));
        }
        self.opened.push(identifier.to_string());
        let script = self.scripts.get(identifier).cloned().unwrap_or_default();
        Ok(ScriptedTransport::with_script(
            script.into(),
            Some((identifier.to_string(), self.closed.clone())),
        ))
    }
}

/// Keeps every snapshot it is handed, optionally requesting a stop after `stop_after` of them.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub lines: Vec<(u64, TelemetrySnapshot)>,
    pub flushes: usize,
    pub stop_after: Option<(usize, Shutdown)>,
}

impl Sink for RecordingSink {
    fn consume(&mut self, line_number: u64, snapshot: &TelemetrySnapshot) -> Result<()> {
        self.lines.push((line_number, snapshot.clone()));
        if let Some((count, shutdown)) = &self.stop_after {
            if self.lines.len() >= *count {
                shutdown.request();
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }
}
