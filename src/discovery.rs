//! Locates the serial endpoint the BMS is attached to.
//!
//! A candidate is accepted when it answers the SOC request with a well formed frame from
//! address 0x01 that echoes command 0x90.

use crate::protocol::{Address, Command, RequestFrame, ResponseFrame, RX_BUFFER_LENGTH};
use crate::transport::{Connector, Transport};
use crate::{Error, Result};
use std::time::Duration;

/// Delay between opening a candidate and sending the probe.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

const PROBE_COMMAND: Command = Command::Soc;

/// The accepted endpoint, ready for polling.
#[derive(Debug)]
pub struct Discovered<T> {
    pub identifier: String,
    pub transport: T,
    pub device_address: u8,
}

/// One write, one read, then checks the framing of the answer.
pub fn probe<T: Transport>(transport: &mut T) -> Result<u8> {
    let request = RequestFrame::new(PROBE_COMMAND);
    log::trace!("probe write bytes: {request:?}");
    transport.write(&*request)?;

    let rx_buffer = transport.read(RX_BUFFER_LENGTH)?;
    log::trace!("probe receive bytes: {rx_buffer:02X?}");

    let frame = ResponseFrame::decode(&rx_buffer, Address::Bms as u8)?;
    if frame.command != PROBE_COMMAND.code() {
        return Err(Error::UnexpectedCommand {
            expected: PROBE_COMMAND.code(),
            received: frame.command,
        });
    }
    Ok(frame.address)
}

/// Tries `candidates` in order and returns the first one that passes [`probe`].
///
/// Rejected transports are dropped, and with them closed, before the next candidate is opened.
pub fn discover<C, I>(
    connector: &mut C,
    candidates: I,
    settle: Duration,
) -> Result<Discovered<C::Transport>>
where
    C: Connector,
    I: IntoIterator<Item = String>,
{
    let mut tried = 0;
    for identifier in candidates {
        tried += 1;
        log::debug!("Trying port {identifier}");
        let mut transport = match connector.open(&identifier) {
            Ok(transport) => transport,
            Err(err) => {
                log::debug!("Unable to open {identifier}: {err}");
                continue;
            }
        };

        if !settle.is_zero() {
            std::thread::sleep(settle);
        }

        match probe(&mut transport) {
            Ok(device_address) => {
                log::info!("Found the BMS on {identifier}");
                return Ok(Discovered {
                    identifier,
                    transport,
                    device_address,
                });
            }
            Err(err) => {
                log::debug!("{identifier} rejected: {err}");
            }
        }
    }
    Err(Error::DiscoveryExhausted { tried })
}
