use crate::reassembly::{self, CELL_TEMPERATURES, CELL_VOLTAGES};
use crate::{Error, Result};
use std::fmt;
use std::ops::Deref;

#[cfg(feature = "serde")]
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Address {
    Host = 0x40,
    /// Address every reply is expected to carry, learned from the discovery handshake.
    Bms = 0x01,
}

// https://minimalmodbus.readthedocs.io/en/stable/serialcommunication.html#timing-of-the-serial-communications
// minimum delay 4ms by baud rate 9600
pub const MINIMUM_DELAY: std::time::Duration = std::time::Duration::from_millis(4);

pub const FRAME_LENGTH: usize = 13;
/// Largest single read issued to the transport.
pub const RX_BUFFER_LENGTH: usize = 300;
pub const MAX_CELLS: usize = 16;
pub const MAX_TEMPERATURE_SENSORS: usize = 4;

const START_BYTE: u8 = 0xa5;
const DATA_LENGTH: u8 = 0x08;
const PAYLOAD_OFFSET: usize = 4;
const TEMPERATURE_OFFSET: i16 = 40;
const CURRENT_OFFSET: i32 = 30000;

macro_rules! read_bit {
    ($byte:expr,$position:expr) => {
        ($byte >> $position) & 1 != 0
    };
}

/// The read commands issued by a poll cycle, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Soc = 0x90,
    CellVoltageRange = 0x91,
    TemperatureRange = 0x92,
    MosfetStatus = 0x93,
    Status = 0x94,
    CellVoltages = 0x95,
    CellTemperatures = 0x96,
    CellBalanceState = 0x97,
    Alarms = 0x98,
}

impl Command {
    /// Status has to precede the per-cell commands, it announces the cell and sensor counts.
    pub const POLL_SEQUENCE: [Command; 9] = [
        Command::Soc,
        Command::CellVoltageRange,
        Command::TemperatureRange,
        Command::MosfetStatus,
        Command::Status,
        Command::CellVoltages,
        Command::CellTemperatures,
        Command::CellBalanceState,
        Command::Alarms,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        Ok(match code {
            0x90 => Command::Soc,
            0x91 => Command::CellVoltageRange,
            0x92 => Command::TemperatureRange,
            0x93 => Command::MosfetStatus,
            0x94 => Command::Status,
            0x95 => Command::CellVoltages,
            0x96 => Command::CellTemperatures,
            0x97 => Command::CellBalanceState,
            0x98 => Command::Alarms,
            other => return Err(Error::UnknownCommand(other)),
        })
    }
}

/// Sum of all bytes modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// A 13 byte request as sent by the host.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestFrame([u8; FRAME_LENGTH]);

impl RequestFrame {
    pub fn new(command: Command) -> Self {
        let mut tx_buffer = [0; FRAME_LENGTH];
        tx_buffer[0] = START_BYTE;
        tx_buffer[1] = Address::Host as u8;
        tx_buffer[2] = command.code();
        tx_buffer[3] = DATA_LENGTH;
        tx_buffer[FRAME_LENGTH - 1] = checksum(&tx_buffer[..FRAME_LENGTH - 1]);
        Self(tx_buffer)
    }
}

impl Deref for RequestFrame {
    type Target = [u8; FRAME_LENGTH];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for RequestFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X?}", self.0)
    }
}

/// A validated view into a reply buffer.
///
/// Only the framing bytes are checked, the BMS checksum is not asserted on replies.
#[derive(Debug, Clone, Copy)]
pub struct ResponseFrame<'a> {
    pub address: u8,
    pub command: u8,
    pub length: u8,
    /// Everything from offset 4 onwards, subsequent subframes included.
    pub payload: &'a [u8],
}

impl<'a> ResponseFrame<'a> {
    pub fn decode(rx_buffer: &'a [u8], device_address: u8) -> Result<Self> {
        if rx_buffer.len() < FRAME_LENGTH {
            log::warn!(
                "Invalid buffer size - required={} received={}",
                FRAME_LENGTH,
                rx_buffer.len()
            );
            return Err(Error::FrameTooShort {
                required: FRAME_LENGTH,
                received: rx_buffer.len(),
            });
        }
        if rx_buffer[0] != START_BYTE {
            return Err(Error::BadSync(rx_buffer[0]));
        }
        if rx_buffer[1] != device_address {
            return Err(Error::UnexpectedAddress {
                expected: device_address,
                received: rx_buffer[1],
            });
        }
        Ok(Self {
            address: rx_buffer[1],
            command: rx_buffer[2],
            length: rx_buffer[3],
            payload: &rx_buffer[PAYLOAD_OFFSET..],
        })
    }
}

fn validate_len(payload: &[u8], required: usize) -> Result<()> {
    if payload.len() < required {
        return Err(Error::FrameTooShort {
            required: PAYLOAD_OFFSET + required,
            received: PAYLOAD_OFFSET + payload.len(),
        });
    }
    Ok(())
}

fn offset_temperature(raw: u8) -> i16 {
    // The BMS adds 40 to avoid having to deal with negative numbers
    i16::from(raw) - TEMPERATURE_OFFSET
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Soc {
    pub total_voltage: f32,
    pub collected_voltage: f32,
    pub current: f32, // negative=charging, positive=discharging
    pub soc_percent: f32,
}

impl Soc {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        validate_len(payload, 8)?;
        Ok(Self {
            total_voltage: u16::from_be_bytes([payload[0], payload[1]]) as f32 * 0.1,
            collected_voltage: u16::from_be_bytes([payload[2], payload[3]]) as f32 * 0.1,
            current: (i32::from(u16::from_be_bytes([payload[4], payload[5]])) - CURRENT_OFFSET)
                as f32
                * 0.1,
            soc_percent: u16::from_be_bytes([payload[6], payload[7]]) as f32 * 0.1,
        })
    }
}

/// Highest and lowest single cell voltage in millivolt.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct CellVoltageRange {
    pub highest_voltage: u16,
    pub highest_cell: u8,
    pub lowest_voltage: u16,
    pub lowest_cell: u8,
}

impl CellVoltageRange {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        validate_len(payload, 6)?;
        Ok(Self {
            highest_voltage: u16::from_be_bytes([payload[0], payload[1]]),
            highest_cell: payload[2],
            lowest_voltage: u16::from_be_bytes([payload[3], payload[4]]),
            lowest_cell: payload[5],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct TemperatureRange {
    pub highest_temperature: i16,
    pub highest_sensor: u8,
    pub lowest_temperature: i16,
    pub lowest_sensor: u8,
}

impl TemperatureRange {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        validate_len(payload, 4)?;
        Ok(Self {
            highest_temperature: offset_temperature(payload[0]),
            highest_sensor: payload[1],
            lowest_temperature: offset_temperature(payload[2]),
            lowest_sensor: payload[3],
        })
    }
}

/// Raw charge/discharge state and MOS bytes, kept as the BMS reports them
/// (0 = stationary, 1 = charging, 2 = discharging).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct MosfetStatus {
    pub charge_discharge_status: u8,
    pub charging_mosfet: u8,
    pub discharging_mosfet: u8,
    pub bms_life: u8,
    pub remaining_capacity_mah: u32,
}

impl MosfetStatus {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        validate_len(payload, 8)?;
        Ok(Self {
            charge_discharge_status: payload[0],
            charging_mosfet: payload[1],
            discharging_mosfet: payload[2],
            bms_life: payload[3],
            remaining_capacity_mah: u32::from_be_bytes([
                payload[4], payload[5], payload[6], payload[7],
            ]),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct IOState {
    pub di1: bool,
    pub di2: bool,
    pub di3: bool,
    pub di4: bool,
    pub do1: bool,
    pub do2: bool,
    pub do3: bool,
    pub do4: bool,
}

impl From<u8> for IOState {
    fn from(states: u8) -> Self {
        Self {
            di1: read_bit!(states, 0),
            di2: read_bit!(states, 1),
            di3: read_bit!(states, 2),
            di4: read_bit!(states, 3),
            do1: read_bit!(states, 4),
            do2: read_bit!(states, 5),
            do3: read_bit!(states, 6),
            do4: read_bit!(states, 7),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Status {
    pub cells: u8,
    pub temperature_sensors: u8,
    pub charger_status: u8,
    pub load_status: u8,
    pub states: IOState,
    pub cycles: u16,
}

impl Status {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        validate_len(payload, 7)?;
        Ok(Self {
            cells: payload[0],
            temperature_sensors: payload[1],
            charger_status: payload[2],
            load_status: payload[3],
            states: IOState::from(payload[4]),
            cycles: u16::from_be_bytes([payload[5], payload[6]]),
        })
    }
}

/// Cell and sensor counts announced by the status reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PackLayout {
    pub cells: u8,
    pub temperature_sensors: u8,
}

impl From<&Status> for PackLayout {
    fn from(status: &Status) -> Self {
        Self {
            cells: status.cells,
            temperature_sensors: status.temperature_sensors,
        }
    }
}

/// Cell voltages in millivolt, in cell order.
pub fn decode_cell_voltages(payload: &[u8], n_cells: u8) -> Result<Vec<u16>> {
    reassembly::reassemble(payload, &CELL_VOLTAGES, n_cells, |item| {
        u16::from_be_bytes([item[0], item[1]])
    })
}

/// Sensor temperatures in °C, in sensor order.
pub fn decode_cell_temperatures(payload: &[u8], n_sensors: u8) -> Result<Vec<i16>> {
    reassembly::reassemble(payload, &CELL_TEMPERATURES, n_sensors, |item| {
        offset_temperature(item[0])
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct BalanceState {
    /// One status byte per cell, the byte at payload offset `i` belongs to cell `i`.
    ///
    /// The reply is a single block with eight data bytes, so at most the first eight cells are
    /// reported; the remaining cells of a larger pack are absent.
    pub cells: Vec<u8>,
    pub active: bool,
}

impl BalanceState {
    pub fn decode(payload: &[u8], n_cells: u8) -> Result<Self> {
        let n_cells = usize::from(n_cells);
        if n_cells > MAX_CELLS {
            return Err(Error::CapacityExceeded {
                count: n_cells as u8,
                capacity: MAX_CELLS,
            });
        }
        let reported = n_cells.min(usize::from(DATA_LENGTH)).min(payload.len());
        if reported < n_cells {
            log::debug!("Balancing reported for {reported} of {n_cells} cells");
        }
        let cells = payload[..reported].to_vec();
        let active = cells.iter().any(|state| *state != 0);
        Ok(Self { cells, active })
    }
}

/// One alarm byte, rendered MSB first as an 8 character binary string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlarmBitmap(pub u8);

impl AlarmBitmap {
    pub fn is_set(self, bit: u8) -> bool {
        bit < 8 && read_bit!(self.0, bit)
    }
}

impl fmt::Display for AlarmBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08b}", self.0)
    }
}

#[cfg(feature = "serde")]
impl Serialize for AlarmBitmap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

pub const ALARM_BYTES: usize = 8;

pub fn decode_alarms(payload: &[u8]) -> Result<[AlarmBitmap; ALARM_BYTES]> {
    validate_len(payload, ALARM_BYTES)?;
    let mut alarms = [AlarmBitmap::default(); ALARM_BYTES];
    for (alarm, byte) in alarms.iter_mut().zip(payload) {
        *alarm = AlarmBitmap(*byte);
    }
    Ok(alarms)
}

/// A decoded reply, one variant per command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Soc(Soc),
    CellVoltageRange(CellVoltageRange),
    TemperatureRange(TemperatureRange),
    MosfetStatus(MosfetStatus),
    Status(Status),
    CellVoltages(Vec<u16>),
    CellTemperatures(Vec<i16>),
    CellBalanceState(BalanceState),
    Alarms([AlarmBitmap; ALARM_BYTES]),
}

impl Reply {
    /// Decodes the payload according to `command`.
    ///
    /// Per-cell replies need the counts of the last status reply and fail with
    /// [`Error::LayoutUnknown`] without them.
    pub fn decode(command: Command, payload: &[u8], layout: Option<PackLayout>) -> Result<Self> {
        let known_layout = || layout.ok_or(Error::LayoutUnknown);
        Ok(match command {
            Command::Soc => Reply::Soc(Soc::decode(payload)?),
            Command::CellVoltageRange => {
                Reply::CellVoltageRange(CellVoltageRange::decode(payload)?)
            }
            Command::TemperatureRange => {
                Reply::TemperatureRange(TemperatureRange::decode(payload)?)
            }
            Command::MosfetStatus => Reply::MosfetStatus(MosfetStatus::decode(payload)?),
            Command::Status => Reply::Status(Status::decode(payload)?),
            Command::CellVoltages => {
                Reply::CellVoltages(decode_cell_voltages(payload, known_layout()?.cells)?)
            }
            Command::CellTemperatures => Reply::CellTemperatures(decode_cell_temperatures(
                payload,
                known_layout()?.temperature_sensors,
            )?),
            Command::CellBalanceState => {
                Reply::CellBalanceState(BalanceState::decode(payload, known_layout()?.cells)?)
            }
            Command::Alarms => Reply::Alarms(decode_alarms(payload)?),
        })
    }
}
