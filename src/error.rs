/// Errors raised while talking to the BMS or decoding its replies.
///
/// Everything except [`Error::DiscoveryExhausted`] is recovered inside the poll cycle: the failure
/// is logged and the affected snapshot fields keep their previous values.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Frame too short - required={required} received={received}")]
    FrameTooShort { required: usize, received: usize },
    #[error("Bad sync byte {0:#04X}")]
    BadSync(u8),
    #[error("Unexpected address - expected={expected:#04X} received={received:#04X}")]
    UnexpectedAddress { expected: u8, received: u8 },
    #[error("Unexpected command echo - expected={expected:#04X} received={received:#04X}")]
    UnexpectedCommand { expected: u8, received: u8 },
    #[error("Unknown command {0:#04X}")]
    UnknownCommand(u8),
    #[error("Subframe out of order - expected={expected} received={received}")]
    SequenceMismatch { expected: u8, received: u8 },
    #[error("Count of {count} exceeds capacity of {capacity}")]
    CapacityExceeded { count: u8, capacity: usize },
    /// Cell or sensor count is not known yet, a status reply (0x94) has to be decoded first.
    #[error("Pack layout unknown, status has to be read at least once before")]
    LayoutUnknown,
    #[error("Transport timeout")]
    TransportTimeout,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "serialport")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("No BMS found after probing {tried} candidate(s)")]
    DiscoveryExhausted { tried: usize },
    #[error("Sink error: {0}")]
    Sink(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
