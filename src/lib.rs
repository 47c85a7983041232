#![cfg_attr(docsrs, feature(doc_cfg))]
//! # bmslog_lib
//!
//! This crate polls a Daly BMS (Battery Management System) over a serial link, decodes the
//! telemetry replies into a [`snapshot::TelemetrySnapshot`] and hands one snapshot per poll
//! cycle to a [`snapshot::Sink`].
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `bmslog` command-line tool.
//!
//! ### Client Features
//! - `serialport`: Enables the serial port transport using the `serialport` crate.
//!
//! ### Utility Features
//! - `serde`: Enables `serde` support for serializing decoded replies and snapshots.
//! - `bin-dependencies`: Enables all features required by the `bmslog` binary executable.

/// Contains error types for the library.
mod error;
/// Handshake that finds the serial endpoint of the BMS.
pub mod discovery;
/// The request/response loop.
pub mod poll;
/// Defines the communication protocol for Daly BMS.
pub mod protocol;
pub mod reassembly;
pub mod snapshot;
pub mod transport;

pub use error::{Error, Result};

/// Serial port transport for BMS communication.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;
