//! This crate drives a Joy-IT DPM86xx programmable power supply as a solar diversion controller.
//!
//! The supply feeds a grid-tie micro inverter from a battery. Grid consumption is sampled from a
//! volkszaehler.org middleware, and the supply's current setting is adjusted so the inverter
//! covers what the household draws from the grid.
//!
//! Supply models which this should work with:
//! * DPM8605
//! * DPM8608
//! * DPM8616
//! * DPM8624
//!
//! It uses the supplies' simple ASCII protocol (`:01r30=0,,`), over a USB-serial or RS485 adapter.
//!
//! The serial port used for supply comms should be configured like so:
//! * Default baud rate: 9600
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None

pub mod config;
pub mod control;
pub mod error;
pub mod frame;
pub mod metering;
pub mod psu;
pub mod register;
pub mod scaling;
pub mod serial;
pub mod status;
pub mod transport;

#[cfg(test)]
mod mock_serial;
