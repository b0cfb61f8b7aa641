//! Our error types for the DPM86xx PSUs.

use thiserror::Error;

use crate::register::{DpmRegister, Setting};

pub type Result<T> = core::result::Result<T, Error>;

/// A response line which does not match the expected framing.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    #[error("response too short")]
    Truncated,
    #[error("response payload is not a decimal number")]
    NonDecimalPayload,
    #[error("response is not an acknowledgement for this device")]
    UnexpectedAck,
    #[error("frame does not fit the line buffer")]
    Overflow,
}

/// Custom error type for DPM86xx PSU communications.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("Writing '{command}' failed: only {written} of {expected} bytes written")]
    WriteTransmitFailed {
        command: String,
        written: usize,
        expected: usize,
    },
    #[error("No acknowledgement for '{command}', last response: '{response}'")]
    WriteAckTimeout { command: String, response: String },
    #[error("Sending '{command}' failed: only {written} of {expected} bytes written")]
    ReadTransmitFailed {
        command: String,
        written: usize,
        expected: usize,
    },
    #[error("No or strange response to '{command}': '{response}'")]
    ReadTimeout { command: String, response: String },
    #[error("Register {register:?} does not support {operation}")]
    RegisterAccess {
        register: DpmRegister,
        operation: &'static str,
    },
    #[error("Value {value} out of range for register {register:?} (max {max})")]
    RegisterOutOfRange {
        register: DpmRegister,
        value: u32,
        max: u32,
    },
    #[error("Value {value} for {setting} setting out of range ({min}..={max})")]
    SettingOutOfRange {
        setting: Setting,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("The {0} setting is read only")]
    ReadOnlySetting(Setting),
    #[error("Invalid value {value} received for register {register:?}")]
    InvalidResponse { register: DpmRegister, value: u32 },
}

impl Error {
    /// Whether this error was raised by the link rather than by validating our own input.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::WriteTransmitFailed { .. }
                | Error::WriteAckTimeout { .. }
                | Error::ReadTransmitFailed { .. }
                | Error::ReadTimeout { .. }
        )
    }
}
