//! Encoding and decoding of the DPM86xx ASCII line protocol.
//!
//! Requests look like `:01w11=3960,,\n` (write) or `:01r30=0,,\n` (read). The device answers a
//! write with `:01ok` followed by a two byte line ending, and a read with a seven byte header,
//! the decimal value and a three byte trailer.

use core::fmt::{self, Write as _};

use strum_macros::Display;

use crate::{error::FramingError, register::DpmRegister};

/// Long enough for the largest request: `:99w33=4294967295,,\n`.
pub const FRAME_CAPACITY: usize = 24;

/// Encoded request, ready to be written to the link.
pub type FrameBuf = heapless::String<FRAME_CAPACITY>;

const READ_HEADER_LEN: usize = 7;
const READ_TRAILER_LEN: usize = 3;
const ACK_TRAILER_LEN: usize = 2;

/// Bus address of the supply. Always rendered as two decimal digits.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceAddress(u8);

impl DeviceAddress {
    pub const MAX: u8 = 99;

    /// Returns `None` if the address does not fit in two digits.
    pub const fn new(address: u8) -> Option<Self> {
        if address <= Self::MAX {
            Some(Self(address))
        } else {
            None
        }
    }

    pub const fn value(self) -> u8 {
        self.0
    }
}

impl Default for DeviceAddress {
    /// Factory default of the DPM86xx series.
    fn default() -> Self {
        Self(1)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
pub enum Direction {
    #[strum(serialize = "r")]
    Read,
    #[strum(serialize = "w")]
    Write,
}

/// A single request to the supply.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Frame {
    pub address: DeviceAddress,
    pub direction: Direction,
    pub register: DpmRegister,
    pub value: u32,
}

impl Frame {
    pub fn read(address: DeviceAddress, register: DpmRegister) -> Self {
        Self {
            address,
            direction: Direction::Read,
            register,
            value: 0,
        }
    }

    pub fn write(address: DeviceAddress, register: DpmRegister, value: u32) -> Self {
        Self {
            address,
            direction: Direction::Write,
            register,
            value,
        }
    }

    /// Serialize into the bytes sent on the wire, including the trailing newline.
    pub fn encode(&self) -> Result<FrameBuf, FramingError> {
        let mut buf = FrameBuf::new();
        writeln!(buf, "{self}").map_err(|_| FramingError::Overflow)?;
        Ok(buf)
    }
}

/// The request without its line terminator, as used in diagnostics.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ":{}{}{}={},,",
            self.address, self.direction, self.register, self.value
        )
    }
}

/// Extract the value from the response to a read request.
pub fn decode_read_response(line: &[u8]) -> Result<u32, FramingError> {
    if line.len() < READ_HEADER_LEN + READ_TRAILER_LEN {
        return Err(FramingError::Truncated);
    }
    let payload = &line[READ_HEADER_LEN..line.len() - READ_TRAILER_LEN];
    if payload.is_empty() || !payload.iter().all(u8::is_ascii_digit) {
        return Err(FramingError::NonDecimalPayload);
    }

    // All digits, so this can only fail on overflow.
    core::str::from_utf8(payload)
        .ok()
        .and_then(|digits| digits.parse::<u32>().ok())
        .ok_or(FramingError::NonDecimalPayload)
}

/// Check that `line` acknowledges a write to the supply at `address`.
pub fn decode_write_ack(line: &[u8], address: DeviceAddress) -> Result<(), FramingError> {
    if line.len() < ACK_TRAILER_LEN {
        return Err(FramingError::Truncated);
    }
    let body = &line[..line.len() - ACK_TRAILER_LEN];

    let mut expected: heapless::String<8> = heapless::String::new();
    write!(expected, ":{address}ok").map_err(|_| FramingError::Overflow)?;

    if body == expected.as_bytes() {
        Ok(())
    } else {
        Err(FramingError::UnexpectedAck)
    }
}
