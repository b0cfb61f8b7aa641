//! Request/response exchange with the supply over a half-duplex serial link.

use embedded_io::{Error as _, ErrorKind};
use fugit::MillisDurationU32;
use tracing::{debug, warn};

use crate::{
    error::{Error, FramingError, Result},
    frame::{self, DeviceAddress, Frame, FrameBuf},
    register::DpmRegister,
};

/// Blocking pause, used for retry backoff and pacing.
pub trait Delay {
    fn delay(&mut self, duration: MillisDurationU32);
}

/// [`Delay`] backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn delay(&mut self, duration: MillisDurationU32) {
        std::thread::sleep(std::time::Duration::from_millis(u64::from(
            duration.to_millis(),
        )));
    }
}

/// How often an exchange is attempted, and how long to back off between attempts.
///
/// After failed attempt `n` (counting from zero) the transport waits `n * backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u8,
    pub backoff: MillisDurationU32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: MillisDurationU32::millis(200),
        }
    }
}

/// A single line received from the link. Overlong lines are truncated.
type Line<const L: usize> = heapless::Vec<u8, L>;

/// Owns the serial link to one supply. You can create a Transport using any interface which
/// implements [embedded_io::Read] & [embedded_io::Write].
///
/// Every exchange takes `&mut self` and runs to completion (response or exhausted retries)
/// before returning, so requests are never interleaved on the link.
pub struct Transport<S: embedded_io::Read + embedded_io::Write, D: Delay, const L: usize = 64> {
    interface: S,
    delay: D,
    address: DeviceAddress,
    retry: RetryPolicy,
}

impl<S: embedded_io::Read + embedded_io::Write, D: Delay, const L: usize> Transport<S, D, L> {
    pub fn new(interface: S, delay: D, address: DeviceAddress, retry: RetryPolicy) -> Self {
        Self {
            interface,
            delay,
            address,
            retry,
        }
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Pause using this transport's delay.
    pub fn pause(&mut self, duration: MillisDurationU32) {
        self.delay.delay(duration);
    }

    /// Give back the underlying interface.
    pub fn release(self) -> S {
        self.interface
    }

    /// Write a raw value to a register and wait for the acknowledgement.
    pub fn write_register(&mut self, register: DpmRegister, value: u32) -> Result<()> {
        if !register.access().writable() {
            return Err(Error::RegisterAccess {
                register,
                operation: "writing",
            });
        }
        if let Some((min, max)) = register.write_bounds() {
            if value < min || value > max {
                return Err(Error::RegisterOutOfRange {
                    register,
                    value,
                    max,
                });
            }
        }

        let frame = Frame::write(self.address, register, value);
        let bytes = frame.encode()?;
        if let Err(written) = self.transmit(&frame, &bytes) {
            return Err(Error::WriteTransmitFailed {
                command: frame.to_string(),
                written,
                expected: bytes.len(),
            });
        }

        let address = self.address;
        self.receive(&frame, |line| frame::decode_write_ack(line, address))
            .map_err(|response| Error::WriteAckTimeout {
                command: frame.to_string(),
                response,
            })
    }

    /// Read the raw value of a register.
    pub fn read_register(&mut self, register: DpmRegister) -> Result<u32> {
        if !register.access().readable() {
            return Err(Error::RegisterAccess {
                register,
                operation: "reading",
            });
        }

        let frame = Frame::read(self.address, register);
        let bytes = frame.encode()?;
        if let Err(written) = self.transmit(&frame, &bytes) {
            return Err(Error::ReadTransmitFailed {
                command: frame.to_string(),
                written,
                expected: bytes.len(),
            });
        }

        self.receive(&frame, frame::decode_read_response)
            .map_err(|response| Error::ReadTimeout {
                command: frame.to_string(),
                response,
            })
    }

    /// Wait `attempt * backoff` after a failed attempt, unless it was the last one.
    fn backoff(&mut self, attempt: u8) {
        if attempt + 1 < self.retry.attempts && attempt > 0 {
            self.delay.delay(self.retry.backoff * u32::from(attempt));
        }
    }

    /// Send the whole frame, retrying short writes.
    ///
    /// On failure returns the byte count accepted by the last attempt.
    fn transmit(&mut self, frame: &Frame, bytes: &FrameBuf) -> core::result::Result<(), usize> {
        let mut written = 0;
        for attempt in 0..self.retry.attempts {
            written = match self.interface.write(bytes.as_bytes()) {
                Ok(count) => count,
                Err(e) => {
                    warn!(%frame, kind = ?e.kind(), "serial write failed");
                    0
                }
            };
            if written == bytes.len() {
                debug!(%frame, attempt, "sent");
                return Ok(());
            }
            warn!(%frame, attempt, written, expected = bytes.len(), "short write");
            self.backoff(attempt);
        }
        Err(written)
    }

    /// Read response lines until one decodes, up to the retry limit.
    ///
    /// On failure returns the last line seen (empty if nothing was ever received).
    fn receive<T>(
        &mut self,
        frame: &Frame,
        decode: impl Fn(&[u8]) -> core::result::Result<T, FramingError>,
    ) -> core::result::Result<T, String> {
        let mut last_response = String::new();
        for attempt in 0..self.retry.attempts {
            match self.read_line() {
                Ok((line, overflowed)) => {
                    let text = String::from_utf8_lossy(&line);
                    let decoded = if overflowed {
                        Err(FramingError::Overflow)
                    } else {
                        decode(line.as_slice())
                    };
                    match decoded {
                        Ok(value) => {
                            debug!(%frame, response = %text.trim_end(), attempt, "received");
                            return Ok(value);
                        }
                        Err(e) => {
                            warn!(%frame, response = %text.trim_end(), attempt, error = %e, "unexpected response");
                        }
                    }
                    if !line.is_empty() {
                        last_response = text.into_owned();
                    }
                }
                Err(kind) => {
                    warn!(%frame, attempt, ?kind, "serial read failed");
                }
            }
            self.backoff(attempt);
        }
        Err(last_response)
    }

    /// Read bytes up to and including a newline.
    ///
    /// A read timeout (or end of stream) ends the line early, possibly empty. Bytes beyond the
    /// buffer capacity are drained up to the newline and dropped, and the line is flagged as
    /// overflowed.
    fn read_line(&mut self) -> core::result::Result<(Line<L>, bool), ErrorKind> {
        let mut line = Line::<L>::new();
        let mut overflowed = false;
        let mut byte = [0u8; 1];
        loop {
            match self.interface.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    if line.push(byte[0]).is_err() {
                        overflowed = true;
                    }
                    if byte[0] == b'\n' {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) => return Err(e.kind()),
            }
        }
        Ok((line, overflowed))
    }
}
