//! We use this mocking module in unit tests to emulate a serial port with a DPM86xx attached.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use fugit::MillisDurationU32;
use thiserror::Error;

use crate::transport::Delay;

/// Our mock type used to emulate a serial port.
///
/// Responses are queued as chunks. An empty chunk makes the next `read()` time out, which is
/// how a silent device looks through a serial port with a read timeout configured.
#[derive(Default)]
pub struct MockSerial {
    /// Everything written to the mock serial port.
    written: Vec<u8>,
    /// Number of calls to `write()`.
    write_calls: usize,
    /// Byte counts to accept on the next `write()` calls, instead of the full buffer.
    short_writes: VecDeque<usize>,
    /// Pre-configured response data to be read.
    responses: VecDeque<Vec<u8>>,
    /// Flag to simulate write errors
    should_error_on_write: bool,
}

#[derive(Error, Debug)]
pub enum MockSerialError {
    /// Simulated timeout error
    #[error("simulated timeout")]
    Timeout,
    /// Generic simulated error for testing
    #[error("simulated error")]
    SimulatedError,
}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::Timeout => embedded_io::ErrorKind::TimedOut,
            MockSerialError::SimulatedError => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.write_calls += 1;
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }

        let accepted = self
            .short_writes
            .pop_front()
            .map_or(buf.len(), |n| n.min(buf.len()));
        self.written.extend_from_slice(&buf[..accepted]);
        Ok(accepted)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let Some(chunk) = self.responses.front_mut() else {
            return Err(MockSerialError::Timeout);
        };
        if chunk.is_empty() {
            self.responses.pop_front();
            return Err(MockSerialError::Timeout);
        }

        let count = buf.len().min(chunk.len());
        buf[..count].copy_from_slice(&chunk[..count]);
        chunk.drain(..count);
        if chunk.is_empty() {
            self.responses.pop_front();
        }
        Ok(count)
    }
}

impl MockSerial {
    /// Create a new MockSerial instance with empty buffers
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response line.
    pub fn push_response(&mut self, data: impl AsRef<[u8]>) {
        self.responses.push_back(data.as_ref().to_vec());
    }

    /// Queue a read which times out without any data.
    pub fn push_timeout(&mut self) {
        self.responses.push_back(Vec::new());
    }

    /// Queue the supply's acknowledgement of a write.
    pub fn push_ack(&mut self) {
        self.push_response(":01ok\r\n");
    }

    /// Queue the supply's answer to a read.
    pub fn push_value(&mut self, value: u32) {
        self.push_response(format!(":01r00={value}.\r\n"));
    }

    /// Make the next `write()` calls accept only the given number of bytes.
    pub fn push_short_write(&mut self, accepted: usize) {
        self.short_writes.push_back(accepted);
    }

    /// Configure whether write operations should fail with an error
    pub fn set_write_error(&mut self, should_error: bool) {
        self.should_error_on_write = should_error;
    }

    /// Get a reference to the data that was written to this mock serial port
    pub fn written_data(&self) -> &[u8] {
        &self.written
    }

    /// All written data as text, for comparing against expected frames.
    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls
    }

    /// Number of queued responses (including timeouts) not yet consumed.
    pub fn pending_responses(&self) -> usize {
        self.responses.len()
    }
}

/// A [`Delay`] which records requested pauses instead of sleeping.
#[derive(Clone, Default)]
pub struct RecordingDelay {
    log: Rc<RefCell<Vec<u32>>>,
}

impl RecordingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requested pauses, in milliseconds.
    pub fn recorded(&self) -> Vec<u32> {
        self.log.borrow().clone()
    }
}

impl Delay for RecordingDelay {
    fn delay(&mut self, duration: MillisDurationU32) {
        self.log.borrow_mut().push(duration.to_millis());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Error, Read, Write};

    #[test]
    fn test_write_data() {
        let mut mock = MockSerial::new();
        let test_data = b":01r30=0,,\n";

        let result = mock.write(test_data);
        assert_eq!(result.unwrap(), test_data.len());
        assert_eq!(mock.written_data(), test_data);
        assert_eq!(mock.write_calls(), 1);
    }

    #[test]
    fn test_short_write() {
        let mut mock = MockSerial::new();
        mock.push_short_write(3);

        assert_eq!(mock.write(b"abcdef").unwrap(), 3);
        assert_eq!(mock.write(b"abcdef").unwrap(), 6);
        assert_eq!(mock.written_data(), b"abcabcdef");
    }

    #[test]
    fn test_write_error_simulation() {
        let mut mock = MockSerial::new();
        mock.set_write_error(true);

        let result = mock.write(b"test");
        assert!(matches!(result, Err(MockSerialError::SimulatedError)));
        assert!(mock.written_data().is_empty());
        assert_eq!(mock.write_calls(), 1);
    }

    #[test]
    fn test_read_partial_data() {
        let mut mock = MockSerial::new();
        mock.push_response("Long response");

        let mut buffer = [0u8; 5];
        assert_eq!(mock.read(&mut buffer).unwrap(), 5);
        assert_eq!(&buffer, b"Long ");
        assert_eq!(mock.pending_responses(), 1);
    }

    #[test]
    fn test_read_timeout_between_responses() {
        let mut mock = MockSerial::new();
        mock.push_response("a");
        mock.push_timeout();
        mock.push_response("b");

        let mut buffer = [0u8; 4];
        assert_eq!(mock.read(&mut buffer).unwrap(), 1);
        let err = mock.read(&mut buffer).unwrap_err();
        assert!(matches!(err.kind(), embedded_io::ErrorKind::TimedOut));
        assert_eq!(mock.read(&mut buffer).unwrap(), 1);
        assert_eq!(buffer[0], b'b');
        // Exhausted queue keeps timing out.
        assert!(mock.read(&mut buffer).is_err());
    }

    #[test]
    fn test_recording_delay_is_shared() {
        let delay = RecordingDelay::new();
        let mut clone = delay.clone();
        clone.delay(MillisDurationU32::millis(200));
        assert_eq!(delay.recorded(), vec![200]);
    }
}
