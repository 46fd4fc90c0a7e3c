use embedded_io::{Error as _, Read, ReadReady, Write};
use heapless::{String, Vec};

use crate::error::Error;

/// Longest line accepted from the modem, longer lines are discarded.
pub const MAX_LINE_LEN: usize = 512;
/// Capacity of an accumulated command response.
pub const MAX_RESPONSE_LEN: usize = 1024;

pub type Line = String<MAX_LINE_LEN>;
pub type Response = String<MAX_RESPONSE_LEN>;

/// Owner of the serial port, turning the byte stream into lines.
pub struct Transport<S> {
    serial: S,
    buf: Vec<u8, MAX_LINE_LEN>,
    overflowed: bool,
}

impl<S> Transport<S>
where
    S: Read + Write + ReadReady,
{
    pub fn new(serial: S) -> Self {
        Self {
            serial,
            buf: Vec::new(),
            overflowed: false,
        }
    }

    pub fn write_command(&mut self, command: &str) -> Result<(), Error> {
        debug!("> {}", command);
        self.serial
            .write_all(command.as_bytes())
            .map_err(|e| Error::Io(e.kind()))?;
        self.serial
            .write_all(b"\r\n")
            .map_err(|e| Error::Io(e.kind()))?;
        self.serial.flush().map_err(|e| Error::Io(e.kind()))
    }

    /// Next complete line, if one can be assembled from the bytes available now.
    ///
    /// The line is returned without the `\n` but otherwise raw, a trailing `\r`
    /// is left in place.
    pub fn next_line(&mut self) -> Result<Option<Line>, Error> {
        let mut byte = [0u8; 1];
        loop {
            if !self.serial.read_ready().map_err(|e| Error::Io(e.kind()))? {
                return Ok(None);
            }
            let n = self
                .serial
                .read(&mut byte)
                .map_err(|e| Error::Io(e.kind()))?;
            if n == 0 {
                return Ok(None);
            }

            if byte[0] == b'\n' {
                if core::mem::take(&mut self.overflowed) {
                    continue;
                }
                let raw = core::mem::take(&mut self.buf);
                match String::from_utf8(raw) {
                    Ok(line) => return Ok(Some(line)),
                    Err(_) => {
                        warn!("Dropping line that is not valid UTF-8");
                        continue;
                    }
                }
            }

            if self.overflowed {
                continue;
            }
            if self.buf.push(byte[0]).is_err() {
                warn!("Line exceeds {} bytes, discarding", MAX_LINE_LEN);
                self.buf.clear();
                self.overflowed = true;
            }
        }
    }

    /// Throw away everything received so far, including a partial line.
    pub fn discard_input(&mut self) -> Result<(), Error> {
        let mut scratch = [0u8; 64];
        while self.serial.read_ready().map_err(|e| Error::Io(e.kind()))? {
            let n = self
                .serial
                .read(&mut scratch)
                .map_err(|e| Error::Io(e.kind()))?;
            if n == 0 {
                break;
            }
        }
        self.buf.clear();
        self.overflowed = false;
        Ok(())
    }
}

/// Append a raw line to an accumulated response.
pub(crate) fn append_line(response: &mut Response, raw: &str) {
    if response.push_str(raw).is_err() || response.push('\n').is_err() {
        warn!("Response exceeds {} bytes, truncated", MAX_RESPONSE_LEN);
    }
}

/// Trimmed copy of an accumulated response.
pub(crate) fn trimmed(response: &Response) -> Response {
    let mut out = Response::new();
    // A trimmed slice always fits the buffer it came from.
    let _ = out.push_str(response.trim());
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_helpers::{MockClock, MockSerial};

    #[test]
    fn frames_lines_and_keeps_carriage_return() {
        let clock = MockClock::new();
        let (serial, wire) = MockSerial::new(&clock);
        let mut transport = Transport::new(serial);

        wire.push("+CSQ: 18,99\r\nOK\r\n+CRE");
        assert_eq!(transport.next_line().unwrap().unwrap().as_str(), "+CSQ: 18,99\r");
        assert_eq!(transport.next_line().unwrap().unwrap().as_str(), "OK\r");
        assert_eq!(transport.next_line().unwrap(), None);

        wire.push("G: 1\r\n");
        assert_eq!(transport.next_line().unwrap().unwrap().as_str(), "+CREG: 1\r");
    }

    #[test]
    fn overlong_line_is_discarded() {
        let clock = MockClock::new();
        let (serial, wire) = MockSerial::new(&clock);
        let mut transport = Transport::new(serial);

        let mut junk = std::string::String::new();
        for _ in 0..600 {
            junk.push('x');
        }
        junk.push_str("\r\nOK\r\n");
        wire.push(&junk);

        assert_eq!(transport.next_line().unwrap().unwrap().as_str(), "OK\r");
    }

    #[test]
    fn command_is_terminated_with_crlf() {
        let clock = MockClock::new();
        let (serial, wire) = MockSerial::new(&clock);
        let mut transport = Transport::new(serial);

        transport.write_command("AT+CSQ").unwrap();

        assert_eq!(wire.sent(), vec!["AT+CSQ".to_string()]);
        assert_eq!(wire.raw_sent(), b"AT+CSQ\r\n".to_vec());
    }

    #[test]
    fn discard_drops_partial_lines() {
        let clock = MockClock::new();
        let (serial, wire) = MockSerial::new(&clock);
        let mut transport = Transport::new(serial);

        wire.push("garbage\r\nhalf");
        transport.discard_input().unwrap();
        wire.push(" line\r\n");

        assert_eq!(transport.next_line().unwrap().unwrap().as_str(), " line\r");
    }
}
