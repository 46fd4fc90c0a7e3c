//! HTTP client built into the module firmware.
//!
//! A request is prepared with `AT+HTTPPARA`, started with `AT+HTTPACTION`
//! and its body fetched piecewise with `AT+HTTPREAD`. Bodies travel through
//! the line based response buffer, so only text content survives intact.

use embassy_time::Duration;

use super::{expect_ok, format_command, info_line};
use crate::client::AtClient;
use crate::command::{self, CmeError};
use crate::error::Error;

pub const CHUNK_SIZE: usize = 256;

const SETUP_TIMEOUT: Duration = Duration::from_secs(5);
const ACTION_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum HttpMethod {
    Get = 0,
    Post = 1,
    Head = 2,
}

/// Result of `AT+HTTPACTION`, `+HTTPACTION: <method>,<status>,<length>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HttpResponse {
    pub status: u16,
    pub length: usize,
}

impl HttpResponse {
    pub fn parse(response: &str) -> Option<Self> {
        let body = info_line(response, "+HTTPACTION:")?;
        let mut fields = body.split(',').map(str::trim);
        let _method = fields.next()?;
        let status = fields.next()?.parse().ok()?;
        let length = fields.next().unwrap_or("0").parse().ok()?;
        Some(Self { status, length })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct Http<'a, T> {
    at: &'a T,
    initialized: bool,
    last: Option<HttpResponse>,
}

impl<'a, T: AtClient> Http<'a, T> {
    pub fn new(at: &'a T) -> Self {
        Self {
            at,
            initialized: false,
            last: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Outcome of the last request.
    pub fn last_response(&self) -> Option<HttpResponse> {
        self.last
    }

    pub fn init(&mut self) -> Result<(), Error> {
        if self.initialized {
            return Ok(());
        }
        expect_ok(self.at, "AT+HTTPINIT", SETUP_TIMEOUT)?;
        self.initialized = true;
        debug!("HTTP service initialized");
        Ok(())
    }

    /// Release the HTTP service. A failure is only logged.
    pub fn terminate(&mut self) {
        if !self.initialized {
            return;
        }
        if let Err(e) = expect_ok(self.at, "AT+HTTPTERM", SETUP_TIMEOUT) {
            warn!("HTTPTERM failed: {:?}", e);
        }
        self.initialized = false;
        self.last = None;
    }

    fn ensure_initialized(&self) -> Result<(), Error> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::Uninitialized)
        }
    }

    fn set_parameter(&mut self, name: &str, value: &str) -> Result<(), Error> {
        self.ensure_initialized()?;
        let cmd = format_command(format_args!("AT+HTTPPARA=\"{}\",\"{}\"", name, value))?;
        expect_ok(self.at, &cmd, SETUP_TIMEOUT)?;
        Ok(())
    }

    pub fn set_url(&mut self, url: &str) -> Result<(), Error> {
        self.set_parameter("URL", url)
    }

    /// Extra request header line, e.g. `User-Agent: tracker/1.0`.
    pub fn set_user_data(&mut self, data: &str) -> Result<(), Error> {
        self.set_parameter("USERDATA", data)
    }

    /// Run the prepared request and wait for the status report.
    pub fn action(&mut self, method: HttpMethod) -> Result<HttpResponse, Error> {
        self.ensure_initialized()?;
        let cmd = format_command(format_args!("AT+HTTPACTION={}", method as u8))?;
        let response = self.at.send_command_until_complete(&cmd, ACTION_TIMEOUT)?;
        if response.is_empty() {
            return Err(Error::NoResponse);
        }
        if command::is_error_response(&response) {
            return Err(Error::Modem(CmeError::parse(&response)));
        }

        let result = HttpResponse::parse(&response).ok_or(Error::Parse)?;
        self.last = Some(result);
        info!("HTTP status {}, {} bytes", result.status, result.length);
        if !result.is_success() {
            return Err(Error::Http(result.status));
        }
        Ok(result)
    }

    /// `GET url`. Statuses outside 2xx come back as [`Error::Http`].
    pub fn get(&mut self, url: &str) -> Result<HttpResponse, Error> {
        self.set_url(url)?;
        self.action(HttpMethod::Get)
    }

    /// Body length from the `Content-Length` header, or from the status
    /// report if the header is missing.
    pub fn content_length(&mut self) -> Result<usize, Error> {
        self.ensure_initialized()?;
        let response = self
            .at
            .send_command_until_complete("AT+HTTPHEAD", READ_TIMEOUT)?;

        let header = response.lines().find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        });
        match (header, self.last) {
            (Some(len), _) => Ok(len),
            (None, Some(last)) if last.length > 0 => Ok(last.length),
            _ => Err(Error::Parse),
        }
    }

    /// Read up to `buf.len()` body bytes starting at `offset`.
    ///
    /// Returns the number of bytes copied, 0 at the end of the body.
    pub fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<usize, Error> {
        self.ensure_initialized()?;
        let cmd = format_command(format_args!("AT+HTTPREAD={},{}", offset, buf.len()))?;
        let response = self.at.send_command_until_complete(&cmd, READ_TIMEOUT)?;
        if command::is_error_response(&response) {
            return Err(Error::Modem(CmeError::parse(&response)));
        }

        let start = response.find("+HTTPREAD:").ok_or(Error::Parse)?;
        let (header, data) = response[start..].split_once('\n').unwrap_or((&response[start..], ""));
        let announced: usize = header["+HTTPREAD:".len()..]
            .trim()
            .parse()
            .map_err(|_| Error::Parse)?;

        let data = data.as_bytes();
        let n = announced.min(buf.len()).min(data.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    /// Fetch `url` and hand the body to `sink` chunk by chunk.
    ///
    /// `sink` returns false to abort. `progress` gets the completed percentage
    /// after each chunk. The service is terminated afterwards either way.
    pub fn download(
        &mut self,
        url: &str,
        mut sink: impl FnMut(&[u8]) -> bool,
        mut progress: impl FnMut(u8),
    ) -> Result<usize, Error> {
        let result = self.init().and_then(|_| {
            self.get(url)?;
            let total = self.content_length()?;
            info!("Downloading {} bytes from {}", total, url);

            let mut chunk = [0u8; CHUNK_SIZE];
            let mut done = 0;
            while done < total {
                let want = (total - done).min(CHUNK_SIZE);
                let n = self.read(done, &mut chunk[..want])?;
                if n == 0 {
                    warn!("Body ended after {} of {} bytes", done, total);
                    break;
                }
                if !sink(&chunk[..n]) {
                    warn!("Download aborted by sink");
                    return Err(Error::Aborted);
                }
                done += n;
                progress((done * 100 / total) as u8);
            }

            if done == total {
                Ok(done)
            } else {
                Err(Error::Parse)
            }
        });
        self.terminate();
        result
    }
}
