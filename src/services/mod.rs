//! Feature services
//!
//! Each service drives one function of the module through an [`AtClient`]
//! and caches what it learned. Services are polled from the device loop.

pub mod gnss;
pub mod http;
pub mod mqtt;
pub mod network;

use core::fmt::{self, Write as _};

use embassy_time::{Duration, Instant};
use heapless::String;

use crate::client::AtClient;
use crate::command::{self, CmeError, MAX_COMMAND_LEN};
use crate::error::Error;
use crate::transport::Response;

/// Run `command` and require an `OK` in the response.
pub(crate) fn expect_ok<T: AtClient>(
    at: &T,
    command: &str,
    timeout: Duration,
) -> Result<Response, Error> {
    let response = at.send_command(command, timeout)?;
    if response.is_empty() {
        return Err(Error::NoResponse);
    }
    if command::is_error_response(&response) || !response.contains("OK") {
        return Err(Error::Modem(CmeError::parse(&response)));
    }
    Ok(response)
}

/// Render a command line, e.g. `format_command(format_args!("AT+MSUB=\"{}\",{}", topic, qos))`.
pub(crate) fn format_command(args: fmt::Arguments<'_>) -> Result<String<MAX_COMMAND_LEN>, Error> {
    let mut line = String::new();
    line.write_fmt(args).map_err(|_| Error::CommandTooLong)?;
    Ok(line)
}

/// Copy of `s` cut to the capacity of the buffer, on a character boundary.
pub(crate) fn truncated<const N: usize>(s: &str) -> String<N> {
    let mut out = String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// Body of the first line starting with `prefix`, trimmed.
pub(crate) fn info_line<'r>(response: &'r str, prefix: &str) -> Option<&'r str> {
    response
        .lines()
        .map(str::trim)
        .find_map(|l| l.strip_prefix(prefix))
        .map(str::trim)
}

/// First line that is neither empty nor a final result code.
pub(crate) fn first_line(response: &str) -> Option<&str> {
    response
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && *l != "OK" && !command::is_error_line(l))
}

/// Rate limiter for periodic work. Due right away until first marked.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Interval {
    period: Duration,
    last: Option<Instant>,
}

impl Interval {
    pub const fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.last
            .map_or(true, |last| now.saturating_duration_since(last) >= self.period)
    }

    /// Mark the work as done at `now` if it is due. Returns whether it was.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.last = Some(now);
            true
        } else {
            false
        }
    }

    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }
}
