//! AT commands for the Air780EG LTE Cat.1 module
//!
//! Most exchanges with the module are plain text: feature modules format the
//! command line themselves and inspect the response for the module's terminal
//! tokens. Commands with a stable, structured response are also available as
//! typed [`atat::AtatCmd`]s, see [`encode`] and [`decode`].

pub mod general;
pub mod gnss;
pub mod network_service;
pub mod psn;

use core::str::FromStr;

use atat::atat_derive::AtatResp;
use atat::AtatCmd;
use heapless::String;

use crate::error::Error;

/// Longest command line the driver transmits, without the trailing CR/LF.
pub const MAX_COMMAND_LEN: usize = 512;

#[derive(Clone, AtatResp)]
pub struct NoResponse;

/// Command type tag, derived from the leading AT verb of a command line.
///
/// The kind decides when a queued command is complete, which of its response
/// lines must not be mistaken for URCs, and whether it holds the serial line
/// exclusively while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandKind {
    WifiLocation,
    Lbs,
    GnssInfo,
    MqttPublish,
    MqttStatus,
    MqttSubscribe,
    MqttUnsubscribe,
    MqttConnect,
    MqttDisconnect,
    HttpAction,
    HttpHead,
    HttpRead,
    Generic,
}

const KIND_PREFIXES: &[(&str, CommandKind)] = &[
    ("AT+WIFILOC", CommandKind::WifiLocation),
    ("AT+LBS", CommandKind::Lbs),
    ("AT+CIPGSMLOC", CommandKind::Lbs),
    ("AT+CGNSINF", CommandKind::GnssInfo),
    ("AT+MPUB", CommandKind::MqttPublish),
    ("AT+MQTTSTATU", CommandKind::MqttStatus),
    ("AT+MSUB", CommandKind::MqttSubscribe),
    ("AT+MUNSUB", CommandKind::MqttUnsubscribe),
    ("AT+MCONNECT", CommandKind::MqttConnect),
    ("AT+MDISCONNECT", CommandKind::MqttDisconnect),
    ("AT+HTTPACTION", CommandKind::HttpAction),
    ("AT+HTTPHEAD", CommandKind::HttpHead),
    ("AT+HTTPREAD", CommandKind::HttpRead),
];

impl CommandKind {
    pub fn classify(command: &str) -> Self {
        let command = command.trim_start();
        KIND_PREFIXES
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix))
            .map(|&(_, kind)| kind)
            .unwrap_or(Self::Generic)
    }

    /// Location lookups occupy the modem for up to 30 s and must not be
    /// interleaved with anything else.
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::WifiLocation | Self::Lbs)
    }

    /// Response prefixes of this kind that look like URCs but belong to the command.
    pub fn response_prefixes(self) -> &'static [&'static str] {
        match self {
            Self::GnssInfo => &["+CGNSINF:"],
            Self::WifiLocation => &["+WIFILOC:"],
            Self::Lbs => &["+LBS:", "+CIPGSMLOC:"],
            Self::MqttStatus => &["+MQTTSTATU"],
            Self::HttpAction => &["+HTTPACTION:"],
            Self::HttpHead => &["+HTTPHEAD:"],
            Self::HttpRead => &["+HTTPREAD:"],
            _ => &[],
        }
    }

    pub fn is_complete(self, response: &str) -> bool {
        let has = |s: &str| response.contains(s);
        // Bodies may contain OK or ERROR, only bare result lines count.
        let final_ok = || response.lines().any(|l| l.trim() == "OK");
        match self {
            Self::WifiLocation => (has("+WIFILOC:") && has("OK")) || has("ERROR"),
            Self::Lbs => ((has("+LBS:") || has("+CIPGSMLOC:")) && has("OK")) || has("ERROR"),
            Self::MqttStatus => has("+MQTTSTATU") || has("ERROR"),
            Self::HttpAction => has("+HTTPACTION:") || has("ERROR"),
            Self::HttpHead => final_ok() || is_error_response(response),
            Self::HttpRead => (has("+HTTPREAD:") && final_ok()) || is_error_response(response),
            _ => has("OK") || has("ERROR"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::WifiLocation => "WIFILOC",
            Self::Lbs => "LBS",
            Self::GnssInfo => "CGNSINF",
            Self::MqttPublish => "MPUB",
            Self::MqttStatus => "MQTTSTATU",
            Self::MqttSubscribe => "MSUB",
            Self::MqttUnsubscribe => "MUNSUB",
            Self::MqttConnect => "MCONN",
            Self::MqttDisconnect => "MDISCONN",
            Self::HttpAction => "HTTPACTION",
            Self::HttpHead => "HTTPHEAD",
            Self::HttpRead => "HTTPREAD",
            Self::Generic => "GENERIC",
        }
    }
}

/// Mobile termination error result codes +CME ERROR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CmeError {
    InvalidInputValue,
    UnsupportedMode,
    OperationFailed,
    MuxAlreadyRunning,
    UnableToGetControl,
    Other(u16),
}

impl From<u16> for CmeError {
    fn from(code: u16) -> Self {
        match code {
            765 => Self::InvalidInputValue,
            766 => Self::UnsupportedMode,
            767 => Self::OperationFailed,
            768 => Self::MuxAlreadyRunning,
            769 => Self::UnableToGetControl,
            code => Self::Other(code),
        }
    }
}

impl FromStr for CmeError {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim();
        let end = digits
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(digits.len());
        digits[..end].parse::<u16>().map(Self::from).map_err(|_| ())
    }
}

impl CmeError {
    /// Extract the `+CME ERROR: <n>` code from a response, if any.
    pub fn parse(response: &str) -> Option<Self> {
        let idx = response.find("+CME ERROR:")?;
        response[idx + "+CME ERROR:".len()..].parse().ok()
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::InvalidInputValue => "Invalid input value",
            Self::UnsupportedMode => "Unsupported mode",
            Self::OperationFailed => "Operation failed",
            Self::MuxAlreadyRunning => "Mux already running",
            Self::UnableToGetControl => "Unable to get control",
            Self::Other(_) => "Unknown error",
        }
    }
}

/// `ERROR`, `+CME ERROR: <n>` or `+CMS ERROR: <n>`.
pub fn is_error_line(line: &str) -> bool {
    let line = line.trim();
    line == "ERROR" || line.starts_with("+CME ERROR") || line.starts_with("+CMS ERROR")
}

pub fn is_error_response(response: &str) -> bool {
    response.lines().any(is_error_line)
}

/// Render a typed command as the text line put on the wire, without CR/LF.
pub fn encode<Cmd: AtatCmd>(cmd: &Cmd) -> Result<String<MAX_COMMAND_LEN>, Error> {
    if Cmd::MAX_LEN > MAX_COMMAND_LEN {
        return Err(Error::CommandTooLong);
    }

    let mut buf = [0u8; MAX_COMMAND_LEN];
    let len = cmd.write(&mut buf);
    let text = core::str::from_utf8(&buf[..len]).map_err(|_| Error::Parse)?;
    String::try_from(text.trim_end()).map_err(|_| Error::CommandTooLong)
}

/// Parse the information line of a textual response with the command's own parser.
///
/// The information line is the last non-empty line that is not the final `OK`.
pub fn decode<Cmd: AtatCmd>(cmd: &Cmd, response: &str) -> Result<Cmd::Response, Error> {
    if is_error_response(response) {
        return Err(Error::Modem(CmeError::parse(response)));
    }
    if response.trim().is_empty() {
        return Err(Error::NoResponse);
    }

    let info = response
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != "OK")
        .last()
        .unwrap_or("");

    Ok(cmd.parse(Ok(info.as_bytes()))?)
}
