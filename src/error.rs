use crate::command::CmeError;

#[derive(Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    // General device errors
    BaudDetection,
    Uninitialized,
    RebootDetected,
    SimNotReady,

    // Command pipeline errors
    /// Rejected because a serial-exclusive command of another kind is active.
    Blocked,
    QueueFull,
    CommandTooLong,
    NoResponse,
    /// The modem answered with `ERROR`, `+CME ERROR` or `+CMS ERROR`.
    Modem(Option<CmeError>),
    Parse,

    // URC dispatcher errors
    HandlerTableFull,

    // Service specific errors
    NetworkNotReady,
    NotConnected,
    ConnectFailed,
    SubscriptionLimit,
    Http(u16),
    /// A transfer was cancelled by its consumer.
    Aborted,

    Atat(atat::Error),

    Io(embedded_io::ErrorKind),

    IoPin,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter<'_>) {
        match self {
            Self::BaudDetection => defmt::write!(f, "BaudDetection"),
            Self::Uninitialized => defmt::write!(f, "Uninitialized"),
            Self::RebootDetected => defmt::write!(f, "RebootDetected"),
            Self::SimNotReady => defmt::write!(f, "SimNotReady"),
            Self::Blocked => defmt::write!(f, "Blocked"),
            Self::QueueFull => defmt::write!(f, "QueueFull"),
            Self::CommandTooLong => defmt::write!(f, "CommandTooLong"),
            Self::NoResponse => defmt::write!(f, "NoResponse"),
            Self::Modem(e) => defmt::write!(f, "Modem({:?})", e),
            Self::Parse => defmt::write!(f, "Parse"),
            Self::HandlerTableFull => defmt::write!(f, "HandlerTableFull"),
            Self::NetworkNotReady => defmt::write!(f, "NetworkNotReady"),
            Self::NotConnected => defmt::write!(f, "NotConnected"),
            Self::ConnectFailed => defmt::write!(f, "ConnectFailed"),
            Self::SubscriptionLimit => defmt::write!(f, "SubscriptionLimit"),
            Self::Http(status) => defmt::write!(f, "Http({})", status),
            Self::Aborted => defmt::write!(f, "Aborted"),
            Self::Atat(e) => defmt::write!(f, "Atat({:?})", e),
            Self::Io(e) => defmt::write!(f, "Io({:?})", e),
            Self::IoPin => defmt::write!(f, "IoPin"),
        }
    }
}

impl From<atat::Error> for Error {
    fn from(e: atat::Error) -> Self {
        Self::Atat(e)
    }
}
