use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Instant};

use crate::error::Error;
use crate::urc::{NetworkRegistration, UrcData, UrcHandler};

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    #[default]
    None,
    NotRegistering,
    Home,
    Searching,
    Denied,
    OutOfCoverage,
    Roaming,
}

impl From<u8> for Status {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::NotRegistering,
            1 => Self::Home,
            2 => Self::Searching,
            3 => Self::Denied,
            4 => Self::OutOfCoverage,
            5 => Self::Roaming,
            _ => Self::None,
        }
    }
}

impl Status {
    pub fn registered(self) -> bool {
        matches!(self, Self::Home | Self::Roaming)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "Unknown",
            Self::NotRegistering => "Not registered",
            Self::Home => "Registered (home)",
            Self::Searching => "Searching",
            Self::Denied => "Registration denied",
            Self::OutOfCoverage => "Out of coverage",
            Self::Roaming => "Registered (roaming)",
        }
    }
}

/// Radio access technology reported by `AT+CNSMOD?`.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetworkType {
    #[default]
    Unknown,
    Gsm,
    Edge,
    Wcdma,
    Hsdpa,
    Hsupa,
    Hspa,
    Lte,
}

impl From<u8> for NetworkType {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Gsm,
            3 => Self::Edge,
            4 => Self::Wcdma,
            5 => Self::Hsdpa,
            6 => Self::Hsupa,
            7 => Self::Hspa,
            8 => Self::Lte,
            _ => Self::Unknown,
        }
    }
}

impl NetworkType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Gsm => "GSM",
            Self::Edge => "EDGE",
            Self::Wcdma => "WCDMA",
            Self::Hsdpa => "HSDPA",
            Self::Hsupa => "HSUPA",
            Self::Hspa => "HSPA",
            Self::Lte => "LTE",
        }
    }
}

/// Which registration report a status belongs to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegType {
    Creg,
    Cgreg,
    Cereg,
    #[default]
    Unknown,
}

impl RegType {
    pub fn from_prefix(prefix: &str) -> Self {
        match prefix {
            "+CREG:" => Self::Creg,
            "+CGREG:" => Self::Cgreg,
            "+CEREG:" => Self::Cereg,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CellularRegistrationStatus {
    status: Status,
    updated: Option<Instant>,
    started: Option<Instant>,
}

impl CellularRegistrationStatus {
    pub const fn new() -> Self {
        Self {
            status: Status::None,
            updated: None,
            started: None,
        }
    }

    /// How long the current status has been held at `ts`.
    pub fn duration(&self, ts: Instant) -> Duration {
        self.started
            .and_then(|started| ts.checked_duration_since(started))
            .unwrap_or_else(|| Duration::from_millis(0))
    }

    pub fn updated(&self) -> Option<Instant> {
        self.updated
    }

    pub fn reset(&mut self) {
        self.status = Status::None;
        self.updated = None;
        self.started = None;
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn set_status(&mut self, stat: Status, ts: Instant) {
        if self.status != stat {
            self.status = stat;
            self.started = Some(ts);
        }
        self.updated = Some(ts);
    }

    pub fn registered(&self) -> bool {
        self.status.registered()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegistrationState {
    /// CS domain registration (`+CREG`).
    pub(crate) csd: CellularRegistrationStatus,
    /// GPRS registration (`+CGREG`).
    pub(crate) psd: CellularRegistrationStatus,
    /// EPS registration (`+CEREG`).
    pub(crate) eps: CellularRegistrationStatus,
    pub(crate) lac: Option<u32>,
    pub(crate) cell_id: Option<u32>,
}

impl RegistrationState {
    pub const fn new() -> Self {
        Self {
            csd: CellularRegistrationStatus::new(),
            psd: CellularRegistrationStatus::new(),
            eps: CellularRegistrationStatus::new(),
            lac: None,
            cell_id: None,
        }
    }

    /// Packet data is possible as soon as either PSD or EPS is registered.
    pub fn is_registered(&self) -> bool {
        self.psd.registered() || self.eps.registered()
    }

    pub fn eps(&self) -> &CellularRegistrationStatus {
        &self.eps
    }

    pub fn lac(&self) -> Option<u32> {
        self.lac
    }

    pub fn cell_id(&self) -> Option<u32> {
        self.cell_id
    }

    pub fn reset(&mut self) {
        self.csd.reset();
        self.psd.reset();
        self.eps.reset();
        self.lac = None;
        self.cell_id = None;
    }

    pub fn compare_and_set(&mut self, reg_type: RegType, reg: &NetworkRegistration, ts: Instant) {
        match reg_type {
            RegType::Creg => self.csd.set_status(reg.status, ts),
            RegType::Cgreg => self.psd.set_status(reg.status, ts),
            RegType::Cereg => self.eps.set_status(reg.status, ts),
            RegType::Unknown => {
                error!("unknown reg type");
                return;
            }
        }

        if reg.lac.is_some() {
            self.lac = reg.lac;
        }
        if reg.cell_id.is_some() {
            self.cell_id = reg.cell_id;
        }
    }
}

/// URC handler keeping a [`RegistrationState`] current from `+CREG`/`+CGREG`/`+CEREG` reports.
pub struct RegistrationMonitor {
    shared: Mutex<NoopRawMutex, RefCell<RegistrationState>>,
}

impl Default for RegistrationMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrationMonitor {
    pub const fn new() -> Self {
        Self {
            shared: Mutex::new(RefCell::new(RegistrationState::new())),
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.shared.lock(|s| s.borrow().clone())
    }

    pub fn is_registered(&self) -> bool {
        self.shared.lock(|s| s.borrow().is_registered())
    }

    pub fn reset(&self) {
        self.shared.lock(|s| s.borrow_mut().reset())
    }
}

impl UrcHandler for RegistrationMonitor {
    fn handle(&self, urc: &UrcData<'_>) -> Result<(), Error> {
        let reg = NetworkRegistration::from_urc(urc).ok_or(Error::Parse)?;
        let reg_type = RegType::from_prefix(urc.prefix);

        self.shared.lock(|s| {
            let s = &mut *s.borrow_mut();
            s.compare_and_set(reg_type, &reg, urc.timestamp);
            info!(
                "Registration status changed! Registered: {:?}",
                s.is_registered()
            );
        });
        Ok(())
    }
}
