//! Responses for Network service commands
use atat::atat_derive::AtatResp;
use heapless::String;

/// Signal quality +CSQ
#[derive(Debug, Clone, PartialEq, Eq, AtatResp)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SignalQuality {
    /// 0..=31, 99 when not known or not detectable
    #[at_arg(position = 0)]
    pub rssi: u8,
    #[at_arg(position = 1)]
    pub ber: u8,
}

impl SignalQuality {
    /// Received signal strength in dBm, `None` when the module reports it as unknown.
    pub fn dbm(&self) -> Option<i16> {
        match self.rssi {
            0..=31 => Some(-113 + 2 * self.rssi as i16),
            _ => None,
        }
    }
}

/// Network registration status +CREG
#[derive(Debug, Clone, PartialEq, Eq, AtatResp)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NetworkRegistrationStatus {
    #[at_arg(position = 0)]
    pub n: u8,
    #[at_arg(position = 1)]
    pub stat: u8,
}

/// EPS network registration status +CEREG
#[derive(Debug, Clone, PartialEq, Eq, AtatResp)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EpsNetworkRegistrationStatus {
    #[at_arg(position = 0)]
    pub n: u8,
    #[at_arg(position = 1)]
    pub stat: u8,
}

/// GPRS attach or detach +CGATT
#[derive(Debug, Clone, PartialEq, Eq, AtatResp)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GprsAttached {
    #[at_arg(position = 0)]
    pub state: u8,
}

/// Operator selection +COPS
#[derive(Debug, Clone, PartialEq, Eq, AtatResp)]
pub struct OperatorSelection {
    #[at_arg(position = 0)]
    pub mode: u8,
    #[at_arg(position = 1)]
    pub format: Option<u8>,
    #[at_arg(position = 2)]
    pub oper: Option<String<64>>,
    #[at_arg(position = 3)]
    pub act: Option<u8>,
}

/// Current network system mode +CNSMOD
#[derive(Debug, Clone, PartialEq, Eq, AtatResp)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NetworkMode {
    #[at_arg(position = 0)]
    pub n: u8,
    #[at_arg(position = 1)]
    pub mode: u8,
}
