//! Argument types used by Packet Switched Network commands
use atat::atat_derive::AtatEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, AtatEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PdpContextStatus {
    Deactivated = 0,
    Activated = 1,
}

/// Authentication protocol used by +CGAUTH
#[derive(Debug, Clone, Copy, PartialEq, Eq, AtatEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AuthenticationType {
    None = 0,
    Pap = 1,
    Chap = 2,
}
