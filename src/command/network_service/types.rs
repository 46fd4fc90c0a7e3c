//! Argument types used by Network service commands
use atat::atat_derive::AtatEnum;

/// Level of functionality set with +CFUN
#[derive(Debug, Clone, Copy, PartialEq, Eq, AtatEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Functionality {
    /// • 0: minimum functionality, RF off and SIM deactivated
    Minimum = 0,
    /// • 1 (default value): full functionality
    Full = 1,
    /// • 4: flight mode, RF off
    DisableRf = 4,
}

/// Presentation of the registration URC
#[derive(Debug, Clone, Copy, PartialEq, Eq, AtatEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistrationUrc {
    /// • 0: network registration URC disabled
    Disabled = 0,
    /// • 1: enable the URC `+CEREG: <stat>`
    Enabled = 1,
    /// • 2: enable the URC with location information `+CEREG: <stat>[,<tac>,<ci>[,<AcT>]]`
    EnabledWithLocation = 2,
}
