//! ### Network service

pub mod responses;
pub mod types;

use super::NoResponse;
use atat::atat_derive::AtatCmd;
use responses::*;
use types::*;

/// Signal quality +CSQ
///
/// Returns the received signal strength indication <rssi> and the channel bit
/// error rate <ber>.
#[derive(Clone, AtatCmd)]
#[at_cmd("+CSQ", SignalQuality)]
pub struct GetSignalQuality;

/// Network registration status +CREG
#[derive(Clone, AtatCmd)]
#[at_cmd("+CREG?", NetworkRegistrationStatus)]
pub struct GetNetworkRegistrationStatus;

/// EPS network registration status +CEREG
#[derive(Clone, AtatCmd)]
#[at_cmd("+CEREG?", EpsNetworkRegistrationStatus)]
pub struct GetEpsNetworkRegistrationStatus;

/// Configure the EPS registration URC +CEREG
#[derive(Clone, AtatCmd)]
#[at_cmd("+CEREG", NoResponse)]
pub struct SetEpsNetworkRegistrationUrc {
    #[at_arg(position = 0)]
    pub n: RegistrationUrc,
}

/// GPRS attach or detach +CGATT
#[derive(Clone, AtatCmd)]
#[at_cmd("+CGATT?", GprsAttached)]
pub struct GetGprsAttached;

/// Operator selection +COPS
#[derive(Clone, AtatCmd)]
#[at_cmd("+COPS?", OperatorSelection, timeout_ms = 5000)]
pub struct GetOperatorSelection;

/// Network system mode +CNSMOD
///
/// <mode> is the access technology the module is currently camped on, see
/// [`crate::registration::NetworkType`].
#[derive(Clone, AtatCmd)]
#[at_cmd("+CNSMOD?", NetworkMode)]
pub struct GetNetworkMode;

/// Set module functionality +CFUN
#[derive(Clone, AtatCmd)]
#[at_cmd("+CFUN", NoResponse, timeout_ms = 10000)]
pub struct SetModuleFunctionality {
    #[at_arg(position = 0)]
    pub fun: Functionality,
}
