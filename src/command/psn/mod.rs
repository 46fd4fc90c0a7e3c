//! ### Packet Switched Network

pub mod types;

use super::NoResponse;
use atat::atat_derive::AtatCmd;
use heapless::String;
use types::*;

/// PDP context definition +CGDCONT
#[derive(Clone, AtatCmd)]
#[at_cmd("+CGDCONT", NoResponse)]
pub struct SetPdpContextDefinition {
    #[at_arg(position = 0)]
    pub cid: u8,
    #[at_arg(position = 1)]
    pub pdp_type: String<8>,
    #[at_arg(position = 2)]
    pub apn: String<64>,
}

/// PDP context authentication +CGAUTH
///
/// The module takes the password before the user name.
#[derive(Clone, AtatCmd)]
#[at_cmd("+CGAUTH", NoResponse)]
pub struct SetAuthParameters {
    #[at_arg(position = 0)]
    pub cid: u8,
    #[at_arg(position = 1)]
    pub auth_type: AuthenticationType,
    #[at_arg(position = 2)]
    pub password: String<64>,
    #[at_arg(position = 3)]
    pub username: String<64>,
}

/// PDP context activate or deactivate +CGACT
///
/// Activation waits for the network and may take up to 30 s.
#[derive(Clone, AtatCmd)]
#[at_cmd("+CGACT", NoResponse, timeout_ms = 30000)]
pub struct SetPdpContextState {
    #[at_arg(position = 0)]
    pub status: PdpContextStatus,
    #[at_arg(position = 1)]
    pub cid: Option<u8>,
}
