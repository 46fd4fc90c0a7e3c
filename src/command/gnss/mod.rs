//! ### GNSS

pub mod types;

use super::NoResponse;
use atat::atat_derive::AtatCmd;
use types::*;

/// GNSS power control +CGNSPWR
#[derive(Clone, AtatCmd)]
#[at_cmd("+CGNSPWR", NoResponse, timeout_ms = 2000)]
pub struct SetGnssPower {
    #[at_arg(position = 0)]
    pub state: GnssPower,
}

/// Navigation report URC +CGNSURC
///
/// <interval> is the report period in fixes, 0 turns the `+UGNSINF` URC off.
#[derive(Clone, AtatCmd)]
#[at_cmd("+CGNSURC", NoResponse)]
pub struct SetGnssReport {
    #[at_arg(position = 0)]
    pub interval: u8,
}
