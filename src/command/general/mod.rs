//! ### General commands

use super::NoResponse;
use atat::atat_derive::AtatCmd;

/// Liveness probe
#[derive(Clone, AtatCmd)]
#[at_cmd("", NoResponse)]
pub struct AT;

/// Command echo E
///
/// The driver runs with echo off so responses never start with the command itself.
#[derive(Clone, AtatCmd)]
#[at_cmd("E0", NoResponse)]
pub struct DisableEcho;
