#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod client;
pub mod clock;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod hex;
mod module_timing;
mod power;
pub mod registration;
pub mod services;
pub mod transport;
pub mod urc;

#[cfg(test)]
mod test_helpers;

pub use atat;

pub use client::{AtClient, Client};
pub use clock::{Clock, SystemClock};
pub use config::{Config, LocationConfig, MqttConfig, NoPin};
pub use device::Air780eg;
pub use error::Error;
pub use services::mqtt::MqttSession;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
