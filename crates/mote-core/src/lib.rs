//! Core of the mote remote-administration bot.
//!
//! Framework-agnostic: the transport (Telegram), the version-control tool
//! (git) and the installer live behind ports implemented in adapter crates.

pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod update;

pub use errors::{Error, Result};
