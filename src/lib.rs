//! Extendable watchdog timers for long-polling sessions.
//!
//! A [`Watchdog`] expires unless pinged within a rolling deadline, and reports
//! exactly once when its lifecycle ends, whether by expiry or by cancel.
pub mod config;
pub mod watchdog;

pub use config::{load_config, ConfigError, WatchdogConfig};
pub use watchdog::{ExpiryHandler, Outcome, Watchdog, WatchdogError, WatchdogHandle};
