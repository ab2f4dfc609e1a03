//! syncsrv basic library
//!
//! Provides the functions shared by the mirror service and its tools:
//! - SQLite client
//! - logging setup
//! - layered configuration loading
//! - time providers

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub mod bootstrap_args;
pub mod config_loader;
pub mod logging;
pub mod time;

pub use bootstrap_args::ServiceArgs;
pub use time::{FixedTimeProvider, SystemTimeProvider, TimeProvider};

#[cfg(feature = "cli")]
pub use clap;
