//! # memkv-net — non-blocking connection state machine and reactor
//!
//! Builds the blocking-I/O-free front-end machinery — [`connection::Connection`]
//! and the `mio`-based reactor loops in [`reactor`] — on top of
//! [`memkv_core`]'s store and protocol. Front-end binaries (`memkv-st`,
//! `memkv-mt`) assemble these pieces; the blocking front end (`memkv-blocking`)
//! does not need this crate at all, since it has no readiness notifier to
//! drive.

pub mod config;
pub mod connection;
pub mod executor;
pub mod reactor;

pub use config::{ConfigError, ServerConfig};
pub use connection::Connection;
pub use executor::{new_store_handle, CommandExecutor, StoreHandle};
