//! # memkv-core — bounded LRU store and wire protocol
//!
//! Platform-agnostic core of memkv: the [`store::LruStore`] and the
//! [`proto`] module that parses commands off a byte stream and executes
//! them against a store. Neither module touches a socket or a thread;
//! that's [`memkv-net`](../memkv_net/index.html)'s job.

pub mod proto;
pub mod store;

pub use proto::{Command, CommandHeader, CommandKind, ParseOutcome, ProtoError};
pub use store::LruStore;
