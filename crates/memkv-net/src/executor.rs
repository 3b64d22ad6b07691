//! Binds a [`CommandHeader`] plus its payload bytes to a store, behind
//! whatever external synchronization the front end needs.
//!
//! The store's own API is single-threaded — it never takes a lock
//! internally; every front end — blocking,
//! single-threaded reactor, or elastic-pool-driven — serializes access
//! through one [`std::sync::Mutex`] around one shared instance. The
//! single-threaded front end pays an uncontended lock on every command for
//! the sake of sharing this one executor type across all three front ends;
//! that trade is recorded in DESIGN.md rather than forked into a
//! lock-free-but-duplicated code path.

use std::sync::{Arc, Mutex};

use memkv_core::proto::{self, CommandHeader};
use memkv_core::LruStore;

/// Executes a parsed command against a store, returning the reply body
/// (without the trailing `\r\n` the connection appends).
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, header: &CommandHeader, payload: &[u8]) -> Vec<u8>;
}

impl CommandExecutor for Mutex<LruStore> {
    fn execute(&self, header: &CommandHeader, payload: &[u8]) -> Vec<u8> {
        let mut store = self.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        proto::execute(&mut store, header, payload)
    }
}

/// The shared-ownership handle every front end actually passes around.
pub type StoreHandle = Arc<Mutex<LruStore>>;

pub fn new_store_handle(max_bytes: usize) -> StoreHandle {
    Arc::new(Mutex::new(LruStore::new(max_bytes)))
}
