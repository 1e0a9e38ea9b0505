//! Remote store adapter: a key-path JSON store with change notifications.
//!
//! Two backends speak the same contract: [`MemoryStore`] keeps the tree in
//! process (also the relay's backing store), [`RestStore`] talks to a relay
//! over HTTP + SSE. Reads of a never-written path yield `Value::Null`, never
//! an error; writing `Null` deletes.

use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

use crate::error::{CueErr, CueResult};
use crate::model::now_ms;

pub mod memory;
pub mod rest;

pub use memory::MemoryStore;
pub use rest::RestStore;

/// Latest-value subscription. The current value is visible immediately via
/// `borrow`; intermediate values may be coalesced, the latest always lands.
/// Dropping the receiver unsubscribes.
pub type StoreWatch = watch::Receiver<Value>;

pub trait RemoteStore: Clone + Send + Sync + 'static {
    /// Point-in-time fetch; `Null` when the path has never been written.
    fn read(&self, path: &str) -> impl Future<Output = CueResult<Value>> + Send;

    /// Idempotent overwrite of the value at `path`.
    fn write(&self, path: &str, value: Value) -> impl Future<Output = CueResult<()>> + Send;

    /// Write a uniquely-keyed child under `path`; returns the new key.
    fn append(&self, path: &str, value: Value) -> impl Future<Output = CueResult<String>> + Send;

    /// Watch `path` from now on. Fires with the current value first.
    fn subscribe(&self, path: &str) -> impl Future<Output = CueResult<StoreWatch>> + Send;
}

/// Splits and validates a `/`-separated store path.
pub fn split_path(path: &str) -> CueResult<Vec<&str>> {
    let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segs.is_empty() || segs.iter().any(|s| *s == "." || *s == "..") {
        return Err(CueErr::BadPath(path.into()));
    }
    Ok(segs)
}

/// Child key for `append`: fixed-width hex millis plus a per-process counter,
/// so the store's insertion order is the lexicographic key order even for
/// same-millisecond appends.
pub fn append_key() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed) & 0xff_ffff;
    format!("{:013x}{:06x}-{}", now_ms(), seq, nanoid::nanoid!(6))
}

/// Runtime-selected backend for the composition root.
#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Rest(RestStore),
}

impl RemoteStore for Store {
    async fn read(&self, path: &str) -> CueResult<Value> {
        match self {
            Store::Memory(s) => s.read(path).await,
            Store::Rest(s) => s.read(path).await,
        }
    }

    async fn write(&self, path: &str, value: Value) -> CueResult<()> {
        match self {
            Store::Memory(s) => s.write(path, value).await,
            Store::Rest(s) => s.write(path, value).await,
        }
    }

    async fn append(&self, path: &str, value: Value) -> CueResult<String> {
        match self {
            Store::Memory(s) => s.append(path, value).await,
            Store::Rest(s) => s.append(path, value).await,
        }
    }

    async fn subscribe(&self, path: &str) -> CueResult<StoreWatch> {
        match self {
            Store::Memory(s) => s.subscribe(path).await,
            Store::Rest(s) => s.subscribe(path).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_validation() {
        assert_eq!(split_path("sessions/ABC123/cue").unwrap(), vec!["sessions", "ABC123", "cue"]);
        assert_eq!(split_path("/sessions/").unwrap(), vec!["sessions"]);
        assert!(split_path("").is_err());
        assert!(split_path("///").is_err());
        assert!(split_path("sessions/../other").is_err());
    }

    #[test]
    fn append_keys_are_monotonic() {
        let a = append_key();
        let b = append_key();
        assert!(&a[..19] < &b[..19]);
        assert_eq!(a.len(), 13 + 6 + 1 + 6);
    }
}
