//! In-process store backend: a JSON tree plus a list of path watchers.
//!
//! Change notification follows the remote store's model: a write at path P
//! fires every watcher whose path is an ancestor of, equal to, or below P,
//! each with the value at the watcher's own path. That is what lets a band
//! device watching `sessions/X` observe a targeted `sessions/X/active`
//! write, and a cue watcher observe a whole-record rewrite.

use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

use super::{split_path, RemoteStore, StoreWatch};
use crate::error::CueResult;

#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<RwLock<Shared>>,
}

#[derive(Default)]
struct Shared {
    root: Value,
    watchers: Vec<Watcher>,
}

struct Watcher {
    segs: Vec<String>,
    tx: watch::Sender<Value>,
}

fn value_at(root: &Value, segs: &[impl AsRef<str>]) -> Value {
    let mut cur = root;
    for seg in segs {
        match cur.get(seg.as_ref()) {
            Some(v) => cur = v,
            None => return Value::Null,
        }
    }
    cur.clone()
}

fn set_at(node: &mut Value, segs: &[&str], value: Value) {
    if segs.is_empty() {
        *node = value;
        return;
    }
    if !matches!(node, Value::Object(_)) {
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else { return };
    let key = segs[0];
    if segs.len() == 1 {
        if value.is_null() {
            map.remove(key);
        } else {
            map.insert(key.to_string(), value);
        }
    } else {
        let child = map.entry(key.to_string()).or_insert(Value::Null);
        set_at(child, &segs[1..], value);
        // prune emptied branches so deleted paths read back as absent
        let emptied = child.is_null() || child.as_object().is_some_and(|m| m.is_empty());
        if emptied {
            map.remove(key);
        }
    }
}

/// True when one path is a prefix of the other (either direction).
fn overlaps(watcher: &[String], written: &[&str]) -> bool {
    let n = watcher.len().min(written.len());
    (0..n).all(|i| watcher[i] == written[i])
}

impl Shared {
    fn notify(&mut self, written: &[&str]) {
        let root = &self.root;
        self.watchers.retain(|w| {
            if w.tx.is_closed() {
                return false;
            }
            if overlaps(&w.segs, written) {
                let current = value_at(root, &w.segs);
                w.tx.send_if_modified(|v| {
                    if *v == current {
                        false
                    } else {
                        *v = current;
                        true
                    }
                });
            }
            true
        });
    }
}

impl RemoteStore for MemoryStore {
    async fn read(&self, path: &str) -> CueResult<Value> {
        let segs = split_path(path)?;
        let shared = self.shared.read().await;
        Ok(value_at(&shared.root, &segs))
    }

    async fn write(&self, path: &str, value: Value) -> CueResult<()> {
        let segs = split_path(path)?;
        let mut shared = self.shared.write().await;
        set_at(&mut shared.root, &segs, value);
        shared.notify(&segs);
        Ok(())
    }

    async fn append(&self, path: &str, value: Value) -> CueResult<String> {
        let key = super::append_key();
        self.write(&format!("{}/{}", path.trim_end_matches('/'), key), value)
            .await?;
        Ok(key)
    }

    async fn subscribe(&self, path: &str) -> CueResult<StoreWatch> {
        let segs = split_path(path)?;
        let mut shared = self.shared.write().await;
        let (tx, rx) = watch::channel(value_at(&shared.root, &segs));
        shared.watchers.push(Watcher {
            segs: segs.iter().map(|s| s.to_string()).collect(),
            tx,
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn read_absent_is_null() {
        let store = MemoryStore::default();
        assert!(store.read("sessions/NOPE").await.unwrap().is_null());
    }

    #[tokio::test]
    async fn write_then_read() {
        let store = MemoryStore::default();
        store.write("sessions/A/cue", json!({"text": "hi"})).await.unwrap();
        assert_eq!(store.read("sessions/A/cue").await.unwrap()["text"], "hi");
        assert_eq!(store.read("sessions/A").await.unwrap()["cue"]["text"], "hi");
    }

    #[tokio::test]
    async fn null_write_deletes_and_prunes() {
        let store = MemoryStore::default();
        store.write("a/b/c", json!(1)).await.unwrap();
        store.write("a/b/c", Value::Null).await.unwrap();
        assert!(store.read("a/b/c").await.unwrap().is_null());
        assert!(store.read("a").await.unwrap().is_null());
    }

    #[tokio::test]
    async fn subscribe_sees_current_then_changes() {
        let store = MemoryStore::default();
        store.write("k", json!("v0")).await.unwrap();
        let mut rx = store.subscribe("k").await.unwrap();
        assert_eq!(*rx.borrow_and_update(), json!("v0"));

        store.write("k", json!("v1")).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), json!("v1"));
    }

    #[tokio::test]
    async fn descendant_write_fires_ancestor_watch() {
        let store = MemoryStore::default();
        store.write("sessions/A", json!({"active": true})).await.unwrap();
        let mut rx = store.subscribe("sessions/A").await.unwrap();
        rx.borrow_and_update();

        store.write("sessions/A/active", json!(false)).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update()["active"], false);
    }

    #[tokio::test]
    async fn ancestor_write_fires_descendant_watch() {
        let store = MemoryStore::default();
        let mut rx = store.subscribe("sessions/A/cue").await.unwrap();
        assert!(rx.borrow_and_update().is_null());

        store
            .write("sessions/A", json!({"cue": {"text": "go"}}))
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update()["text"], "go");
    }

    #[tokio::test]
    async fn unrelated_write_does_not_fire() {
        let store = MemoryStore::default();
        let mut rx = store.subscribe("sessions/A").await.unwrap();
        rx.borrow_and_update();

        store.write("sessions/B", json!({"active": true})).await.unwrap();
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn append_creates_ordered_children() {
        let store = MemoryStore::default();
        let k1 = store.append("log", json!({"n": 1})).await.unwrap();
        let k2 = store.append("log", json!({"n": 2})).await.unwrap();
        assert_ne!(k1, k2);

        let log = store.read("log").await.unwrap();
        let keys: Vec<&String> = log.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 2);
        // serde_json maps iterate in sorted key order; time-prefixed keys
        // therefore come back in insertion order
        assert!(keys[0] <= keys[1]);
    }
}
