//! Key-value persistence.
//!
//! The ledger never touches storage directly; it is handed a
//! [`KeyValueStore`] and writes whole JSON values under fixed keys.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;

pub type Listener = Box<dyn FnMut(&str, &Value)>;

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Replaces the value under `key` in one step.
    fn set(&mut self, key: &str, value: Value) -> Result<()>;

    /// Registers a callback run after every successful `set`.
    fn subscribe(&mut self, listener: Listener);

    /// Moves an unreadable value out of the way so the next `set` cannot
    /// overwrite it. The value stays reachable under `<key>.bak`.
    fn quarantine(&mut self, key: &str) -> Result<()>;
}

pub const QUARANTINE_SUFFIX: &str = ".bak";

pub fn load<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub fn save<T: Serialize + ?Sized>(store: &mut dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    store.set(key, serde_json::to_value(value)?)
}

// ==========================================
// In-memory store
// ==========================================

#[derive(Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, Value>,
    listeners: Vec<Listener>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.entries.insert(key.to_string(), value.clone());
        for listener in &mut self.listeners {
            listener(key, &value);
        }
        Ok(())
    }

    fn quarantine(&mut self, key: &str) -> Result<()> {
        if let Some(value) = self.entries.remove(key) {
            self.entries.insert(format!("{key}{QUARANTINE_SUFFIX}"), value);
        }
        Ok(())
    }

    fn subscribe(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }
}

// ==========================================
// On-disk store: one `<key>.json` per key
// ==========================================

pub struct JsonFileStore {
    dir: PathBuf,
    listeners: Vec<Listener>,
}

impl JsonFileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            listeners: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn set(&mut self, key: &str, value: Value) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&value)?)?;
        fs::rename(&tmp, &path)?;
        debug!(key, path = %path.display(), "stored");

        for listener in &mut self.listeners {
            listener(key, &value);
        }
        Ok(())
    }

    fn subscribe(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    fn quarantine(&mut self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(());
        }
        let backup = self.dir.join(format!("{key}.json{QUARANTINE_SUFFIX}"));
        fs::rename(&path, &backup)?;
        warn!(key, backup = %backup.display(), "moved unreadable value aside");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn memory_store_notifies_subscribers() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut store = MemoryStore::new();
        let sink = Rc::clone(&seen);
        store.subscribe(Box::new(move |key, value| {
            sink.borrow_mut().push((key.to_string(), value.clone()));
        }));

        save(&mut store, "current-site-index", &2usize).expect("save");
        let loaded: Option<usize> = load(&store, "current-site-index").expect("load");

        assert_eq!(loaded, Some(2));
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].0, "current-site-index");
    }

    #[test]
    fn memory_store_stores_before_notifying() {
        let mut store = MemoryStore::new();
        store.subscribe(Box::new(|_, _| panic!("listener failed")));

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            save(&mut store, "current-form-index", &2usize)
        }));

        assert!(outcome.is_err());
        let stored: Option<usize> = load(&store, "current-form-index").expect("load");
        assert_eq!(stored, Some(2));
    }

    #[test]
    fn quarantine_keeps_the_unreadable_value() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = JsonFileStore::open(dir.path()).expect("open");
        fs::write(dir.path().join("calculator-sites.json"), "{ not json").expect("write");

        store.quarantine("calculator-sites").expect("quarantine");

        assert!(store.get("calculator-sites").expect("get").is_none());
        let kept = fs::read_to_string(dir.path().join("calculator-sites.json.bak")).expect("backup");
        assert_eq!(kept, "{ not json");
        // nothing stored under the key is not an error
        store.quarantine("current-site-index").expect("quarantine missing");

        let mut memory = MemoryStore::new();
        memory.set("calculator-sites", Value::from(3)).expect("set");
        memory.quarantine("calculator-sites").expect("quarantine");
        assert!(memory.get("calculator-sites").expect("get").is_none());
        assert_eq!(memory.get("calculator-sites.bak").expect("get"), Some(Value::from(3)));
    }

    #[test]
    fn file_store_round_trips_and_reports_missing_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = JsonFileStore::open(dir.path().join("data")).expect("open");

        assert!(store.get("calculator-sites").expect("get").is_none());
        save(&mut store, "current-form-index", &1usize).expect("save");

        let reopened = JsonFileStore::open(dir.path().join("data")).expect("reopen");
        let value: Option<usize> = load(&reopened, "current-form-index").expect("load");
        assert_eq!(value, Some(1));
        assert!(!dir.path().join("data/current-form-index.json.tmp").exists());
    }
}
