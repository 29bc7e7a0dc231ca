//! Tab-scoped key/value storage.
//!
//! The only state that outlives a single page render is the reading anchor of
//! each (origin, path), kept for the lifetime of the tab. Values are JSON
//! strings; the [`SessionStore`] trait is the seam a host binding implements
//! (the in-memory store below is what the CLI and tests use).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

pub const ANCHOR_KEY_PREFIX: &str = "lt:anchor:";

pub trait SessionStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type SharedStore = Rc<dyn SessionStore>;

/// `HashMap` behind a `RefCell`: the engine is single-threaded.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: RefCell<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore {
        Rc::new(Self::new())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.borrow().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.entries.borrow_mut().insert(key.to_string(), value);
    }

    fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

/// Storage key of the anchor for a page: `lt:anchor:<origin><path>`.
///
/// Query and fragment are ignored so that `?page=2` or `#comments` restore the
/// same reading position.
///
/// e.g. `https://news.example/story?x=1#c` → `"lt:anchor:https://news.example/story"`
pub fn anchor_key(url: &Url) -> String {
    format!(
        "{}{}{}",
        ANCHOR_KEY_PREFIX,
        url.origin().ascii_serialization(),
        url.path()
    )
}

/// Deserialize the value under `key`. Unreadable values count as absent.
pub fn load_json<T: DeserializeOwned>(store: &dyn SessionStore, key: &str) -> Option<T> {
    let raw = store.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("session_store: unreadable value under '{}': {}", key, e);
            None
        }
    }
}

/// Serialize and overwrite the value under `key`.
pub fn save_json<T: Serialize>(store: &dyn SessionStore, key: &str, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(raw) => {
            debug!("session_store: write '{}' ({} bytes)", key, raw.len());
            store.set(key, raw);
            true
        }
        Err(e) => {
            warn!("session_store: failed to serialize '{}': {}", key, e);
            false
        }
    }
}
