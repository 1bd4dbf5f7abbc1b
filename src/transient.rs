//! Session-scoped key/value storage that survives view transitions but never
//! touches disk.

use std::collections::HashMap;
use std::marker::PhantomData;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub trait TransientStore: Send + Sync {
    fn get_raw(&self, key: &str) -> Option<String>;
    fn set_raw(&self, key: &str, value: String);
    fn remove_raw(&self, key: &str);
}

/// A storage key bound to the type stored under it.
pub struct TypedKey<T> {
    name: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> TypedKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _value: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

pub trait TransientStoreExt {
    fn read<T: DeserializeOwned>(&self, key: &TypedKey<T>) -> Option<T>;
    fn write<T: Serialize>(&self, key: &TypedKey<T>, value: &T);
    fn remove<T>(&self, key: &TypedKey<T>);
}

impl<S: TransientStore + ?Sized> TransientStoreExt for S {
    fn read<T: DeserializeOwned>(&self, key: &TypedKey<T>) -> Option<T> {
        let raw = self.get_raw(key.name)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key = key.name, error = %err, "dropping unreadable transient value");
                self.remove_raw(key.name);
                None
            }
        }
    }

    fn write<T: Serialize>(&self, key: &TypedKey<T>, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set_raw(key.name, raw),
            Err(err) => warn!(key = key.name, error = %err, "failed to encode transient value"),
        }
    }

    fn remove<T>(&self, key: &TypedKey<T>) {
        self.remove_raw(key.name);
    }
}

/// In-memory store living as long as the client session.
#[derive(Default)]
pub struct SessionStore {
    slots: Mutex<HashMap<String, String>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransientStore for SessionStore {
    fn get_raw(&self, key: &str) -> Option<String> {
        self.slots.lock().get(key).cloned()
    }

    fn set_raw(&self, key: &str, value: String) {
        self.slots.lock().insert(key.to_string(), value);
    }

    fn remove_raw(&self, key: &str) {
        self.slots.lock().remove(key);
    }
}

/// Comment to bring into view once the destination page has rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingScroll {
    pub post_id: i64,
    pub comment_id: i64,
}

impl PendingScroll {
    pub fn new(post_id: i64, comment_id: i64) -> Self {
        Self {
            post_id,
            comment_id,
        }
    }
}

/// Written by quote jumps, consumed by the scroll effector. One slot: a new
/// request replaces an unconsumed one.
pub const PENDING_SCROLL: TypedKey<PendingScroll> = TypedKey::new("forum-tui.pending-scroll");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_scroll_uses_camel_case_payload() {
        let store = SessionStore::new();
        store.write(&PENDING_SCROLL, &PendingScroll::new(7, 42));
        assert_eq!(
            store.get_raw(PENDING_SCROLL.name()).as_deref(),
            Some(r#"{"postId":7,"commentId":42}"#)
        );
    }

    #[test]
    fn write_replaces_previous_request() {
        let store = SessionStore::new();
        store.write(&PENDING_SCROLL, &PendingScroll::new(7, 1));
        store.write(&PENDING_SCROLL, &PendingScroll::new(7, 2));
        assert_eq!(
            store.read(&PENDING_SCROLL),
            Some(PendingScroll::new(7, 2))
        );
    }

    #[test]
    fn remove_clears_request() {
        let store = SessionStore::new();
        store.write(&PENDING_SCROLL, &PendingScroll::new(3, 5));
        store.remove(&PENDING_SCROLL);
        assert_eq!(store.read(&PENDING_SCROLL), None);
    }

    #[test]
    fn corrupt_value_is_discarded() {
        let store = SessionStore::new();
        store.set_raw(PENDING_SCROLL.name(), "not json".into());
        assert_eq!(store.read(&PENDING_SCROLL), None);
        assert_eq!(store.get_raw(PENDING_SCROLL.name()), None);
    }
}
