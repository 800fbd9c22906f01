use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

/// Sink for the latest normalized thermostat state. The client only writes to it.
pub trait StateStore: Send + Sync {
    fn put(&self, key: &str, value: Value);
}

/// Key under which the primary record of a device is mirrored.
pub fn state_key(device_id: &str) -> String {
    let id = if device_id.is_empty() { "unknown" } else { device_id };
    format!("Lennox_{id}_status")
}

/// In-process store, for hosts without a global context of their own.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStore for MemoryStore {
    fn put(&self, key: &str, value: Value) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_uses_device_id() {
        assert_eq!(state_key("WS123"), "Lennox_WS123_status");
        assert_eq!(state_key(""), "Lennox_unknown_status");
    }

    #[test]
    fn put_overwrites() {
        let store = MemoryStore::new();
        store.put("k", json!(1));
        store.put("k", json!(2));
        assert_eq!(store.get("k"), Some(json!(2)));
        assert_eq!(store.len(), 1);
    }
}
