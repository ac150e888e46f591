//! Long-term memory keyed by namespace, shared across threads

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;

const PROFILE_NAMESPACE: &str = "memory_profile";
const PROFILE_KEY: &str = "user_memory";

/// Saved preferences for one customer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub customer_id: String,
    #[serde(default)]
    pub music_preferences: Vec<String>,
}

impl UserProfile {
    /// Merge new preferences, skipping case-insensitive duplicates
    pub fn add_preferences<I, S>(&mut self, preferences: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for pref in preferences {
            let pref = pref.into().trim().to_string();
            if pref.is_empty() {
                continue;
            }
            let known = self
                .music_preferences
                .iter()
                .any(|p| p.eq_ignore_ascii_case(&pref));
            if !known {
                self.music_preferences.push(pref);
            }
        }
    }
}

type Entries = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

/// Key/value store partitioned by namespace.
///
/// With a backing file every write is flushed to disk.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<Entries>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by a JSON file, loading it if present
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            Entries::new()
        };
        Ok(Self {
            entries: RwLock::new(entries),
            path: Some(path),
        })
    }

    fn namespace_key(namespace: &[&str]) -> String {
        namespace.join("/")
    }

    pub fn get(&self, namespace: &[&str], key: &str) -> Option<serde_json::Value> {
        self.entries
            .read()
            .get(&Self::namespace_key(namespace))
            .and_then(|ns| ns.get(key))
            .cloned()
    }

    pub fn put(&self, namespace: &[&str], key: &str, value: serde_json::Value) -> Result<()> {
        let ns_key = Self::namespace_key(namespace);
        self.update(|entries| {
            entries.entry(ns_key).or_default().insert(key.to_string(), value);
            true
        })
        .map(drop)
    }

    pub fn delete(&self, namespace: &[&str], key: &str) -> Result<bool> {
        let ns_key = Self::namespace_key(namespace);
        self.update(|entries| {
            let Some(ns) = entries.get_mut(&ns_key) else {
                return false;
            };
            let removed = ns.remove(key).is_some();
            if ns.is_empty() {
                entries.remove(&ns_key);
            }
            removed
        })
    }

    /// Apply `change` to a copy of the entries; the copy replaces the live
    /// map only after it reached disk. `change` returns whether it wrote.
    fn update(&self, change: impl FnOnce(&mut Entries) -> bool) -> Result<bool> {
        let mut entries = self.entries.write();
        let mut next = entries.clone();
        if !change(&mut next) {
            return Ok(false);
        }
        self.flush(&next)?;
        *entries = next;
        Ok(true)
    }

    /// Keys stored under a namespace
    pub fn keys(&self, namespace: &[&str]) -> Vec<String> {
        self.entries
            .read()
            .get(&Self::namespace_key(namespace))
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn flush(&self, entries: &Entries) -> Result<()> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, serde_json::to_string_pretty(entries)?)?;
        }
        Ok(())
    }

    /// The saved profile for an account, if any
    pub fn profile(&self, account_id: &str) -> Option<UserProfile> {
        let value = self.get(&[PROFILE_NAMESPACE, account_id], PROFILE_KEY)?;
        match serde_json::from_value(value) {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::warn!(account_id, "Ignoring unreadable profile: {}", e);
                None
            }
        }
    }

    pub fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        self.put(
            &[PROFILE_NAMESPACE, &profile.customer_id],
            PROFILE_KEY,
            serde_json::to_value(profile)?,
        )
    }

    /// Add preferences to an account's profile, creating it if needed
    pub fn remember_preferences<I, S>(&self, account_id: &str, preferences: I) -> Result<UserProfile>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut profile = self.profile(account_id).unwrap_or_else(|| UserProfile {
            customer_id: account_id.to_string(),
            music_preferences: Vec::new(),
        });
        profile.add_preferences(preferences);
        self.save_profile(&profile)?;
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let store = MemoryStore::new();
        store
            .put(&["notes", "10"], "greeting", serde_json::json!("hi"))
            .unwrap();
        assert_eq!(store.get(&["notes", "10"], "greeting"), Some(serde_json::json!("hi")));
        assert_eq!(store.get(&["notes", "11"], "greeting"), None);
        assert_eq!(store.keys(&["notes", "10"]), vec!["greeting"]);
        assert!(store.delete(&["notes", "10"], "greeting").unwrap());
        assert!(!store.delete(&["notes", "10"], "greeting").unwrap());
        assert!(store.keys(&["notes", "10"]).is_empty());
    }

    #[test]
    fn test_preferences_are_merged_without_duplicates() {
        let store = MemoryStore::new();
        store.remember_preferences("10", ["Rock", "jazz"]).unwrap();
        let profile = store.remember_preferences("10", ["rock", " Blues ", ""]).unwrap();
        assert_eq!(profile.music_preferences, vec!["Rock", "jazz", "Blues"]);
        assert_eq!(store.profile("10"), Some(profile));
        assert_eq!(store.profile("11"), None);
    }

    #[test]
    fn test_file_backed_store_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        MemoryStore::open(&path)
            .unwrap()
            .remember_preferences("3", ["Metal"])
            .unwrap();

        let reopened = MemoryStore::open(&path).unwrap();
        let profile = reopened.profile("3").unwrap();
        assert_eq!(profile.customer_id, "3");
        assert_eq!(profile.music_preferences, vec!["Metal"]);
    }

    #[test]
    fn test_failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        let store = MemoryStore::open(blocker.join("memory.json")).unwrap();

        assert!(store.remember_preferences("10", ["Jazz"]).is_err());
        assert_eq!(store.profile("10"), None);
        assert!(store.keys(&[PROFILE_NAMESPACE, "10"]).is_empty());
    }
}
