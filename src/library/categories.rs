//! User-assigned category store.
//!
//! One flat JSON file maps book directory names to their category lists.
//! Imports run in parallel and each wants to read-merge-write this file, so
//! every access holds one mutex across the whole load/modify/save span —
//! without it two concurrent imports could drop each other's categories.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Per-book user metadata. Extra fields in the file are preserved implicitly
/// by the map shape; today only categories exist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookUserMeta {
    #[serde(default)]
    pub categories: Vec<String>,
}

pub type UserMetadata = BTreeMap<String, BookUserMeta>;

/// Handle to the shared category file. Cheap to clone; all clones serialize
/// through the same lock.
#[derive(Debug, Clone)]
pub struct CategoryStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl CategoryStore {
    pub fn new(path: PathBuf) -> Self {
        CategoryStore {
            path,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Read the full store. A missing or unreadable file is an empty store.
    pub fn load(&self) -> UserMetadata {
        let _guard = self.lock.lock().unwrap();
        self.read_unlocked()
    }

    /// Replace one book's category list wholesale.
    pub fn replace(&self, book_dir: &str, categories: &[String]) -> io::Result<Vec<String>> {
        let _guard = self.lock.lock().unwrap();
        let mut all = self.read_unlocked();
        let entry = all.entry(book_dir.to_string()).or_default();
        entry.categories = categories.to_vec();
        let updated = entry.categories.clone();
        self.write_unlocked(&all)?;
        Ok(updated)
    }

    /// Merge categories into a book's list: trimmed, case-insensitively
    /// de-duplicated, append-only. Returns the merged list.
    pub fn merge(&self, book_dir: &str, categories: &[String]) -> io::Result<Vec<String>> {
        let _guard = self.lock.lock().unwrap();
        let mut all = self.read_unlocked();
        let entry = all.entry(book_dir.to_string()).or_default();
        for category in categories {
            let trimmed = category.trim();
            if trimmed.is_empty() {
                continue;
            }
            let already_present = entry
                .categories
                .iter()
                .any(|existing| existing.trim().to_lowercase() == trimmed.to_lowercase());
            if !already_present {
                entry.categories.push(trimmed.to_string());
            }
        }
        let merged = entry.categories.clone();
        self.write_unlocked(&all)?;
        Ok(merged)
    }

    fn read_unlocked(&self) -> UserMetadata {
        match fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("Ignoring malformed {}: {}", self.path.display(), e);
                UserMetadata::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => UserMetadata::new(),
            Err(e) => {
                warn!("Failed to read {}: {}", self.path.display(), e);
                UserMetadata::new()
            }
        }
    }

    fn write_unlocked(&self, all: &UserMetadata) -> io::Result<()> {
        let text = serde_json::to_string_pretty(all)?;
        fs::write(&self.path, text)
    }
}
