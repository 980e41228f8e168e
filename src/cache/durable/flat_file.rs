//! Flat JSON-file backing, used when SQLite cannot be opened
//!
//! One `<category>.json` document per category, loaded lazily and rewritten
//! whole on every change through a temp file and rename. Category names are
//! percent-encoded into file names, so distinct categories never share a file.

use super::{StorageBackend, StoreHealth};
use crate::cache::{
    entry::CacheEntry,
    types::{CacheKey, CacheValue, Category},
};
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

const WRITE_CHECK_FILE: &str = ".write-check";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    value: CacheValue,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    /// Write order; breaks created_at ties
    seq: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CategoryFile {
    next_seq: u64,
    records: BTreeMap<CacheKey, StoredRecord>,
}

impl CategoryFile {
    fn oldest_first(&self) -> Vec<(&CacheKey, &StoredRecord)> {
        let mut rows: Vec<_> = self.records.iter().collect();
        rows.sort_by(|(_, a), (_, b)| (a.created_at, a.seq).cmp(&(b.created_at, b.seq)));
        rows
    }
}

/// Directory of per-category JSON documents
#[derive(Debug)]
pub struct FlatFileBackend {
    dir: PathBuf,
    files: Mutex<HashMap<Category, CategoryFile>>,
}

impl FlatFileBackend {
    /// Open the directory, creating it and checking it is writable
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let check = dir.join(WRITE_CHECK_FILE);
        fs::write(&check, b"ok")?;
        fs::remove_file(&check)?;

        info!("Flat-file cache store at {:?}", dir);
        Ok(Self {
            dir,
            files: Mutex::new(HashMap::new()),
        })
    }

    /// Directory holding the category documents
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Category, CategoryFile>>> {
        self.files
            .lock()
            .map_err(|e| CacheError::Storage(format!("Lock poisoned: {}", e)))
    }

    fn path_for(&self, category: &Category) -> PathBuf {
        self.dir
            .join(format!("{}.json", urlencoding::encode(category.as_str())))
    }

    fn load(&self, category: &Category) -> CategoryFile {
        let path = self.path_for(category);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return CategoryFile::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                warn!("Discarding unreadable cache file {:?}: {}", path, e);
                CategoryFile::default()
            }
        }
    }

    fn persist(&self, category: &Category, file: &CategoryFile) -> Result<()> {
        let path = self.path_for(category);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(file)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Read the category document
    fn read_file<T>(&self, category: &Category, f: impl FnOnce(&CategoryFile) -> T) -> Result<T> {
        let mut files = self.lock()?;
        let file = files
            .entry(category.clone())
            .or_insert_with(|| self.load(category));
        Ok(f(file))
    }

    /// Change a copy of the category document and keep it only once it is on disk
    fn update_file<T>(
        &self,
        category: &Category,
        f: impl FnOnce(&mut CategoryFile) -> (T, bool),
    ) -> Result<T> {
        let mut files = self.lock()?;
        let file = files
            .entry(category.clone())
            .or_insert_with(|| self.load(category));

        let mut draft = file.clone();
        let (out, changed) = f(&mut draft);
        if changed {
            self.persist(category, &draft)?;
            *file = draft;
        }
        Ok(out)
    }

    fn known_categories(&self) -> Result<Vec<Category>> {
        let mut categories: Vec<Category> = self.lock()?.keys().cloned().collect();
        let loaded: Vec<PathBuf> = categories.iter().map(|c| self.path_for(c)).collect();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") || loaded.contains(&path) {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem,
                None => continue,
            };
            match urlencoding::decode(stem) {
                Ok(name) => categories.push(Category::new(name.into_owned())),
                Err(e) => warn!("Skipping cache file with undecodable name {:?}: {}", path, e),
            }
        }
        Ok(categories)
    }
}

impl StorageBackend for FlatFileBackend {
    fn name(&self) -> &'static str {
        "flat-file"
    }

    fn health(&self) -> StoreHealth {
        StoreHealth::Degraded
    }

    fn get(&self, category: &Category, key: &str) -> Result<Option<CacheEntry>> {
        self.read_file(category, |file| {
            file.records.get(key).map(|record| CacheEntry {
                key: key.to_string(),
                value: record.value.clone(),
                created_at: record.created_at,
                expires_at: record.expires_at,
            })
        })
    }

    fn put(&self, category: &Category, entry: &CacheEntry) -> Result<()> {
        self.update_file(category, |file| {
            let seq = file.next_seq;
            file.next_seq += 1;
            file.records.insert(
                entry.key.clone(),
                StoredRecord {
                    value: entry.value.clone(),
                    created_at: entry.created_at,
                    expires_at: entry.expires_at,
                    seq,
                },
            );
            ((), true)
        })
    }

    fn delete(&self, category: &Category, key: &str) -> Result<()> {
        self.update_file(category, |file| ((), file.records.remove(key).is_some()))
    }

    fn clear(&self, category: &Category) -> Result<usize> {
        self.update_file(category, |file| {
            let removed = file.records.len();
            file.records.clear();
            (removed, removed > 0)
        })
    }

    fn count(&self, category: &Category) -> Result<usize> {
        self.read_file(category, |file| file.records.len())
    }

    fn count_live(&self, category: &Category, now: DateTime<Utc>) -> Result<usize> {
        self.read_file(category, |file| {
            file.records
                .values()
                .filter(|record| record.expires_at > now)
                .count()
        })
    }

    fn keys(&self, category: &Category) -> Result<Vec<CacheKey>> {
        self.read_file(category, |file| {
            file.oldest_first()
                .into_iter()
                .map(|(key, _)| key.clone())
                .collect()
        })
    }

    fn evict_oldest(&self, category: &Category, keep: usize) -> Result<usize> {
        self.update_file(category, |file| {
            let excess = file.records.len().saturating_sub(keep);
            let victims: Vec<CacheKey> = file
                .oldest_first()
                .into_iter()
                .take(excess)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &victims {
                file.records.remove(key);
            }
            (victims.len(), !victims.is_empty())
        })
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for category in self.known_categories()? {
            removed += self.update_file(&category, |file| {
                let before = file.records.len();
                file.records.retain(|_, record| record.expires_at > now);
                let swept = before - file.records.len();
                (swept, swept > 0)
            })?;
        }
        debug!("Flat-file sweep removed {} entries", removed);
        Ok(removed)
    }
}
