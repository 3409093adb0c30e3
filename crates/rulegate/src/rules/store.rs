//! Per-document rule records on disk.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_yaml::Value;
use thiserror::Error;

use super::model::{RuleError, RuleItem, RuleKind, RuleSet};

/// Errors from rule-store and audit operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The document id cannot be used as a file name.
    #[error("invalid document id: {0:?}")]
    InvalidDocumentId(String),
    /// No rule record exists for the document.
    #[error("no rules stored for document {0:?}")]
    DocumentNotFound(String),
    /// The rule itself was rejected.
    #[error(transparent)]
    Rule(#[from] RuleError),
    /// Serializing a record failed.
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_yaml::Error),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Check that a document id is safe to use as a file stem.
pub fn validate_document_id(id: &str) -> Result<(), StoreError> {
    let invalid = id.trim().is_empty()
        || id.trim() != id
        || id.starts_with('.')
        || id.contains('/')
        || id.contains('\\')
        || id.contains("..")
        || id.contains('\0');
    if invalid {
        Err(StoreError::InvalidDocumentId(id.to_string()))
    } else {
        Ok(())
    }
}

/// Async locks keyed by document id.
#[derive(Debug, Default)]
struct DocumentLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DocumentLocks {
    /// The lock for `id`. Entries nobody else holds are dropped first, so
    /// the map only grows with documents that are being mutated right now.
    fn get(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|key, lock| key == id || Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Filesystem-backed store holding one rule file per source document.
///
/// Records are YAML mappings with exactly the keys `allowed`, `forbidden`
/// and `required`. Mutations of the same document are serialized through a
/// per-document lock; reads take no lock and rely on atomic replacement of
/// the file.
#[derive(Debug)]
pub struct RuleStore {
    root: PathBuf,
    locks: DocumentLocks,
}

impl RuleStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DocumentLocks::default(),
        }
    }

    /// Directory holding the rule files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read a document's rules. Missing or unreadable records are empty.
    pub async fn read(&self, id: &str) -> RuleSet {
        if let Err(e) = validate_document_id(id) {
            tracing::warn!(document_id = %id, error = %e, "refusing to read rule record");
            return RuleSet::default();
        }
        self.load(id).await.unwrap_or_default()
    }

    /// Returns true if a record exists for the document.
    pub async fn contains(&self, id: &str) -> bool {
        validate_document_id(id).is_ok() && self.existing_path(id).await.is_some()
    }

    /// Overwrite a document's rules.
    pub async fn write(&self, id: &str, rules: &RuleSet) -> Result<(), StoreError> {
        validate_document_id(id)?;
        let lock = self.locks.get(id);
        let _guard = lock.lock().await;
        self.persist(id, rules).await
    }

    /// Add one rule to a document. Returns whether the record changed.
    ///
    /// Adding an entry that is already present is a no-op and leaves the
    /// file untouched.
    pub async fn add_rule(
        &self,
        id: &str,
        kind: RuleKind,
        item: RuleItem,
    ) -> Result<bool, StoreError> {
        validate_document_id(id)?;
        let lock = self.locks.get(id);
        let _guard = lock.lock().await;

        let mut rules = self.load(id).await.unwrap_or_default();
        if !rules.insert(kind, item)? {
            return Ok(false);
        }
        self.persist(id, &rules).await?;
        tracing::debug!(document_id = %id, kind = %kind, "rule added");
        Ok(true)
    }

    /// Remove one rule from a document. Returns whether it was present.
    pub async fn delete_rule(
        &self,
        id: &str,
        kind: RuleKind,
        item: &RuleItem,
    ) -> Result<bool, StoreError> {
        validate_document_id(id)?;
        let lock = self.locks.get(id);
        let _guard = lock.lock().await;

        let Some(mut rules) = self.load(id).await else {
            return Ok(false);
        };
        if !rules.remove(kind, item) {
            return Ok(false);
        }
        self.persist(id, &rules).await?;
        tracing::debug!(document_id = %id, kind = %kind, "rule deleted");
        Ok(true)
    }

    /// Delete a document's record entirely.
    pub async fn delete_document(&self, id: &str) -> Result<(), StoreError> {
        validate_document_id(id)?;
        let lock = self.locks.get(id);
        let _guard = lock.lock().await;

        let paths = self.existing_paths(id).await;
        if paths.is_empty() {
            return Err(StoreError::DocumentNotFound(id.to_string()));
        }
        // Both `.yml` and `.yaml` may exist; leaving either would revive the record.
        for path in &paths {
            tokio::fs::remove_file(path).await?;
        }
        tracing::info!(document_id = %id, files = paths.len(), "rule record deleted");
        Ok(())
    }

    /// Read every record, keyed by document id in sorted order.
    pub async fn read_all(&self) -> BTreeMap<String, RuleSet> {
        let mut records = BTreeMap::new();

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return records,
            Err(e) => {
                tracing::warn!(dir = %self.root.display(), error = %e, "cannot list rule records");
                return records;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "error while listing rule records");
                    break;
                }
            };
            if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(id) = record_id(&name) else {
                continue;
            };
            if records.contains_key(id) {
                continue;
            }
            if let Some(rules) = read_record(&entry.path()).await {
                records.insert(id.to_string(), rules);
            }
        }

        records
    }

    /// Union of every record's collections, deduplicated.
    ///
    /// Recomputed on every call so it always reflects the files on disk.
    pub async fn merge_all(&self) -> RuleSet {
        let mut merged = RuleSet::default();
        for rules in self.read_all().await.values() {
            merged.merge(rules);
        }
        merged
    }

    async fn load(&self, id: &str) -> Option<RuleSet> {
        let path = self.existing_path(id).await?;
        read_record(&path).await
    }

    async fn existing_path(&self, id: &str) -> Option<PathBuf> {
        self.existing_paths(id).await.into_iter().next()
    }

    async fn existing_paths(&self, id: &str) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for ext in ["yml", "yaml"] {
            let path = self.root.join(format!("{id}.{ext}"));
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                paths.push(path);
            }
        }
        paths
    }

    async fn persist(&self, id: &str, rules: &RuleSet) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = match self.existing_path(id).await {
            Some(path) => path,
            None => self.root.join(format!("{id}.yml")),
        };
        let yaml = rules.to_yaml()?;

        // Temp file + rename so readers never observe a half-written record.
        let tmp = self.root.join(format!(".{id}.yml.tmp"));
        tokio::fs::write(&tmp, yaml).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

fn record_id(file_name: &str) -> Option<&str> {
    if file_name.starts_with('.') {
        return None;
    }
    file_name
        .strip_suffix(".yml")
        .or_else(|| file_name.strip_suffix(".yaml"))
        .filter(|id| !id.is_empty())
}

async fn read_record(path: &Path) -> Option<RuleSet> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read rule record");
            return None;
        }
    };
    if text.trim().is_empty() {
        return Some(RuleSet::default());
    }
    let parsed = serde_yaml::from_str::<Value>(&text)
        .ok()
        .and_then(|value| RuleSet::from_value(&value));
    if parsed.is_none() {
        tracing::warn!(path = %path.display(), "rule record is not a valid mapping");
    }
    parsed
}
