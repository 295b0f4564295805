//! The `metadata.json` sidecar kept in every output directory.
//!
//! Each stage records what it produced under its own key. Writes never drop
//! keys written by other stages, and a corrupt sidecar is treated as empty.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt};

use crate::error::Result;

pub const METADATA_FILE_NAME: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactValue {
    Text { content: String },
    Path { path: PathBuf },
    Data { value: serde_json::Value },
}

impl ArtifactValue {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path { path: path.into() }
    }

    pub fn data(value: impl Into<serde_json::Value>) -> Self {
        Self::Data {
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    #[serde(flatten)]
    pub value: ArtifactValue,
    pub updated_at: DateTime<Utc>,
}

/// The parsed sidecar. Values are kept as raw JSON so keys that are not
/// entries (older sidecars, hand edits) survive a rewrite untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataRecord {
    entries: BTreeMap<String, serde_json::Value>,
}

impl MetadataRecord {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn raw(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    pub fn get(&self, key: &str) -> Option<MetadataEntry> {
        self.entries
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn text(&self, key: &str) -> Option<String> {
        match self.get(key)?.value {
            ArtifactValue::Text { content } => Some(content),
            _ => None,
        }
    }

    pub fn path(&self, key: &str) -> Option<PathBuf> {
        match self.get(key)?.value {
            ArtifactValue::Path { path } => Some(path),
            _ => None,
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: ArtifactValue) {
        let entry = MetadataEntry {
            value,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&entry).unwrap_or(serde_json::Value::Null);
        self.entries.insert(key.into(), json);
    }
}

/// Reads and merges `metadata.json` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataStore;

impl MetadataStore {
    pub fn sidecar_path(dir: &Path) -> PathBuf {
        dir.join(METADATA_FILE_NAME)
    }

    /// Load the record for `dir`. Missing or unparsable files yield an empty record.
    pub async fn load(dir: &Path) -> MetadataRecord {
        let path = Self::sidecar_path(dir);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return MetadataRecord::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unable to read metadata, starting empty");
                return MetadataRecord::default();
            }
        };

        match serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&content) {
            Ok(entries) => MetadataRecord { entries },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "metadata is not a JSON object, starting empty");
                MetadataRecord::default()
            }
        }
    }

    /// Set one key and keep everything else.
    pub async fn merge_write(dir: &Path, key: &str, value: ArtifactValue) -> Result<()> {
        Self::merge_many(dir, vec![(key.to_string(), value)]).await
    }

    /// Set several keys in one read-modify-write.
    pub async fn merge_many(dir: &Path, updates: Vec<(String, ArtifactValue)>) -> Result<()> {
        let mut record = Self::load(dir).await;
        for (key, value) in updates {
            record.set(key, value);
        }
        Self::write(dir, &record).await
    }

    async fn write(dir: &Path, record: &MetadataRecord) -> Result<()> {
        fs::create_dir_all(dir).await?;
        let path = Self::sidecar_path(dir);
        let temp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&record.entries)?;

        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(content.as_bytes()).await?;
            file.sync_all().await?;
        }

        fs::rename(&temp_path, &path).await?;
        tracing::debug!(path = %path.display(), "metadata updated");
        Ok(())
    }
}
