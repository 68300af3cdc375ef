use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::errors::StorageQuotaExceeded;

/// File-backed string key/value store with an optional byte quota.
///
/// Every read refreshes from disk, and writes merge the touched keys onto
/// whatever is currently on disk so that two stores sharing a file do not
/// clobber each other's keys.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
    quota_bytes: Option<usize>,
    payload: Option<Map<String, Value>>,
    dirty_keys: Vec<String>,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            quota_bytes: None,
            payload: None,
            dirty_keys: Vec::new(),
        }
    }

    pub fn with_quota(mut self, quota_bytes: Option<usize>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn get_item(&mut self, key: &str) -> Option<String> {
        let payload = self.refresh();
        payload.get(key).and_then(Value::as_str).map(str::to_string)
    }

    pub fn set_item(&mut self, key: &str, value: impl Into<String>) -> anyhow::Result<()> {
        let value = value.into();
        let quota = self.quota_bytes;
        let payload = self.refresh();
        if payload.get(key).and_then(Value::as_str) == Some(value.as_str()) {
            return Ok(());
        }
        if let Some(quota) = quota {
            let required = usage_bytes(payload) - entry_bytes(payload, key) + key.len() + value.len();
            if required > quota {
                return Err(StorageQuotaExceeded { required, quota }.into());
            }
        }
        payload.insert(key.to_string(), Value::String(value));
        if !self.dirty_keys.iter().any(|existing| existing == key) {
            self.dirty_keys.push(key.to_string());
        }
        self.flush()
    }

    /// Bytes used by all keys and values currently on disk.
    pub fn usage_bytes(&mut self) -> usize {
        usage_bytes(self.refresh())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        if self.payload.is_none() || self.dirty_keys.is_empty() {
            return Ok(());
        }

        let mut on_disk = read_json_object(&self.path).unwrap_or_default();
        if let Some(payload) = &self.payload {
            for key in &self.dirty_keys {
                if let Some(value) = payload.get(key) {
                    on_disk.insert(key.clone(), value.clone());
                }
            }
        }
        write_json_object(&self.path, &on_disk)?;
        self.payload = Some(on_disk);
        self.dirty_keys.clear();
        Ok(())
    }

    fn refresh(&mut self) -> &mut Map<String, Value> {
        self.payload.insert(read_json_object(&self.path).unwrap_or_default())
    }
}

fn usage_bytes(payload: &Map<String, Value>) -> usize {
    payload
        .keys()
        .map(|key| entry_bytes(payload, key))
        .sum()
}

fn entry_bytes(payload: &Map<String, Value>, key: &str) -> usize {
    match payload.get(key) {
        Some(Value::String(value)) => key.len() + value.len(),
        Some(other) => key.len() + other.to_string().len(),
        None => 0,
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}
