use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub trait ObjectStore {
    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, String>;

    fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), String>;

    /// Keys under `prefix`, sorted.
    fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, String>;

    fn presign_get(&self, bucket: &str, key: &str, expires_in: Duration)
        -> Result<String, String>;
}

/// Process-local store keyed by `(bucket, key)`.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| {
                objects
                    .keys()
                    .filter(|(object_bucket, _)| object_bucket == bucket)
                    .map(|(_, key)| key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, String> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| "object store lock poisoned".to_string())?;
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| format!("NoSuchKey: s3://{bucket}/{key}"))
    }

    fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), String> {
        self.objects
            .lock()
            .map_err(|_| "object store lock poisoned".to_string())?
            .insert((bucket.to_string(), key.to_string()), body.to_vec());
        Ok(())
    }

    fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, String> {
        Ok(self
            .keys(bucket)
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, String> {
        self.get_object(bucket, key)?;
        Ok(format!(
            "memory://{bucket}/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }
}

/// Store rooted at a local directory, one subdirectory per bucket. Used to run
/// handlers against files on disk.
#[derive(Debug, Clone)]
pub struct DirectoryObjectStore {
    root: PathBuf,
}

impl DirectoryObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }
}

impl ObjectStore for DirectoryObjectStore {
    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, String> {
        let path = self.object_path(bucket, key);
        fs::read(&path).map_err(|error| format!("failed to read {}: {error}", path.display()))
    }

    fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), String> {
        let path = self.object_path(bucket, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|error| format!("failed to create {}: {error}", parent.display()))?;
        }
        fs::write(&path, body).map_err(|error| format!("failed to write {}: {error}", path.display()))
    }

    fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, String> {
        let bucket_root = self.root.join(bucket);
        let mut keys = Vec::new();
        if bucket_root.is_dir() {
            collect_keys(&bucket_root, &bucket_root, &mut keys)?;
        }
        keys.retain(|key| key.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        _expires_in: Duration,
    ) -> Result<String, String> {
        let path = self.object_path(bucket, key);
        if !path.is_file() {
            return Err(format!("NoSuchKey: s3://{bucket}/{key}"));
        }
        Ok(format!("file://{}", path.display()))
    }
}

fn collect_keys(root: &Path, dir: &Path, keys: &mut Vec<String>) -> Result<(), String> {
    let entries =
        fs::read_dir(dir).map_err(|error| format!("failed to list {}: {error}", dir.display()))?;
    for entry in entries {
        let path = entry
            .map_err(|error| format!("failed to list {}: {error}", dir.display()))?
            .path();
        if path.is_dir() {
            collect_keys(root, &path, keys)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let key = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            keys.push(key);
        }
    }
    Ok(())
}
