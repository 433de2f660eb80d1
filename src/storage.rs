use std::{
    collections::HashMap,
    fmt, fs,
    io::{self, Write},
    path::{Component, Path, PathBuf},
    sync::{Arc, RwLock},
};

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::gcs::GcsStorage;

/// 儲存操作可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Key is invalid: {0}")]
    InvalidKey(String),
    #[error("Key not found: {0}")]
    NotFound(String),
    #[error("Lock poisoned")]
    LockPoisoned,
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Storage backend returned {status} for {key}: {message}")]
    Remote {
        key: String,
        status: u16,
        message: String,
    },
    #[error("Access token unavailable: {0}")]
    Token(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// 以 key 定址的 blob 儲存介面。
pub trait Storage: Send + Sync + fmt::Debug {
    /// 讀取 key 的內容，不存在時回傳 [`StorageError::NotFound`]。
    fn read_file(&self, key: &str) -> Result<Vec<u8>>;

    /// 以 `value` 整個覆寫 key 的內容。
    fn write_file(&self, key: &str, value: &[u8]) -> Result<()>;

    /// 刪除 key，回傳刪除前是否存在。
    fn remove(&self, key: &str) -> Result<bool>;

    fn exists(&self, key: &str) -> Result<bool>;

    fn copy(&self, from: &str, to: &str) -> Result<()> {
        let value = self.read_file(from)?;
        self.write_file(to, &value)
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.copy(from, to)?;
        self.remove(from)?;
        Ok(())
    }
}

/// 依 bucket 字串選擇後端：`file://` 為本機目錄，其餘為 GCS bucket（可帶 `gs://`）。
pub fn open_storage(bucket: &str) -> Result<Box<dyn Storage>> {
    if let Some(path) = bucket.strip_prefix("file://") {
        return Ok(Box::new(LocalStorage::open(path)?));
    }
    Ok(Box::new(GcsStorage::new(bucket)?))
}

/// key 正規化與驗證。
pub(crate) struct KeyUtils;

impl KeyUtils {
    /// 正規化為不含開頭斜線的相對 key，拒絕空字串、控制字元與跳出根目錄的 `..`。
    pub(crate) fn normalize(key: &str) -> Result<String> {
        if key.contains('\0') || key.contains('\n') || key.contains('\r') {
            return Err(StorageError::InvalidKey(format!(
                "Invalid characters in key: {}",
                key
            )));
        }
        if key.ends_with('/') {
            return Err(StorageError::InvalidKey(format!(
                "File key cannot end with '/': {}",
                key
            )));
        }

        let mut parts: Vec<&str> = Vec::new();
        for component in Path::new(key).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(StorageError::InvalidKey(format!(
                            "Cannot use '..' to escape root directory: {}",
                            key
                        )));
                    }
                }
                Component::Normal(name) => match name.to_str() {
                    Some(name) => parts.push(name),
                    None => {
                        return Err(StorageError::InvalidKey(format!(
                            "Non-UTF8 path component in: {}",
                            key
                        )))
                    }
                },
                Component::Prefix(_) => {
                    return Err(StorageError::InvalidKey(format!("Invalid path: {}", key)))
                }
            }
        }

        if parts.is_empty() {
            return Err(StorageError::InvalidKey("Empty key".to_string()));
        }
        Ok(parts.join("/"))
    }
}

/// 以本機目錄作為 bucket，寫入透過暫存檔原子性地取代目標。
#[derive(Debug)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(KeyUtils::normalize(key)?))
    }
}

impl Storage for LocalStorage {
    fn read_file(&self, key: &str) -> Result<Vec<u8>> {
        match fs::read(self.path(key)?) {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path(key)?;
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;

        let mut temp = NamedTempFile::new_in(parent)?;
        temp.write_all(value)?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.path(key)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path(key)?.is_file())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.path(from)?;
        let target = self.path(to)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::rename(&source, &target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(from.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// 基於記憶體的儲存實作。
#[derive(Debug, Default, Clone)]
pub struct MemStorage {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 目前所有 key，依字典序排列。
    pub fn keys(&self) -> Result<Vec<String>> {
        let data = self.data.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut keys: Vec<String> = data.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

impl Storage for MemStorage {
    fn read_file(&self, key: &str) -> Result<Vec<u8>> {
        let path = KeyUtils::normalize(key)?;
        let data = self.data.read().map_err(|_| StorageError::LockPoisoned)?;
        data.get(&path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn write_file(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = KeyUtils::normalize(key)?;
        self.data
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(path, value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let path = KeyUtils::normalize(key)?;
        Ok(self
            .data
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(&path)
            .is_some())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let path = KeyUtils::normalize(key)?;
        Ok(self
            .data
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .contains_key(&path))
    }
}
