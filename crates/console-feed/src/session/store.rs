//! Durable token record.
//!
//! The console keeps exactly one record: the current bearer token, stored
//! under [`TOKEN_KEY`].

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;

use crate::error::FeedResult;

/// Fixed name of the token record.
pub const TOKEN_KEY: &str = "auth_token";

/// Storage for the current token.
pub trait TokenStore: Send + Sync {
    /// Load the stored token, if any.
    fn load(&self) -> FeedResult<Option<String>>;

    /// Persist `token`, replacing any previous one.
    fn save(&self, token: &str) -> FeedResult<()>;

    /// Remove the stored token. Removing an absent token is not an error.
    fn clear(&self) -> FeedResult<()>;
}

/// Process-local token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> FeedResult<Option<String>> {
        Ok(self.token.lock().clone())
    }

    fn save(&self, token: &str) -> FeedResult<()> {
        *self.token.lock() = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> FeedResult<()> {
        *self.token.lock() = None;
        Ok(())
    }
}

/// JSON-file token store: `{"auth_token": "<token>"}`.
///
/// Other keys present in the file are preserved.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_records(&self) -> FeedResult<BTreeMap<String, serde_json::Value>> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_records(&self, records: &BTreeMap<String, serde_json::Value>) -> FeedResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(records)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> FeedResult<Option<String>> {
        let _guard = self.lock.lock();
        let records = self.read_records()?;
        Ok(records
            .get(TOKEN_KEY)
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    fn save(&self, token: &str) -> FeedResult<()> {
        let _guard = self.lock.lock();
        let mut records = self.read_records()?;
        records.insert(TOKEN_KEY.to_string(), serde_json::Value::from(token));
        self.write_records(&records)
    }

    fn clear(&self) -> FeedResult<()> {
        let _guard = self.lock.lock();
        let mut records = self.read_records()?;
        if records.remove(TOKEN_KEY).is_some() {
            self.write_records(&records)?;
        }
        Ok(())
    }
}
