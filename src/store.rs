use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, create_dir_all};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// A user document as stored in the collection
///
/// The document shape mirrors `{username, password}`: `password` holds the
/// digest or Argon2 PHC string, never the plaintext.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Username (unique key of the collection)
    pub username: String,

    /// Stored password hash
    pub password: String,
}

/// Errors raised by a user store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user database I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("user database is corrupt: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("username `{0}` already exists")]
    Duplicate(String),
}

/// A collection of user documents queried by exact username match.
pub trait UserStore: Send + Sync {
    /// Look a user up by username.
    fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Insert a user unless the username is already taken.
    ///
    /// The existence check and the write happen under one lock, so two
    /// concurrent signups for the same name cannot both succeed.
    fn insert_new(&self, record: UserRecord) -> Result<(), StoreError>;
}

/// User collection persisted as a JSON document on disk
///
/// The file holds a single object mapping usernames to records. The whole
/// collection is kept in memory and rewritten on every insert.
pub struct JsonUserStore {
    path: PathBuf,
    users: Mutex<HashMap<String, UserRecord>>,
}

impl JsonUserStore {
    /// Open the collection at `path`, creating the file (and its directory)
    /// with an empty collection if it doesn't exist.
    ///
    /// # Errors
    /// * Returns an error if the file cannot be created, read or parsed
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                create_dir_all(dir)?;
            }
        }

        if !path.exists() {
            let mut file = File::create(&path)?;
            file.write_all(b"{}")?;
        }

        let mut contents = String::new();
        File::open(&path)?.read_to_string(&mut contents)?;
        let users = if contents.trim().is_empty() {
            HashMap::new()
        } else {
            serde_json::from_str(&contents)?
        };

        Ok(Self {
            path,
            users: Mutex::new(users),
        })
    }

    /// Path of the backing JSON file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, users: &HashMap<String, UserRecord>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(users)?;

        // Write next to the target and rename so a crash never leaves half a file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes())?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl UserStore for JsonUserStore {
    fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(users.get(username).cloned())
    }

    fn insert_new(&self, record: UserRecord) -> Result<(), StoreError> {
        let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        if users.contains_key(&record.username) {
            return Err(StoreError::Duplicate(record.username));
        }

        let username = record.username.clone();
        users.insert(username.clone(), record);
        if let Err(e) = self.persist(&users) {
            // Keep memory consistent with what is on disk
            users.remove(&username);
            return Err(e);
        }
        Ok(())
    }
}

/// User collection that lives only in process memory
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<String, UserRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users
    pub fn len(&self) -> usize {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl UserStore for MemoryUserStore {
    fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(users.get(username).cloned())
    }

    fn insert_new(&self, record: UserRecord) -> Result<(), StoreError> {
        let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        if users.contains_key(&record.username) {
            return Err(StoreError::Duplicate(record.username));
        }
        users.insert(record.username.clone(), record);
        Ok(())
    }
}
