use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use uuid::Uuid;

/// Cache capacity fronting both store collections.
const CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

/// Errors returned by user store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("user not found")]
    UserNotFound,
}

/// Stored account row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub user_id: Uuid,
    /// Concurrent subscriber slots granted to this account.
    pub max_subscribers: usize,
}

/// User and auth-key store backed by sqlite, fronted by bounded LRU caches.
///
/// Auth-key lookups cache misses too, so a flood of bad tokens stays off the
/// database.
pub struct UserStore {
    conn: Mutex<Connection>,
    user_cache: Mutex<LruCache<Uuid, User>>,
    auth_key_cache: Mutex<LruCache<Vec<u8>, Option<Uuid>>>,
}

impl UserStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;
             CREATE TABLE IF NOT EXISTS users (
               user_id BLOB PRIMARY KEY,
               max_subscribers INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS authkeys (
               auth_key BLOB PRIMARY KEY,
               user_id BLOB NOT NULL
             );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            user_cache: Mutex::new(LruCache::new(CACHE_CAPACITY)),
            auth_key_cache: Mutex::new(LruCache::new(CACHE_CAPACITY)),
        })
    }

    /// Creates an account with a fresh random id.
    pub fn create_user(&self, max_subscribers: usize) -> Result<User, StoreError> {
        let user = User {
            user_id: Uuid::new_v4(),
            max_subscribers,
        };
        self.conn().execute(
            "INSERT INTO users (user_id, max_subscribers) VALUES (?1, ?2)",
            params![user.user_id.as_bytes().as_slice(), max_subscribers as i64],
        )?;
        self.user_cache().put(user.user_id, user.clone());
        Ok(user)
    }

    pub fn user_by_id(&self, user_id: Uuid) -> Result<User, StoreError> {
        if let Some(user) = self.user_cache().get(&user_id) {
            return Ok(user.clone());
        }

        let row = self
            .conn()
            .query_row(
                "SELECT max_subscribers FROM users WHERE user_id=?1",
                params![user_id.as_bytes().as_slice()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;

        match row {
            Some(max_subscribers) => {
                let user = User {
                    user_id,
                    max_subscribers: max_subscribers.max(0) as usize,
                };
                self.user_cache().put(user_id, user.clone());
                Ok(user)
            }
            None => Err(StoreError::UserNotFound),
        }
    }

    /// Binds an opaque auth key to a user, replacing any previous binding.
    pub fn upsert_auth_key(&self, auth_key: &[u8], user_id: Uuid) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO authkeys (auth_key, user_id) VALUES (?1, ?2)
             ON CONFLICT(auth_key) DO UPDATE SET user_id=excluded.user_id",
            params![auth_key, user_id.as_bytes().as_slice()],
        )?;
        self.auth_key_cache().put(auth_key.to_vec(), Some(user_id));
        Ok(())
    }

    /// Resolves an opaque auth key to a user id. Misses are negatively
    /// cached.
    pub fn user_id_by_auth_key(&self, auth_key: &[u8]) -> Result<Uuid, StoreError> {
        if let Some(cached) = self.auth_key_cache().get(auth_key) {
            return cached.ok_or(StoreError::UserNotFound);
        }

        let row = self
            .conn()
            .query_row(
                "SELECT user_id FROM authkeys WHERE auth_key=?1",
                params![auth_key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;

        let resolved = row.and_then(|bytes| Uuid::from_slice(&bytes).ok());
        self.auth_key_cache().put(auth_key.to_vec(), resolved);
        resolved.ok_or(StoreError::UserNotFound)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn user_cache(&self) -> MutexGuard<'_, LruCache<Uuid, User>> {
        self.user_cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn auth_key_cache(&self) -> MutexGuard<'_, LruCache<Vec<u8>, Option<Uuid>>> {
        self.auth_key_cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}
