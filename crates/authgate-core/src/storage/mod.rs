//! Durable key/value storage for session data.
//!
//! This module provides:
//! - `Storage`: the synchronous key/value trait the session layer persists through
//! - `FileStorage`: a single JSON file, replaced atomically on every write
//! - `KeyringStorage`: OS-level secure storage via keyring
//! - `MemoryStorage`: process-local storage for tests and ephemeral sessions

pub mod file;
pub mod keychain;
pub mod memory;

pub use file::FileStorage;
pub use keychain::KeyringStorage;
pub use memory::MemoryStorage;

use anyhow::Result;
use tracing::warn;

pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing a key that is not present is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Write several keys as one unit.
    ///
    /// The default writes the keys one by one and, if a write fails, puts back
    /// the previous values of the keys it already touched. Backends that can
    /// replace all keys atomically should override this.
    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut previous: Vec<(&str, Option<String>)> = Vec::with_capacity(entries.len());

        for &(key, value) in entries {
            let old = self.get(key)?;
            if let Err(e) = self.set(key, value) {
                for (written, old_value) in previous.into_iter().rev() {
                    let restored = match old_value {
                        Some(v) => self.set(written, &v),
                        None => self.remove(written),
                    };
                    if let Err(restore_err) = restored {
                        warn!(key = written, error = %restore_err, "Failed to roll back storage key");
                    }
                }
                return Err(e);
            }
            previous.push((key, old));
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}
