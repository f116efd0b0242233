//! Key/value persistence for conversation state.
//!
//! The store hands its full session list to a [`Persistence`] after every mutation.  Values are
//! JSON so that implementations need not know the shape of what they hold.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};

use serde_json::{Value, from_reader, to_writer_pretty};

use crate::error::{Error, Result};

/// Durable key/value storage.
pub trait Persistence {
    /// Store `value` under `key`, replacing any previous value.
    fn save(&mut self, key: &str, value: &Value) -> Result<()>;

    /// The value under `key`, or `None` if nothing was saved.
    fn load(&self, key: &str) -> Result<Option<Value>>;

    /// Forget `key`.  Removing a missing key is not an error.
    fn remove(&mut self, key: &str) -> Result<()>;
}

impl<P: Persistence + ?Sized> Persistence for Box<P> {
    fn save(&mut self, key: &str, value: &Value) -> Result<()> {
        (**self).save(key, value)
    }

    fn load(&self, key: &str) -> Result<Option<Value>> {
        (**self).load(key)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

/// In-process persistence.  Nothing survives the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    values: HashMap<String, Value>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Persistence for MemoryPersistence {
    fn save(&mut self, key: &str, value: &Value) -> Result<()> {
        self.values.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.get(key).cloned())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// One pretty-printed JSON file per key inside a directory.
///
/// Writes go to a temporary file that is synced and then renamed over the target, so a crash
/// mid-write leaves the previous value in place.  A failed save removes the temporary file.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    dir: PathBuf,
}

impl FilePersistence {
    /// Use `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|err| Error::io(format!("failed to create {}", dir.display()), err))?;
        Ok(Self { dir })
    }

    /// The directory holding the files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        check_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl Persistence for FilePersistence {
    fn save(&mut self, key: &str, value: &Value) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        let result = write_synced(&tmp, key, value).and_then(|()| {
            fs::rename(&tmp, &path)
                .map_err(|err| Error::io(format!("failed to replace {}", path.display()), err))
        });
        if result.is_err() {
            match fs::remove_file(&tmp) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(path = %tmp.display(), error = %err, "temporary file kept");
                }
            }
        }
        result
    }

    fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::io(format!("failed to open {}", path.display()), err));
            }
        };
        let value = from_reader(BufReader::new(file)).map_err(|err| {
            Error::serialization(format!("failed to parse {}", path.display()), Some(Box::new(err)))
        })?;
        Ok(Some(value))
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::io(format!("failed to remove {}", path.display()), err)),
        }
    }
}

/// Write `value` to `tmp` and sync it to disk before it is renamed into place.
fn write_synced(tmp: &Path, key: &str, value: &Value) -> Result<()> {
    let file = File::create(tmp)
        .map_err(|err| Error::io(format!("failed to create {}", tmp.display()), err))?;
    let mut writer = BufWriter::new(file);
    to_writer_pretty(&mut writer, value).map_err(|err| {
        Error::serialization(format!("failed to serialize {key}"), Some(Box::new(err)))
    })?;
    let file = writer
        .into_inner()
        .map_err(|err| Error::io(format!("failed to write {}", tmp.display()), err.into_error()))?;
    file.sync_all()
        .map_err(|err| Error::io(format!("failed to sync {}", tmp.display()), err))
}

fn check_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::validation(
            format!("invalid persistence key {key:?}"),
            Some("key".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exercise(store: &mut dyn Persistence) {
        assert_eq!(store.load("sessions").unwrap(), None);
        store.save("sessions", &json!([{"id": "a"}])).unwrap();
        assert_eq!(store.load("sessions").unwrap(), Some(json!([{"id": "a"}])));
        store.save("sessions", &json!([])).unwrap();
        assert_eq!(store.load("sessions").unwrap(), Some(json!([])));
        store.remove("sessions").unwrap();
        assert_eq!(store.load("sessions").unwrap(), None);
        store.remove("sessions").unwrap();
    }

    #[test]
    fn memory_round_trip() {
        let mut store = MemoryPersistence::new();
        exercise(&mut store);
        assert!(store.is_empty());
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FilePersistence::new(dir.path().join("nested")).unwrap();
        exercise(&mut store);
    }

    #[test]
    fn file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = FilePersistence::new(dir.path()).unwrap();
        first.save("sessions", &json!({"n": 1})).unwrap();
        let second = FilePersistence::new(dir.path()).unwrap();
        assert_eq!(second.load("sessions").unwrap(), Some(json!({"n": 1})));
        assert!(dir.path().join("sessions.json").exists());
        assert!(!dir.path().join(".sessions.json.tmp").exists());
    }

    #[test]
    fn failed_replace_cleans_up_and_keeps_nothing_half_written() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in the target's place makes the rename fail.
        fs::create_dir(dir.path().join("sessions.json")).unwrap();
        let mut store = FilePersistence::new(dir.path()).unwrap();
        let err = store.save("sessions", &json!({"n": 1})).unwrap_err();
        assert!(matches!(err, Error::Io { .. }), "{err}");
        assert!(!dir.path().join(".sessions.json.tmp").exists());
        assert!(dir.path().join("sessions.json").is_dir());
    }

    #[test]
    fn file_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FilePersistence::new(dir.path()).unwrap();
        for key in ["", "../escape", "a/b", "a.b", "with space"] {
            assert!(store.save(key, &json!(1)).unwrap_err().is_validation(), "{key}");
        }
    }

    #[test]
    fn file_reports_corrupt_values() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sessions.json"), "{not json").unwrap();
        let store = FilePersistence::new(dir.path()).unwrap();
        assert!(matches!(
            store.load("sessions").unwrap_err(),
            Error::Serialization { .. }
        ));
    }
}
