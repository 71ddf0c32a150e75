//! Durable snapshot of the preference scores.
//!
//! The on-disk schema is exactly the flat score mapping
//! `{"action_id": number, ...}` with no wrapper, which keeps the file easy to
//! inspect and to edit by hand.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use ecoplan_core::ScoreMap;
use fd_lock::RwLock;
use tempfile::NamedTempFile;

use crate::error::{PersistenceError, Result};

/// Persistence seam for preference scores.
pub trait StateStore {
    /// Reads the persisted scores. An absent store is a cold start (empty map).
    fn load(&self) -> Result<ScoreMap>;
    /// Replaces the persisted scores.
    fn save(&self, scores: &ScoreMap) -> Result<()>;

    /// Read-modify-write: loads the current scores, lets `apply` change them
    /// and saves the result. Returns the saved scores.
    ///
    /// Stores shared between writers override this so that no other writer
    /// can save between the load and the save. The default is unguarded.
    fn update(&self, apply: &mut dyn FnMut(&mut ScoreMap)) -> Result<ScoreMap> {
        let mut scores = self.load()?;
        apply(&mut scores);
        self.save(&scores)?;
        Ok(scores)
    }
}

impl<S: StateStore + ?Sized> StateStore for &S {
    fn load(&self) -> Result<ScoreMap> {
        (**self).load()
    }
    fn save(&self, scores: &ScoreMap) -> Result<()> {
        (**self).save(scores)
    }
    fn update(&self, apply: &mut dyn FnMut(&mut ScoreMap)) -> Result<ScoreMap> {
        (**self).update(apply)
    }
}

impl<S: StateStore + ?Sized> StateStore for Arc<S> {
    fn load(&self) -> Result<ScoreMap> {
        (**self).load()
    }
    fn save(&self, scores: &ScoreMap) -> Result<()> {
        (**self).save(scores)
    }
    fn update(&self, apply: &mut dyn FnMut(&mut ScoreMap)) -> Result<ScoreMap> {
        (**self).update(apply)
    }
}

/// JSON file store with all-or-nothing writes.
///
/// `save` writes into a temporary file next to the target, syncs it and
/// renames it over the target. A crash mid-write leaves the previous file
/// intact; the temporary file is removed when the write fails.
///
/// `update` holds an exclusive advisory lock on a sidecar file
/// (`<state>.lock`) from the load to the rename, so concurrent processes
/// updating the same state file apply their changes one after another.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Sidecar file used for the advisory lock.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map_or_else(|| OsString::from("state"), OsString::from);
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn write_error(&self, source: io::Error) -> PersistenceError {
        PersistenceError::Write {
            path: self.path.clone(),
            source,
        }
    }

    fn open_lock_file(&self) -> Result<RwLock<fs::File>> {
        let lock_path = self.lock_path();
        let lock_error = |source| PersistenceError::Lock {
            path: lock_path.clone(),
            source,
        };
        fs::create_dir_all(self.parent_dir()).map_err(lock_error)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(lock_error)?;
        Ok(RwLock::new(file))
    }
}

/// Flushes the directory entry of a rename; returns whether that worked.
fn sync_dir(dir: &Path) -> bool {
    match fs::File::open(dir).and_then(|handle| handle.sync_all()) {
        Ok(()) => true,
        Err(err) => {
            crate::log_warning(
                &format!("syncing directory '{}' failed", dir.display()),
                &err,
            );
            false
        }
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<ScoreMap> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ScoreMap::new()),
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_str(&content).map_err(|source| PersistenceError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, scores: &ScoreMap) -> Result<()> {
        if let Some((action_id, value)) = scores.iter().find(|(_, v)| !v.is_finite()) {
            return Err(PersistenceError::NonFinite {
                action_id: action_id.clone(),
                value: *value,
            });
        }

        let parent = self.parent_dir();
        fs::create_dir_all(&parent).map_err(|e| self.write_error(e))?;

        let tmp = NamedTempFile::new_in(&parent).map_err(|e| self.write_error(e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, scores)
                .map_err(|e| self.write_error(e.into()))?;
            writer.write_all(b"\n").map_err(|e| self.write_error(e))?;
            writer.flush().map_err(|e| self.write_error(e))?;
        }
        tmp.as_file().sync_all().map_err(|e| self.write_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.write_error(e.error))?;

        sync_dir(&parent);
        Ok(())
    }

    fn update(&self, apply: &mut dyn FnMut(&mut ScoreMap)) -> Result<ScoreMap> {
        let mut lock = self.open_lock_file()?;
        let _guard = lock.write().map_err(|source| PersistenceError::Lock {
            path: self.lock_path(),
            source,
        })?;

        let mut scores = self.load()?;
        apply(&mut scores);
        self.save(&scores)?;
        Ok(scores)
    }
}

/// Volatile store, useful for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: Mutex<Option<ScoreMap>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `scores`.
    pub fn with_scores(scores: ScoreMap) -> Self {
        Self {
            data: Mutex::new(Some(scores)),
        }
    }

    /// Whether anything has been saved (or seeded) yet.
    pub fn is_initialized(&self) -> bool {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl StateStore for InMemoryStore {
    fn load(&self) -> Result<ScoreMap> {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(data.clone().unwrap_or_default())
    }

    fn save(&self, scores: &ScoreMap) -> Result<()> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        *data = Some(scores.clone());
        Ok(())
    }

    fn update(&self, apply: &mut dyn FnMut(&mut ScoreMap)) -> Result<ScoreMap> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let mut scores = data.clone().unwrap_or_default();
        apply(&mut scores);
        *data = Some(scores.clone());
        Ok(scores)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> ScoreMap {
        let mut scores = ScoreMap::new();
        scores.insert("bike".to_string(), 0.1);
        scores.insert("reduce_beef".to_string(), -0.05);
        scores
    }

    #[test]
    fn absent_file_is_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("missing.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_returns_same_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/state.json"));
        let scores = sample();

        store.save(&scores).unwrap();
        assert_eq!(store.load().unwrap(), scores);

        // save(load()) is a no-op.
        let before = fs::read_to_string(store.path()).unwrap();
        store.save(&store.load().unwrap()).unwrap();
        assert_eq!(fs::read_to_string(store.path()).unwrap(), before);
    }

    #[test]
    fn on_disk_schema_is_flat_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        store.save(&sample()).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({"bike": 0.1, "reduce_beef": -0.05}));
    }

    #[test]
    fn save_overwrites_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        store.save(&sample()).unwrap();

        let mut replacement = ScoreMap::new();
        replacement.insert("led_bulbs".to_string(), 0.3);
        store.save(&replacement).unwrap();
        assert_eq!(store.load().unwrap(), replacement);

        // No temp files are left behind.
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn update_reloads_before_applying() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let first = JsonFileStore::new(&path);
        let second = JsonFileStore::new(&path);

        first.save(&sample()).unwrap();
        let saved = second
            .update(&mut |scores| {
                scores.insert("led_bulbs".to_string(), 0.3);
            })
            .unwrap();

        let mut expected = sample();
        expected.insert("led_bulbs".to_string(), 0.3);
        assert_eq!(saved, expected);
        assert_eq!(first.load().unwrap(), expected);
        assert!(first.lock_path().exists());
    }

    #[test]
    fn update_does_not_write_over_corrupt_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{oops").unwrap();

        let err = JsonFileStore::new(&path)
            .update(&mut |scores| {
                scores.insert("bike".to_string(), 1.0);
            })
            .unwrap_err();
        assert!(err.is_corrupt());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{oops");
    }

    #[test]
    fn lock_path_sits_next_to_state() {
        let store = JsonFileStore::new("data/ecoplan.preferences.json");
        assert_eq!(
            store.lock_path(),
            PathBuf::from("data/ecoplan.preferences.json.lock")
        );
    }

    #[test]
    fn directory_sync_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sync_dir(dir.path()));
        assert!(!sync_dir(&dir.path().join("missing")));
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = JsonFileStore::new(&path);

        for content in ["{\"bike\": 0.1", "[0.1, 0.2]", "{\"bike\": \"high\"}", ""] {
            fs::write(&path, content).unwrap();
            let err = store.load().unwrap_err();
            assert!(err.is_corrupt(), "expected corrupt for {content:?}, got {err}");
        }
    }

    #[test]
    fn hand_edited_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"bike": 1, "public_transport": -0.25}"#).unwrap();

        let scores = JsonFileStore::new(&path).load().unwrap();
        assert!((scores["bike"] - 1.0).abs() < f64::EPSILON);
        assert!((scores["public_transport"] + 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn non_finite_scores_are_refused_and_old_state_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        store.save(&sample()).unwrap();

        let mut bad = sample();
        bad.insert("bike".to_string(), f64::NAN);
        let err = store.save(&bad).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::NonFinite { ref action_id, .. } if action_id == "bike"
        ));
        assert_eq!(store.load().unwrap(), sample());
    }

    #[test]
    fn in_memory_store_starts_cold() {
        let store = InMemoryStore::new();
        assert!(!store.is_initialized());
        assert!(store.load().unwrap().is_empty());
        store.save(&sample()).unwrap();
        assert!(store.is_initialized());
        assert_eq!(store.load().unwrap(), sample());
    }
}
