//! Persistent store for the bound identity.
//!
//! On disk the identity is a single file holding the chat id in decimal.
//! Writes go to a sibling temp file that is synced and renamed over the
//! target, so readers only ever see the old or the new value.

use crate::{BoundIdentity, ChatId, StorageError, StorageResult};
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

/// Single owner of the bound identity.
///
/// `save` calls are serialized; `current` reads an immutable snapshot and
/// never blocks on disk IO.
pub struct IdentityStore {
    path: PathBuf,
    current: RwLock<Option<BoundIdentity>>,
    write_lock: Mutex<()>,
}

impl IdentityStore {
    /// Open the store at `path`, restoring any persisted identity.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let store = Self {
            path: path.into(),
            current: RwLock::new(None),
            write_lock: Mutex::new(()),
        };
        let restored = store.load();
        if let Some(identity) = &restored {
            info!(chat_id = %identity.chat_id, "Restored bound identity");
        }
        *store.current.write() = restored;
        store
    }

    /// Read the persisted identity.
    ///
    /// Missing, unreadable and corrupt files all mean "unbound".
    pub fn load(&self) -> Option<BoundIdentity> {
        match read_chat_id(&self.path) {
            Ok(Some(chat_id)) => Some(BoundIdentity::restored(chat_id)),
            Ok(None) => {
                debug!(path = %self.path.display(), "No persisted identity");
                None
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "Ignoring unreadable identity file, treating as unbound"
                );
                None
            }
        }
    }

    /// Persist `identity` and make it the current one.
    ///
    /// The in-memory snapshot changes only after the file has been replaced.
    pub fn save(&self, identity: BoundIdentity) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        write_atomically(&self.path, &format!("{}\n", identity.chat_id))?;
        debug!(path = %self.path.display(), chat_id = %identity.chat_id, "Persisted identity");
        *self.current.write() = Some(identity);
        Ok(())
    }

    /// Snapshot of the bound identity.
    pub fn current(&self) -> Option<BoundIdentity> {
        self.current.read().clone()
    }

    pub fn current_chat_id(&self) -> Option<ChatId> {
        self.current.read().as_ref().map(|identity| identity.chat_id)
    }
}

fn read_chat_id(path: &Path) -> StorageResult<Option<ChatId>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    content
        .parse::<ChatId>()
        .map(Some)
        .map_err(|err| StorageError::Corrupt(format!("{}: {:?}", err, content.trim())))
}

fn write_atomically(path: &Path, content: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("identity");
    let tmp_path = dir.join(format!(
        ".{}.televery.tmp.{}.{}",
        file_name,
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ));

    let write_result = (|| -> io::Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;

        fs::rename(&tmp_path, path)?;

        if let Ok(parent_dir) = fs::File::open(dir) {
            let _ = parent_dir.sync_all();
        }
        Ok(())
    })();

    if write_result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    write_result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn open_without_file_is_unbound() {
        let dir = tempdir().unwrap();
        let store = IdentityStore::open(dir.path().join("chat_id"));
        assert!(store.current().is_none());
        assert!(store.load().is_none());
    }

    #[test]
    fn save_updates_current_and_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chat_id");
        let store = IdentityStore::open(&path);

        store.save(BoundIdentity::new(ChatId(42), "ksqsf")).unwrap();

        assert_eq!(store.current_chat_id(), Some(ChatId(42)));
        assert_eq!(store.current().unwrap().label.as_deref(), Some("ksqsf"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "42\n");
    }

    #[test]
    fn saved_identity_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chat_id");
        IdentityStore::open(&path)
            .save(BoundIdentity::new(ChatId(7), "ksqsf"))
            .unwrap();

        let reopened = IdentityStore::open(&path);
        assert_eq!(reopened.current(), Some(BoundIdentity::restored(ChatId(7))));
        assert_eq!(reopened.load().map(|i| i.chat_id), Some(ChatId(7)));
    }

    #[test]
    fn save_overwrites_previous_binding() {
        let dir = tempdir().unwrap();
        let store = IdentityStore::open(dir.path().join("chat_id"));

        store.save(BoundIdentity::new(ChatId(1), "a")).unwrap();
        store.save(BoundIdentity::new(ChatId(2), "b")).unwrap();

        assert_eq!(store.current_chat_id(), Some(ChatId(2)));
        assert_eq!(store.load().unwrap().chat_id, ChatId(2));
    }

    #[test]
    fn corrupt_file_is_treated_as_unbound() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chat_id");
        fs::write(&path, "not a number").unwrap();

        let store = IdentityStore::open(&path);
        assert!(store.current().is_none());
        assert!(matches!(read_chat_id(&path), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn empty_file_is_treated_as_unbound() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chat_id");
        fs::write(&path, "").unwrap();

        assert!(IdentityStore::open(&path).current().is_none());
    }

    #[test]
    fn legacy_file_with_trailing_newline_loads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chat_id");
        fs::write(&path, "123456789\n").unwrap();

        assert_eq!(
            IdentityStore::open(&path).current_chat_id(),
            Some(ChatId(123456789))
        );
    }

    #[test]
    fn save_creates_missing_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state").join("chat_id");
        let store = IdentityStore::open(&path);

        store.save(BoundIdentity::new(ChatId(5), "x")).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn failed_save_keeps_previous_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chat_id");
        let store = IdentityStore::open(&path);
        store.save(BoundIdentity::new(ChatId(1), "a")).unwrap();

        // A directory at the target makes the rename fail.
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupant"), "x").unwrap();

        assert!(store.save(BoundIdentity::new(ChatId(2), "b")).is_err());
        assert_eq!(store.current_chat_id(), Some(ChatId(1)));
    }

    #[test]
    fn save_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = IdentityStore::open(dir.path().join("chat_id"));
        store.save(BoundIdentity::new(ChatId(3), "x")).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["chat_id".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("chat_id");
        IdentityStore::open(&path)
            .save(BoundIdentity::new(ChatId(9), "x"))
            .unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn concurrent_saves_never_expose_partial_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chat_id");
        let store = Arc::new(IdentityStore::open(&path));

        let writers: Vec<_> = (1..=8i64)
            .map(|n| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for round in 0..20 {
                        store
                            .save(BoundIdentity::new(ChatId(n * 1000 + round), "w"))
                            .unwrap();
                    }
                })
            })
            .collect();

        let reader = {
            let path = path.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    match read_chat_id(&path) {
                        Ok(Some(chat_id)) => assert!(chat_id.get() >= 1000),
                        Ok(None) => {}
                        Err(err) => panic!("observed partial write: {}", err),
                    }
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();

        let last = store.current_chat_id().unwrap();
        assert_eq!(store.load().unwrap().chat_id, last);
    }
}
