//! Append-only interned string table.
//!
//! ```text
//! [magic "FSNM"][version u16][reserved u16]
//! [len u32][utf8 bytes] ...
//! ```
//!
//! Ids are 1-based in append order; 0 is the null name. The in-memory index
//! is rebuilt by scanning the file at open.

use crate::aux::{init_file_header, open_backend, read_u32_le, AuxFile, AuxiliaryStore, OpenMode, AUX_HEADER_SIZE};
use crate::error::{CoreError, CoreResult};
use fsrecords_storage::StorageBackend;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

const NAMES_MAGIC: [u8; 4] = *b"FSNM";
const NAMES_VERSION: u16 = 1;

/// Identifier of an interned name.
pub type NameId = u32;

/// Interned string table backed by a single file.
pub struct NamesStore {
    label: String,
    read_only: bool,
    inner: Mutex<NamesInner>,
}

struct NamesInner {
    /// `None` once closed.
    backend: Option<Box<dyn StorageBackend>>,
    names: Vec<String>,
    index: HashMap<String, NameId>,
    dirty: bool,
}

impl fmt::Debug for NamesStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("NamesStore")
            .field("label", &self.label)
            .field("read_only", &self.read_only)
            .field("len", &inner.names.len())
            .field("closed", &inner.backend.is_none())
            .finish()
    }
}

impl NamesStore {
    /// Opens the table at `path`.
    ///
    /// With `create_if_missing`, an [`OpenMode::Open`] of a missing file
    /// starts an empty table instead of failing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corrupted`] if the file is missing (and may not
    /// be created), has a bad header, or ends in a truncated or non-UTF-8
    /// entry.
    pub fn open(
        path: &Path,
        label: impl Into<String>,
        mode: OpenMode,
        read_only: bool,
        create_if_missing: bool,
    ) -> CoreResult<Self> {
        let label = label.into();
        let mut file = open_backend(path, mode, read_only, create_if_missing)?;
        init_file_header(&mut file, NAMES_MAGIC, NAMES_VERSION, read_only, &label)?;
        let AuxFile { backend, fresh } = file;

        let names = if fresh {
            Vec::new()
        } else {
            scan_names(backend.as_ref(), &label)?
        };
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i as NameId + 1))
            .collect();
        debug!(store = %label, names = names.len(), "opened names store");

        Ok(Self {
            label,
            read_only,
            inner: Mutex::new(NamesInner {
                backend: Some(backend),
                names,
                index,
                dirty: fresh && !read_only,
            }),
        })
    }

    /// Returns the id of `name`, appending it if it is not interned yet.
    ///
    /// # Errors
    ///
    /// Fails if the store is closed, or read-only and the name is new.
    pub fn enumerate(&self, name: &str) -> CoreResult<NameId> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let backend = inner.backend.as_mut().ok_or(CoreError::ConnectionClosed)?;
        if let Some(&id) = inner.index.get(name) {
            return Ok(id);
        }
        if self.read_only {
            return Err(fsrecords_storage::StorageError::ReadOnly.into());
        }

        let len = u32::try_from(name.len())
            .map_err(|_| CoreError::invalid_operation("name longer than 4 GiB"))?;
        let mut entry = Vec::with_capacity(4 + name.len());
        entry.extend_from_slice(&len.to_le_bytes());
        entry.extend_from_slice(name.as_bytes());
        backend.append(&entry)?;

        inner.names.push(name.to_owned());
        let id = inner.names.len() as NameId;
        inner.index.insert(name.to_owned(), id);
        inner.dirty = true;
        Ok(id)
    }

    /// Returns the id of `name` without interning it.
    #[must_use]
    pub fn try_enumerate(&self, name: &str) -> Option<NameId> {
        self.inner.lock().index.get(name).copied()
    }

    /// Returns the name with the given id.
    ///
    /// # Errors
    ///
    /// Fails on unknown ids or a closed store.
    pub fn value_of(&self, id: NameId) -> CoreResult<String> {
        let inner = self.inner.lock();
        if inner.backend.is_none() {
            return Err(CoreError::ConnectionClosed);
        }
        id.checked_sub(1)
            .and_then(|i| inner.names.get(i as usize))
            .cloned()
            .ok_or_else(|| CoreError::invalid_operation(format!("{}: unknown name id {id}", self.label)))
    }

    /// Number of interned names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().names.len()
    }

    /// Returns true if no name is interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn scan_names(backend: &dyn StorageBackend, label: &str) -> CoreResult<Vec<String>> {
    let size = backend.size()?;
    let mut names = Vec::new();
    let mut offset = AUX_HEADER_SIZE as u64;
    while offset < size {
        if size - offset < 4 {
            return Err(CoreError::corrupted(format!(
                "{label}: truncated entry header at offset {offset}"
            )));
        }
        let len = u64::from(read_u32_le(&backend.read_at(offset, 4)?));
        if size - offset - 4 < len {
            return Err(CoreError::corrupted(format!(
                "{label}: entry at offset {offset} claims {len} bytes past end of file"
            )));
        }
        let bytes = backend.read_at(offset + 4, len as usize)?;
        let name = String::from_utf8(bytes).map_err(|_| {
            CoreError::corrupted(format!("{label}: entry at offset {offset} is not UTF-8"))
        })?;
        names.push(name);
        offset += 4 + len;
    }
    Ok(names)
}

impl AuxiliaryStore for NamesStore {
    fn name(&self) -> &str {
        &self.label
    }

    fn force(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        let backend = inner.backend.as_mut().ok_or(CoreError::ConnectionClosed)?;
        if self.read_only {
            return Ok(());
        }
        backend.flush()?;
        backend.sync()?;
        inner.dirty = false;
        Ok(())
    }

    fn close(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        let Some(mut backend) = inner.backend.take() else {
            return Ok(());
        };
        if self.read_only {
            return Ok(());
        }
        backend.flush()?;
        backend.sync()?;
        inner.dirty = false;
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create(path: &Path) -> NamesStore {
        NamesStore::open(path, "names", OpenMode::Create, false, false).unwrap()
    }

    fn reopen(path: &Path) -> NamesStore {
        NamesStore::open(path, "names", OpenMode::Open, false, false).unwrap()
    }

    #[test]
    fn enumerate_is_idempotent() {
        let temp = tempdir().unwrap();
        let names = create(&temp.path().join("names.dat"));
        let a = names.enumerate("src").unwrap();
        let b = names.enumerate("main.rs").unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(names.enumerate("src").unwrap(), a);
        assert_eq!(names.len(), 2);
        assert_eq!(names.try_enumerate("main.rs"), Some(b));
        assert_eq!(names.try_enumerate("lib.rs"), None);
        assert!(names.value_of(0).is_err());
        assert!(names.value_of(3).is_err());
    }

    #[test]
    fn names_survive_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("names.dat");
        {
            let names = create(&path);
            for name in ["", "a", "ünïcode", "a/b/c"] {
                names.enumerate(name).unwrap();
            }
            names.close().unwrap();
        }
        let names = reopen(&path);
        assert_eq!(names.len(), 4);
        assert_eq!(names.value_of(3).unwrap(), "ünïcode");
        assert_eq!(names.try_enumerate("a/b/c"), Some(4));
    }

    #[test]
    fn truncated_entry_is_corrupted() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("names.dat");
        {
            let names = create(&path);
            names.enumerate("some-long-name").unwrap();
            names.close().unwrap();
        }
        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        let err = NamesStore::open(&path, "names", OpenMode::Open, false, false).unwrap_err();
        assert!(matches!(err, CoreError::Corrupted { .. }));
    }

    #[test]
    fn non_utf8_entry_is_corrupted() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("names.dat");
        create(&path).close().unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&[0xFF, 0xFE]);
        std::fs::write(&path, bytes).unwrap();

        let err = NamesStore::open(&path, "names", OpenMode::Open, false, false).unwrap_err();
        assert!(matches!(err, CoreError::Corrupted { .. }));
    }

    #[test]
    fn dirty_until_forced() {
        let temp = tempdir().unwrap();
        let names = create(&temp.path().join("names.dat"));
        names.force().unwrap();
        assert!(!names.is_dirty());
        names.enumerate("x").unwrap();
        assert!(names.is_dirty());
        names.force().unwrap();
        assert!(!names.is_dirty());
        names.close().unwrap();
        names.close().unwrap();
        assert!(matches!(names.enumerate("y"), Err(CoreError::ConnectionClosed)));
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(32))]

        #[test]
        fn ids_are_stable_across_reopen(names in proptest::collection::vec("[a-z0-9._/-]{0,12}", 1..24)) {
            let temp = tempdir().unwrap();
            let path = temp.path().join("names.dat");
            let ids: Vec<NameId> = {
                let store = create(&path);
                let ids = names.iter().map(|n| store.enumerate(n).unwrap()).collect();
                store.close().unwrap();
                ids
            };

            let store = reopen(&path);
            for (name, id) in names.iter().zip(&ids) {
                proptest::prop_assert_eq!(store.try_enumerate(name), Some(*id));
                proptest::prop_assert_eq!(&store.value_of(*id).unwrap(), name);
            }
            store.close().unwrap();
        }
    }
}
