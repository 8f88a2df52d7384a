//! [`StorageBackend`] held entirely in memory.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;

/// Bytes in a `Vec`, never persisted.
///
/// Stands in for an auxiliary file that a read-only connection finds
/// missing, and lets tests feed hand-built or damaged images to the
/// format readers.
///
/// ```rust
/// use fsrecords_storage::{InMemoryBackend, StorageBackend};
///
/// let mut names = InMemoryBackend::new();
/// names.write_at(8, b"src").unwrap();
/// assert_eq!(names.size().unwrap(), 11);
/// assert_eq!(names.read_at(0, 8).unwrap(), vec![0; 8]);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    bytes: Mutex<Vec<u8>>,
}

impl InMemoryBackend {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store starting out with `bytes`.
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(bytes),
        }
    }

    /// Snapshot of the current contents.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let bytes = self.bytes.lock();
        let size = bytes.len() as u64;
        let range = usize::try_from(offset)
            .ok()
            .and_then(|start| Some(start..start.checked_add(len)?))
            .filter(|range| range.end <= bytes.len());
        match range {
            Some(range) => Ok(bytes[range].to_vec()),
            None => Err(StorageError::ReadPastEnd { offset, len, size }),
        }
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let bytes = self.bytes.get_mut();
        let start = offset as usize;
        let end = start + data.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let bytes = self.bytes.get_mut();
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.lock().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn set_len(&mut self, len: u64) -> StorageResult<()> {
        self.bytes.get_mut().resize(len as usize, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_follow_appends() {
        let mut store = InMemoryBackend::new();
        assert_eq!(store.size().unwrap(), 0);
        assert_eq!(store.append(&[0; 8]).unwrap(), 0);
        assert_eq!(store.append(b"name").unwrap(), 8);
        assert_eq!(store.read_at(8, 4).unwrap(), b"name");
    }

    #[test]
    fn out_of_range_reads_report_size() {
        let store = InMemoryBackend::with_data(vec![1; 10]);
        assert!(matches!(
            store.read_at(6, 5),
            Err(StorageError::ReadPastEnd { offset: 6, len: 5, size: 10 })
        ));
        assert!(store.read_at(u64::MAX, 1).is_err());
        assert!(store.read_at(10, 0).unwrap().is_empty());
    }

    #[test]
    fn damaged_image_can_be_patched() {
        let mut store = InMemoryBackend::with_data(b"FSNM".to_vec());
        store.write_at(6, &[1]).unwrap();
        assert_eq!(store.data(), b"FSNM\0\0\x01".to_vec());

        store.set_len(4).unwrap();
        assert_eq!(store.data(), b"FSNM".to_vec());
    }
}
