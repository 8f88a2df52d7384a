//! Positional byte I/O shared by the file-backed stores.

use crate::error::StorageResult;

/// Random-access byte storage underneath a records file or auxiliary store.
///
/// Implementations only move bytes around. Headers, record slots and
/// length-prefixed entries are interpreted by the layer above.
///
/// Writing past the end grows the store and zero-fills the gap, so a
/// freshly allocated record reads back as all zeroes.
pub trait StorageBackend: Send + Sync {
    /// Copies `len` bytes starting at `offset` out of the store.
    ///
    /// # Errors
    ///
    /// [`StorageError::ReadPastEnd`](crate::StorageError::ReadPastEnd) if
    /// the range is not fully inside the store, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Overwrites bytes at `offset`, growing the store if the range ends
    /// past its current size.
    ///
    /// # Errors
    ///
    /// `ReadOnly` on a read-only store, or an I/O error.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Writes `data` at the current end and returns its offset.
    ///
    /// # Errors
    ///
    /// `ReadOnly` on a read-only store, or an I/O error.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Hands buffered bytes to the OS. Not a durability point.
    ///
    /// # Errors
    ///
    /// I/O errors.
    fn flush(&mut self) -> StorageResult<()>;

    /// Current size in bytes.
    ///
    /// # Errors
    ///
    /// I/O errors.
    fn size(&self) -> StorageResult<u64>;

    /// Makes every completed write durable.
    ///
    /// # Errors
    ///
    /// I/O errors.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates or zero-extends the store to exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// `ReadOnly` on a read-only store, or an I/O error.
    fn set_len(&mut self, len: u64) -> StorageResult<()>;
}
