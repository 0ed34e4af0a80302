//! Virtual Filestore (C2): the file I/O surface both handlers consume.
//!
//! The core never touches a filesystem directly. A [`VirtualFilestore`]
//! implementation is supplied by the host; this module ships a `std`-backed
//! [`NativeFilestore`] for real use and an [`InMemoryFilestore`] usable
//! without `std`, pairing a real transport with an in-memory stand-in for
//! tests.

#[cfg(feature = "alloc")]
use alloc::collections::BTreeMap;
#[cfg(feature = "alloc")]
use alloc::string::String;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilestoreError {
    /// `stat_size`/`open` could not find the named file.
    FileMissing(FilestorePath),
    /// A read went past the end of file, or the underlying I/O call failed.
    Io,
}

#[cfg(feature = "alloc")]
pub type FilestorePath = String;
#[cfg(not(feature = "alloc"))]
pub type FilestorePath = ();

#[cfg(feature = "std")]
impl core::fmt::Display for FilestoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FilestoreError::FileMissing(path) => write!(f, "file not found: {path}"),
            FilestoreError::Io => write!(f, "filestore I/O error"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FilestoreError {}

/// File I/O contract consumed by the Source and Destination handlers.
///
/// `open` must be called once per transaction; the returned handle is then
/// reused for every [`VirtualFilestore::read_from_opened_file`] call so the
/// implementation does not need to reopen or reseek on every segment.
pub trait VirtualFilestore {
    type File;

    /// Returns the size in bytes of the file at `path`.
    ///
    /// Fails with [`FilestoreError::FileMissing`] if it does not exist.
    fn stat_size(&self, path: &str) -> Result<u64, FilestoreError>;

    /// Opens `path` for reading, returning a handle reusable across calls to
    /// [`Self::read_from_opened_file`].
    fn open_file(&self, path: &str) -> Result<Self::File, FilestoreError>;

    /// Seeks to `offset` in `file` and reads exactly `len` bytes.
    ///
    /// Fails with [`FilestoreError::Io`] if fewer than `len` bytes remain.
    fn read_from_opened_file(
        &self,
        file: &mut Self::File,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, FilestoreError>;

    /// Writes `data` at `offset` in the file at `path`, creating it if it
    /// does not exist and extending it as needed.
    fn write_data(&self, path: &str, data: &[u8], offset: u64) -> Result<(), FilestoreError>;
}

#[cfg(feature = "std")]
pub use std_mod::NativeFilestore;

#[cfg(feature = "std")]
mod std_mod {
    use super::{FilestoreError, VirtualFilestore};
    use std::fs::OpenOptions;
    use std::io::{Read, Seek, SeekFrom, Write};

    /// [`VirtualFilestore`] backed by `std::fs`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct NativeFilestore;

    impl VirtualFilestore for NativeFilestore {
        type File = std::fs::File;

        fn stat_size(&self, path: &str) -> Result<u64, FilestoreError> {
            std::fs::metadata(path)
                .map(|m| m.len())
                .map_err(|_| FilestoreError::FileMissing(path.into()))
        }

        fn open_file(&self, path: &str) -> Result<Self::File, FilestoreError> {
            std::fs::File::open(path).map_err(|_| FilestoreError::FileMissing(path.into()))
        }

        fn read_from_opened_file(
            &self,
            file: &mut Self::File,
            offset: u64,
            len: usize,
        ) -> Result<Vec<u8>, FilestoreError> {
            file.seek(SeekFrom::Start(offset))
                .map_err(|_| FilestoreError::Io)?;
            let mut buf = alloc_buf(len);
            file.read_exact(&mut buf).map_err(|_| FilestoreError::Io)?;
            Ok(buf)
        }

        fn write_data(&self, path: &str, data: &[u8], offset: u64) -> Result<(), FilestoreError> {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(path)
                .map_err(|_| FilestoreError::Io)?;
            file.seek(SeekFrom::Start(offset))
                .map_err(|_| FilestoreError::Io)?;
            file.write_all(data).map_err(|_| FilestoreError::Io)
        }
    }

    fn alloc_buf(len: usize) -> Vec<u8> {
        let mut buf = Vec::with_capacity(len);
        buf.resize(len, 0);
        buf
    }

    use std::vec::Vec;

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::io::Write as _;

        #[test]
        fn round_trips_through_temp_file() {
            let dir = std::env::temp_dir();
            let path = dir.join(format!("cfdp-core-test-{:?}", std::thread::current().id()));
            let path_str = path.to_str().unwrap();
            let vfs = NativeFilestore;
            vfs.write_data(path_str, b"hello cfdp", 0).unwrap();
            assert_eq!(vfs.stat_size(path_str).unwrap(), 10);
            let mut handle = vfs.open_file(path_str).unwrap();
            let data = vfs.read_from_opened_file(&mut handle, 6, 4).unwrap();
            assert_eq!(data, b"cfdp");
            std::fs::remove_file(path).unwrap();
        }

        #[test]
        fn stat_missing_file_fails() {
            let vfs = NativeFilestore;
            assert_eq!(
                vfs.stat_size("/nonexistent/path/cfdp-core"),
                Err(FilestoreError::FileMissing("/nonexistent/path/cfdp-core".into()))
            );
        }
    }
}

/// In-memory [`VirtualFilestore`], usable without `std`. Intended for tests
/// and for hosts that stage files in RAM before a CFDP transfer.
///
/// Files live behind a `RefCell` so `write_data` can mutate the store while
/// still taking `&self`, matching the trait's signature -- a real filesystem
/// has the same "shared handle, interior mutation" shape.
#[cfg(feature = "alloc")]
#[derive(Debug, Default)]
pub struct InMemoryFilestore {
    files: core::cell::RefCell<BTreeMap<String, Vec<u8>>>,
}

#[cfg(feature = "alloc")]
impl InMemoryFilestore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a file for a transfer to read from.
    pub fn add_file(&mut self, path: &str, content: Vec<u8>) {
        self.files.get_mut().insert(path.into(), content);
    }

    pub fn file_contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(path).cloned()
    }
}

#[cfg(feature = "alloc")]
impl VirtualFilestore for InMemoryFilestore {
    /// The in-memory store has nothing to "open"; the handle is the path.
    type File = String;

    fn stat_size(&self, path: &str) -> Result<u64, FilestoreError> {
        self.files
            .borrow()
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| FilestoreError::FileMissing(path.into()))
    }

    fn open_file(&self, path: &str) -> Result<Self::File, FilestoreError> {
        if self.files.borrow().contains_key(path) {
            Ok(path.into())
        } else {
            Err(FilestoreError::FileMissing(path.into()))
        }
    }

    fn read_from_opened_file(
        &self,
        file: &mut Self::File,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, FilestoreError> {
        let files = self.files.borrow();
        let data = files.get(file.as_str()).ok_or(FilestoreError::Io)?;
        let offset = offset as usize;
        if offset + len > data.len() {
            return Err(FilestoreError::Io);
        }
        Ok(data[offset..offset + len].to_vec())
    }

    fn write_data(&self, path: &str, data: &[u8], offset: u64) -> Result<(), FilestoreError> {
        let mut files = self.files.borrow_mut();
        let entry = files.entry(path.into()).or_default();
        let end = offset as usize + data.len();
        if entry.len() < end {
            entry.resize(end, 0);
        }
        entry[offset as usize..end].copy_from_slice(data);
        Ok(())
    }
}
