//! Storage primitives: column files addressed by partition directory and column.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Fixed-width values, symbol codes, or variable-length payloads.
    Data,
    /// Per-row offsets of a variable-length column.
    Offsets,
}

impl FileKind {
    fn extension(&self) -> &'static str {
        match self {
            FileKind::Data => "d",
            FileKind::Offsets => "i",
        }
    }
}

/// Opaque handle naming one column file inside a partition directory.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ColumnFile {
    pub dir: String,
    pub column: String,
    pub kind: FileKind,
}

impl ColumnFile {
    pub fn new(dir: &str, column: &str, kind: FileKind) -> Self {
        Self {
            dir: dir.to_string(),
            column: column.to_string(),
            kind,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.column, self.kind.extension())
    }
}

pub trait StorageBackend: Send + Sync {
    fn create_dir(&self, dir: &str) -> Result<(), Error>;

    fn remove_dir(&self, dir: &str) -> Result<(), Error>;

    /// Creates or replaces the file with `bytes`.
    fn write(&self, file: &ColumnFile, bytes: &[u8]) -> Result<(), Error>;

    /// Appends `bytes` at the current end of the file.
    fn extend(&self, file: &ColumnFile, bytes: &[u8]) -> Result<(), Error>;

    fn truncate(&self, file: &ColumnFile, len: u64) -> Result<(), Error>;

    /// Reads up to `len` bytes starting at `offset`; a short file yields fewer bytes.
    fn read(&self, file: &ColumnFile, offset: u64, len: u64) -> Result<Vec<u8>, Error>;

    fn len(&self, file: &ColumnFile) -> Result<u64, Error>;
}

/// Column files under `<root>/<partition dir>/<column>.<ext>`.
#[derive(Clone, Debug)]
pub struct FsStorage {
    root: PathBuf,
    fsync: bool,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>, fsync: bool) -> Result<Self, Error> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(Error::from_io)?;
        Ok(Self { root, fsync })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, file: &ColumnFile) -> PathBuf {
        self.root.join(&file.dir).join(file.file_name())
    }

    fn finish(&self, handle: &File) -> Result<(), Error> {
        if self.fsync {
            handle.sync_all().map_err(Error::from_io)?;
        }
        Ok(())
    }
}

impl StorageBackend for FsStorage {
    fn create_dir(&self, dir: &str) -> Result<(), Error> {
        fs::create_dir_all(self.root.join(dir)).map_err(Error::from_io)
    }

    fn remove_dir(&self, dir: &str) -> Result<(), Error> {
        match fs::remove_dir_all(self.root.join(dir)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::from_io(e)),
        }
    }

    fn write(&self, file: &ColumnFile, bytes: &[u8]) -> Result<(), Error> {
        let mut handle = File::create(self.path(file)).map_err(Error::from_io)?;
        handle.write_all(bytes).map_err(Error::from_io)?;
        self.finish(&handle)
    }

    fn extend(&self, file: &ColumnFile, bytes: &[u8]) -> Result<(), Error> {
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(file))
            .map_err(Error::from_io)?;
        handle.write_all(bytes).map_err(Error::from_io)?;
        self.finish(&handle)
    }

    fn truncate(&self, file: &ColumnFile, len: u64) -> Result<(), Error> {
        let handle = OpenOptions::new()
            .write(true)
            .open(self.path(file))
            .map_err(Error::from_io)?;
        handle.set_len(len).map_err(Error::from_io)?;
        self.finish(&handle)
    }

    fn read(&self, file: &ColumnFile, offset: u64, len: u64) -> Result<Vec<u8>, Error> {
        let mut handle = File::open(self.path(file)).map_err(Error::from_io)?;
        if offset > 0 {
            handle.seek(SeekFrom::Start(offset)).map_err(Error::from_io)?;
        }
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len as usize)?;
        handle.take(len).read_to_end(&mut bytes).map_err(Error::from_io)?;
        Ok(bytes)
    }

    fn len(&self, file: &ColumnFile) -> Result<u64, Error> {
        fs::metadata(self.path(file))
            .map(|meta| meta.len())
            .map_err(Error::from_io)
    }
}
