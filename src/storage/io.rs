// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Block managers: where segment files are read from.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
#[cfg(unix)]
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::warn;

use super::{StorageResult, TracedStorageError};

/// IO Backend of the file block manager
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IOBackend {
    /// Use Linux's `pread` API to read from the files.
    PositionedRead,
    /// Use cross-platform API to read from files. Note that this would hurt performance
    NormalRead,
}

impl Default for IOBackend {
    fn default() -> Self {
        if cfg!(unix) {
            IOBackend::PositionedRead
        } else {
            warn!("segment files are read in compatibility mode (NormalRead), which might hurt I/O performance.");
            IOBackend::NormalRead
        }
    }
}

/// A readable, immutable file.
pub trait ReadableBlock: Send + Sync {
    /// Name of the file, used in error messages.
    fn path(&self) -> &str;

    fn size(&self) -> StorageResult<u64>;

    /// Fill `buf` with the bytes at `offset`. Short reads are errors.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()>;

    fn read_bytes(&self, offset: u64, len: usize) -> StorageResult<Bytes> {
        let mut data = vec![0; len];
        self.read_at(offset, &mut data)?;
        Ok(Bytes::from(data))
    }
}

/// Opens blocks by name.
pub trait BlockManager: Send + Sync {
    fn open_block(&self, name: &str) -> StorageResult<Arc<dyn ReadableBlock>>;
}

pub type BlockManagerRef = Arc<dyn BlockManager>;

/// Serves blocks from files under a root directory.
pub struct FileBlockManager {
    root: PathBuf,
    io_backend: IOBackend,
}

impl FileBlockManager {
    pub fn new(root: impl Into<PathBuf>, io_backend: IOBackend) -> Self {
        Self {
            root: root.into(),
            io_backend,
        }
    }
}

impl BlockManager for FileBlockManager {
    fn open_block(&self, name: &str) -> StorageResult<Arc<dyn ReadableBlock>> {
        let path = self.root.join(name);
        let file = File::open(&path)?;
        let handle = match self.io_backend {
            #[cfg(unix)]
            IOBackend::PositionedRead => FileHandle::PositionedRead(file),
            _ => FileHandle::NormalRead(Mutex::new(file)),
        };
        Ok(Arc::new(FileBlock {
            path: path.display().to_string(),
            handle,
        }))
    }
}

enum FileHandle {
    /// For `read_at`
    #[cfg(unix)]
    PositionedRead(File),
    /// For `file.lock().seek().read()`
    NormalRead(Mutex<File>),
}

struct FileBlock {
    path: String,
    handle: FileHandle,
}

impl ReadableBlock for FileBlock {
    fn path(&self) -> &str {
        &self.path
    }

    fn size(&self) -> StorageResult<u64> {
        let metadata = match &self.handle {
            #[cfg(unix)]
            FileHandle::PositionedRead(file) => file.metadata()?,
            FileHandle::NormalRead(file) => file.lock().metadata()?,
        };
        Ok(metadata.len())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        match &self.handle {
            #[cfg(unix)]
            FileHandle::PositionedRead(file) => file.read_exact_at(buf, offset)?,
            FileHandle::NormalRead(file) => {
                let mut file = file.lock();
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(buf)?;
            }
        }
        Ok(())
    }
}

/// Keeps blocks in memory and counts the reads issued against them.
#[derive(Default)]
pub struct MemoryBlockManager {
    blocks: RwLock<HashMap<String, Bytes>>,
    reads: Arc<AtomicUsize>,
}

impl MemoryBlockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.blocks.write().insert(name.into(), data.into());
    }

    /// Number of `read_at` / `read_bytes` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn reset_read_count(&self) {
        self.reads.store(0, Ordering::Relaxed);
    }
}

impl BlockManager for MemoryBlockManager {
    fn open_block(&self, name: &str) -> StorageResult<Arc<dyn ReadableBlock>> {
        let data = self
            .blocks
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TracedStorageError::not_found("block", name))?;
        Ok(Arc::new(MemoryBlock {
            path: name.to_string(),
            data,
            reads: self.reads.clone(),
        }))
    }
}

struct MemoryBlock {
    path: String,
    data: Bytes,
    reads: Arc<AtomicUsize>,
}

impl MemoryBlock {
    fn slice(&self, offset: u64, len: usize) -> StorageResult<Bytes> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let begin = offset as usize;
        match begin.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(self.data.slice(begin..end)),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "read [{offset}, +{len}) past the end of {} ({} bytes)",
                    self.path,
                    self.data.len()
                ),
            )
            .into()),
        }
    }
}

impl ReadableBlock for MemoryBlock {
    fn path(&self) -> &str {
        &self.path
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.len() as u64)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        let data = self.slice(offset, buf.len())?;
        buf.copy_from_slice(&data);
        Ok(())
    }

    fn read_bytes(&self, offset: u64, len: usize) -> StorageResult<Bytes> {
        self.slice(offset, len)
    }
}
