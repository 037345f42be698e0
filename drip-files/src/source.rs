//! File sources and independent sequential chunk readers.
//!
//! A [`FileSource`] is what the user selected: a name, a size, and a way to
//! open a fresh [`ChunkReader`]. Every transfer opens its own reader, so two
//! transfers of the same file never share a cursor.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Default chunk size: 256KB, below the data channel's message limit.
pub const CHUNK_SIZE: u32 = 262_144;

/// A user-selected file.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// A file on disk, stat-ed when the source was created.
    Path {
        path: PathBuf,
        name: String,
        size: u64,
    },
    /// An in-memory buffer.
    Memory { name: String, data: Bytes },
}

impl FileSource {
    /// Create a source for a file on disk, reading its name and size.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .context("path has no filename")?
            .to_string_lossy()
            .to_string();
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("failed to stat file: {}", path.display()))?;
        if !metadata.is_file() {
            anyhow::bail!("not a regular file: {}", path.display());
        }
        Ok(Self::Path {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
        })
    }

    /// Create a source backed by memory.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::Memory {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Path { name, .. } | Self::Memory { name, .. } => name,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Self::Path { size, .. } => *size,
            Self::Memory { data, .. } => data.len() as u64,
        }
    }

    /// Open a new reader with its own cursor.
    pub async fn open(&self) -> std::io::Result<ChunkReader> {
        match self {
            Self::Path { path, size, .. } => {
                let file = tokio::fs::File::open(path).await?;
                Ok(ChunkReader::File {
                    file,
                    size: *size,
                    position: 0,
                })
            }
            Self::Memory { data, .. } => Ok(ChunkReader::Memory(data.clone())),
        }
    }
}

/// A sequential byte-range reader over one [`FileSource`].
#[derive(Debug)]
pub enum ChunkReader {
    File {
        file: tokio::fs::File,
        size: u64,
        position: u64,
    },
    Memory(Bytes),
}

impl ChunkReader {
    /// Read up to `max_len` bytes starting at `offset`.
    ///
    /// Returns an empty buffer at end of stream. A file that is shorter than
    /// the size recorded at selection time is a read error.
    pub async fn read_chunk(&mut self, offset: u64, max_len: u32) -> std::io::Result<Bytes> {
        match self {
            Self::File {
                file,
                size,
                position,
            } => {
                if offset >= *size {
                    return Ok(Bytes::new());
                }
                let len = (max_len as u64).min(*size - offset) as usize;
                if *position != offset {
                    file.seek(SeekFrom::Start(offset)).await?;
                }
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf).await?;
                *position = offset + len as u64;
                Ok(Bytes::from(buf))
            }
            Self::Memory(data) => {
                let start = (offset as usize).min(data.len());
                let end = start.saturating_add(max_len as usize).min(data.len());
                Ok(data.slice(start..end))
            }
        }
    }
}
