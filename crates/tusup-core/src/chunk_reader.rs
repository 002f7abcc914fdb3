//! Bounded chunk reads from the local file
//!
//! One reader per session, opened when the session starts and dropped on
//! every exit path. Chunks are produced lazily; nothing is buffered beyond
//! the chunk in flight.

use crate::error::TusError;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Seek-capable reader producing contiguous byte ranges of the upload file.
#[derive(Debug)]
pub struct ChunkReader {
    file: File,
    size: u64,
}

impl ChunkReader {
    /// Open the upload file. A path that no longer resolves (deleted after
    /// enqueue) is fatal for the session.
    pub async fn open(path: &Path) -> Result<Self, TusError> {
        let file = File::open(path)
            .await
            .map_err(|e| TusError::FileUnavailable(format!("{}: {}", path.display(), e)))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| TusError::FileUnavailable(format!("{}: {}", path.display(), e)))?
            .len();

        Ok(Self { file, size })
    }

    /// Size of the underlying file when the reader was opened.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read up to `max_len` bytes starting at `offset`. A short read only
    /// happens at end of file; `None` means offset is at or past the end.
    pub async fn read_at(&mut self, offset: u64, max_len: u64) -> Result<Option<Bytes>, TusError> {
        if offset >= self.size {
            return Ok(None);
        }

        let len = max_len.min(self.size - offset) as usize;
        let mut buf = vec![0u8; len];

        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.read_exact(&mut buf).await?;

        Ok(Some(Bytes::from(buf)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn write_temp(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("tusup_reader_{}_{}", std::process::id(), name));
        tokio::fs::write(&path, contents).await.unwrap();
        path
    }

    #[tokio::test]
    async fn reads_bounded_chunks() {
        let path = write_temp("bounded", &[7u8; 250]).await;
        let mut reader = ChunkReader::open(&path).await.unwrap();
        assert_eq!(reader.size(), 250);

        let first = reader.read_at(0, 100).await.unwrap().unwrap();
        assert_eq!(first.len(), 100);

        let second = reader.read_at(100, 100).await.unwrap().unwrap();
        assert_eq!(second.len(), 100);

        // Short read at end of file only.
        let tail = reader.read_at(200, 100).await.unwrap().unwrap();
        assert_eq!(tail.len(), 50);

        assert!(reader.read_at(250, 100).await.unwrap().is_none());

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn seek_to_arbitrary_offset() {
        let data: Vec<u8> = (0..=255).collect();
        let path = write_temp("seek", &data).await;
        let mut reader = ChunkReader::open(&path).await.unwrap();

        let chunk = reader.read_at(200, 10).await.unwrap().unwrap();
        assert_eq!(&chunk[..], &data[200..210]);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let path = std::env::temp_dir().join("tusup_reader_definitely_missing");
        let err = ChunkReader::open(&path).await.unwrap_err();
        assert!(matches!(err, TusError::FileUnavailable(_)));
    }
}
