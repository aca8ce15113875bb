//! Byte-range reader abstraction.
//!
//! The core never touches storage directly; it asks a [`RangeReader`] for
//! byte ranges of named resources. Implementors back this with local files,
//! HTTP range requests or object stores, and own the retry/pool/concurrency
//! policy. The pipeline treats any reader failure as fatal for the current
//! tile request.
//!
//! [`FileReader`] is the local-filesystem implementation used by the CLI and
//! the tests.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use crate::index::ByteRange;
use crate::{Error, Result};

/// Async byte-range access to named resources.
///
/// `read` may return fewer than `length` bytes only when the resource ends
/// before `offset + length`. `read_ranges` results match the input order;
/// implementations are free to resolve the ranges concurrently.
pub trait RangeReader: Send + Sync {
    /// Fetch `length` bytes at `offset` of `path`.
    fn read(
        &self,
        path: &str,
        offset: u64,
        length: u64,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Fetch several ranges of `path`; result order matches input order.
    fn read_ranges(
        &self,
        path: &str,
        ranges: &[ByteRange],
    ) -> impl Future<Output = Result<Vec<Vec<u8>>>> + Send;

    /// Release held resources. Idempotent; the default does nothing.
    fn close(&self) {}
}

/// Positional-read file access rooted at a base directory.
///
/// Each call opens the file and reads at the absolute offset, so concurrent
/// range reads never contend on a shared cursor.
#[derive(Debug, Clone)]
pub struct FileReader {
    root: PathBuf,
}

impl FileReader {
    /// Create a reader resolving paths under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn read_at(path: &Path, offset: u64, length: u64) -> io::Result<Vec<u8>> {
        let file = std::fs::File::open(path)?;
        let file_len = file.metadata()?.len();
        if offset >= file_len {
            return Ok(Vec::new());
        }
        let end = file_len.min(offset + length);
        let mut buf = vec![0u8; (end - offset) as usize];

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            file.read_exact_at(&mut buf, offset)?;
        }
        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            let mut read = 0usize;
            while read < buf.len() {
                let n = file.seek_read(&mut buf[read..], offset + read as u64)?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "file shrank during read",
                    ));
                }
                read += n;
            }
        }

        Ok(buf)
    }
}

impl RangeReader for FileReader {
    async fn read(&self, path: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let full = self.resolve(path);
        log::trace!("read {} bytes at {} from {}", length, offset, full.display());
        Self::read_at(&full, offset, length).map_err(Error::Io)
    }

    async fn read_ranges(&self, path: &str, ranges: &[ByteRange]) -> Result<Vec<Vec<u8>>> {
        futures::future::try_join_all(
            ranges
                .iter()
                .map(|range| self.read(path, range.offset, range.length)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture_dir() -> PathBuf {
        let dir = std::env::temp_dir().join("fgb-tiles-reader-test");
        let _ = fs::create_dir_all(&dir);
        dir
    }

    fn write_fixture(name: &str, content: &[u8]) -> PathBuf {
        let dir = fixture_dir();
        fs::write(dir.join(name), content).expect("write fixture");
        dir
    }

    #[tokio::test]
    async fn test_read_exact_range() {
        let dir = write_fixture("exact.bin", b"0123456789");
        let reader = FileReader::new(dir);

        let bytes = reader.read("exact.bin", 2, 4).await.unwrap();
        assert_eq!(bytes, b"2345");
    }

    #[tokio::test]
    async fn test_read_clamps_at_eof() {
        let dir = write_fixture("clamp.bin", b"0123456789");
        let reader = FileReader::new(dir);

        // Range running past the end returns the remaining bytes
        let bytes = reader.read("clamp.bin", 8, 100).await.unwrap();
        assert_eq!(bytes, b"89");

        // A range entirely past the end yields nothing
        let bytes = reader.read("clamp.bin", 50, 4).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_read_missing_file_fails() {
        let reader = FileReader::new(fixture_dir());
        assert!(reader.read("no-such-file.fgb", 0, 4).await.is_err());
    }

    #[tokio::test]
    async fn test_read_ranges_order_matches_input() {
        let dir = write_fixture("ranges.bin", b"abcdefghij");
        let reader = FileReader::new(dir);

        let ranges = [
            ByteRange::new(6, 2),
            ByteRange::new(0, 3),
            ByteRange::new(3, 3),
        ];
        let chunks = reader.read_ranges("ranges.bin", &ranges).await.unwrap();
        assert_eq!(chunks, vec![b"gh".to_vec(), b"abc".to_vec(), b"def".to_vec()]);
    }
}
