//! Polymorphic seekable-or-stream sink (spec §6.1).
//!
//! Modeled as an open set of variants recognized by URI scheme, the way
//! the original implementation's file factory dispatches on a prefix.
//! Concrete backends (HTTP PUT, UDP, threaded-io-with-ring-cache) are
//! external collaborators per spec §1; this crate specifies the trait and
//! ships the `memory` and `local` variants needed by the muxers' own
//! tests, generalizing the teacher's `ffmpeg::io::MemoryWriter` away from
//! its AVIO-specific plumbing.

use crate::error::{PackagerError, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// A sink a muxer can open, write to, optionally seek within, and close.
/// `seek`/`tell`/`size` may fail on stream-only sinks (HTTP PUT, UDP,
/// callback) — they return `Ok(false)`-shaped `None`s rather than erroring,
/// since not being seekable is expected, not exceptional.
pub trait FileSink: Send {
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
    fn flush(&mut self) -> Result<()>;
    fn seek(&mut self, pos: u64) -> Result<Option<()>>;
    fn tell(&self) -> Option<u64>;
    fn size(&self) -> Option<u64>;
    fn close(&mut self) -> Result<()>;
}

/// A sink a muxer can read back from, used by box patching passes that
/// re-open what they just wrote to verify offsets in tests.
pub trait FileSource: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn seek(&mut self, pos: u64) -> Result<()>;
}

/// In-memory sink backed by a growable `Vec<u8>`. Single-threaded use only,
/// same constraint the teacher documents on `MemoryWriter`: one instance
/// per muxer, never shared across threads.
#[derive(Debug, Default)]
pub struct MemorySink {
    buffer: Vec<u8>,
    position: u64,
    closed: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self { buffer: Vec::with_capacity(4096), position: 0, closed: false }
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buffer
    }
}

impl FileSink for MemorySink {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(PackagerError::FileFailure("write after close".into()));
        }
        let pos = self.position as usize;
        let end = pos + buf.len();
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        self.buffer[pos..end].copy_from_slice(buf);
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> Result<Option<()>> {
        self.position = pos;
        Ok(Some(()))
    }

    fn tell(&self) -> Option<u64> {
        Some(self.position)
    }

    fn size(&self) -> Option<u64> {
        Some(self.buffer.len() as u64)
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Local-filesystem sink, the `file://` or bare-path variant.
pub struct LocalFileSink {
    file: File,
}

impl LocalFileSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| PackagerError::FileFailure(e.to_string()))?;
        Ok(Self { file })
    }
}

impl FileSink for LocalFileSink {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.file.write(buf).map_err(|e| PackagerError::FileFailure(e.to_string()))
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush().map_err(|e| PackagerError::FileFailure(e.to_string()))
    }

    fn seek(&mut self, pos: u64) -> Result<Option<()>> {
        self.file
            .seek(SeekFrom::Start(pos))
            .map(|_| Some(()))
            .map_err(|e| PackagerError::FileFailure(e.to_string()))
    }

    fn tell(&self) -> Option<u64> {
        None
    }

    fn size(&self) -> Option<u64> {
        self.file.metadata().ok().map(|m| m.len())
    }

    fn close(&mut self) -> Result<()> {
        self.file.flush().map_err(|e| PackagerError::FileFailure(e.to_string()))
    }
}

/// Local-filesystem source for read-back verification.
pub struct LocalFileSource {
    file: File,
}

impl LocalFileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PackagerError::FileFailure(e.to_string()))?;
        Ok(Self { file })
    }
}

impl FileSource for LocalFileSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.file.read(buf).map_err(|e| PackagerError::FileFailure(e.to_string()))
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(pos))
            .map(|_| ())
            .map_err(|e| PackagerError::FileFailure(e.to_string()))
    }
}

/// Resolves a sink scheme from a URI prefix, per spec §6.1. Only the
/// `memory://` variant is fully implemented here; the rest are recognized
/// but left to the external file I/O backend collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkScheme {
    Local,
    Http,
    Udp,
    Memory,
    Callback,
}

pub fn resolve_scheme(uri: &str) -> SinkScheme {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        SinkScheme::Http
    } else if uri.starts_with("udp://") {
        SinkScheme::Udp
    } else if uri.starts_with("memory://") {
        SinkScheme::Memory
    } else if uri.starts_with("callback://") {
        SinkScheme::Callback
    } else {
        SinkScheme::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_writes_and_reads_back() {
        let mut sink = MemorySink::new();
        sink.write(b"hello").unwrap();
        assert_eq!(sink.data(), b"hello");
        assert_eq!(sink.tell(), Some(5));
    }

    #[test]
    fn memory_sink_rejects_write_after_close() {
        let mut sink = MemorySink::new();
        sink.close().unwrap();
        assert!(sink.write(b"x").is_err());
    }

    #[test]
    fn scheme_resolution() {
        assert_eq!(resolve_scheme("memory://seg1"), SinkScheme::Memory);
        assert_eq!(resolve_scheme("https://example.com/seg1.m4s"), SinkScheme::Http);
        assert_eq!(resolve_scheme("/tmp/seg1.m4s"), SinkScheme::Local);
        assert_eq!(resolve_scheme("callback://42"), SinkScheme::Callback);
    }
}
