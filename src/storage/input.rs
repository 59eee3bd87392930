//! Uploaded file abstraction.
//!
//! [`FileInput`] is the capability the blob store consumes: a declared
//! filename, an optional declared content type, and a way to pull the
//! content in chunks.  Any transport's upload representation can sit
//! behind it; two implementations are provided here.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use bytes::Bytes;

/// A client-supplied file, read sequentially in chunks.
pub trait FileInput: Send {
    /// Filename as declared by the client (untrusted).
    fn filename(&self) -> &str;

    /// Content type as declared by the client (untrusted), if any.
    fn content_type(&self) -> Option<&str>;

    /// Fill `buf` with the next chunk of content. Returns 0 at end of file.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// File content already held in memory.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    filename: String,
    content_type: Option<String>,
    data: Bytes,
    pos: usize,
}

impl MemoryFile {
    pub fn new(
        filename: impl Into<String>,
        content_type: Option<&str>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.map(str::to_string),
            data: data.into(),
            pos: 0,
        }
    }
}

impl FileInput for MemoryFile {
    fn filename(&self) -> &str {
        &self.filename
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// File content spooled to an anonymous temp file by the transport.
///
/// The temp file is removed by the OS when this value is dropped.
#[derive(Debug)]
pub struct SpooledFile {
    filename: String,
    content_type: Option<String>,
    file: File,
}

impl SpooledFile {
    /// Wrap a spooled file, rewinding it to the start.
    pub fn new(
        filename: impl Into<String>,
        content_type: Option<&str>,
        mut file: File,
    ) -> io::Result<Self> {
        file.seek(SeekFrom::Start(0))?;
        Ok(Self {
            filename: filename.into(),
            content_type: content_type.map(str::to_string),
            file,
        })
    }
}

impl FileInput for SpooledFile {
    fn filename(&self) -> &str {
        &self.filename
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}
