//! Bounded capture of a child's output pipes

use crate::result::TRUNCATION_MARKER;
use crate::Result;
use nix::fcntl::OFlag;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

/// Outcome of a single read from an output pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk {
    /// Bytes were appended
    Data(usize),
    /// Writer side closed
    Eof,
    /// Appending would have crossed the ceiling; the chunk was dropped and
    /// the stream closed
    Overflow,
}

/// Byte accumulator that refuses to grow past a ceiling.
///
/// A chunk that would cross the ceiling is discarded whole. [`push`] then
/// seals the buffer with the truncation marker, exactly once; [`fill`] just
/// refuses it.
///
/// [`push`]: BoundedBuffer::push
/// [`fill`]: BoundedBuffer::fill
#[derive(Debug)]
pub struct BoundedBuffer {
    bytes: Vec<u8>,
    ceiling: usize,
    truncated: bool,
}

impl BoundedBuffer {
    #[must_use]
    pub const fn new(ceiling: usize) -> Self {
        Self {
            bytes: Vec::new(),
            ceiling,
            truncated: false,
        }
    }

    /// Append `chunk`, or seal the buffer if it does not fit.
    ///
    /// Returns `false` once the buffer is sealed.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        if self.truncated {
            return false;
        }
        if self.bytes.len() + chunk.len() > self.ceiling {
            self.bytes.extend_from_slice(TRUNCATION_MARKER.as_bytes());
            self.truncated = true;
            return false;
        }
        self.bytes.extend_from_slice(chunk);
        true
    }

    /// Append `chunk` if it fits; never adds the marker.
    pub fn fill(&mut self, chunk: &[u8]) -> bool {
        if self.truncated || self.bytes.len() + chunk.len() > self.ceiling {
            return false;
        }
        self.bytes.extend_from_slice(chunk);
        true
    }

    #[must_use]
    pub const fn is_truncated(&self) -> bool {
        self.truncated
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

/// Read end of one of the child's output pipes plus what was read from it
#[derive(Debug)]
pub struct OutputStream {
    name: &'static str,
    file: File,
    buffer: BoundedBuffer,
    open: bool,
}

impl OutputStream {
    pub fn new(name: &'static str, fd: impl Into<OwnedFd>, ceiling: usize) -> Self {
        Self {
            name,
            file: File::from(fd.into()),
            buffer: BoundedBuffer::new(ceiling),
            open: true,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// False after EOF or after the ceiling was hit
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open
    }

    /// Read at most `scratch.len()` bytes from a running child.
    ///
    /// Crossing the ceiling truncates the capture. Blocks unless the pipe was
    /// reported readable, so callers poll first.
    pub fn read_chunk(&mut self, scratch: &mut [u8]) -> io::Result<Chunk> {
        self.read_with(scratch, BoundedBuffer::push)
    }

    /// Like [`read_chunk`](Self::read_chunk), for leftovers of a child that
    /// already exited: stops at the ceiling without marking truncation.
    pub fn read_remaining(&mut self, scratch: &mut [u8]) -> io::Result<Chunk> {
        self.read_with(scratch, BoundedBuffer::fill)
    }

    fn read_with(
        &mut self,
        scratch: &mut [u8],
        append: fn(&mut BoundedBuffer, &[u8]) -> bool,
    ) -> io::Result<Chunk> {
        loop {
            match self.file.read(scratch) {
                Ok(0) => {
                    self.open = false;
                    return Ok(Chunk::Eof);
                }
                Ok(n) => {
                    if append(&mut self.buffer, &scratch[..n]) {
                        return Ok(Chunk::Data(n));
                    }
                    self.open = false;
                    return Ok(Chunk::Overflow);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Captured bytes and whether they were truncated
    #[must_use]
    pub fn finish(self) -> (Vec<u8>, bool) {
        let truncated = self.buffer.is_truncated();
        (self.buffer.into_inner(), truncated)
    }
}

impl AsFd for OutputStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

/// Create a close-on-exec pipe (returns read end, write end).
///
/// Used to hand one write end to both stdout and stderr of a child.
pub fn create_pipe() -> Result<(OwnedFd, OwnedFd)> {
    Ok(nix::unistd::pipe2(OFlag::O_CLOEXEC)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn buffer_accepts_exactly_the_ceiling() {
        let mut buf = BoundedBuffer::new(10);
        assert!(buf.push(b"12345"));
        assert!(buf.push(b"67890"));
        assert!(!buf.is_truncated());
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn fill_stops_at_the_ceiling_without_marker() {
        let mut buf = BoundedBuffer::new(6);
        assert!(buf.is_empty());
        assert!(buf.fill(b"1234"));
        assert!(!buf.fill(b"567"));
        assert!(buf.fill(b"56"));

        assert!(!buf.is_truncated());
        assert_eq!(buf.into_inner(), b"123456");
    }

    #[test]
    fn overflowing_chunk_is_dropped_and_marker_added_once() {
        let mut buf = BoundedBuffer::new(10);
        assert!(buf.push(b"1234567"));
        assert!(!buf.push(b"8901"));
        assert!(!buf.push(b"more"));

        let expected = format!("1234567{TRUNCATION_MARKER}");
        assert!(buf.is_truncated());
        assert_eq!(buf.into_inner(), expected.into_bytes());
    }

    #[test]
    fn stream_reads_until_eof() {
        let (read, write) = create_pipe().unwrap();
        let mut writer = File::from(write);
        writer.write_all(b"hello").unwrap();
        drop(writer);

        let mut stream = OutputStream::new("stdout", read, 100);
        let mut scratch = [0u8; 3];
        assert_eq!(stream.read_chunk(&mut scratch).unwrap(), Chunk::Data(3));
        assert_eq!(stream.read_chunk(&mut scratch).unwrap(), Chunk::Data(2));
        assert_eq!(stream.read_chunk(&mut scratch).unwrap(), Chunk::Eof);
        assert!(!stream.is_open());
        assert_eq!(stream.finish(), (b"hello".to_vec(), false));
    }

    #[test]
    fn stream_closes_on_overflow() {
        let (read, write) = create_pipe().unwrap();
        let mut writer = File::from(write);
        writer.write_all(&[b'x'; 8]).unwrap();

        let mut stream = OutputStream::new("stdout", read, 5);
        let mut scratch = [0u8; 4];
        assert_eq!(stream.read_chunk(&mut scratch).unwrap(), Chunk::Data(4));
        assert_eq!(stream.read_chunk(&mut scratch).unwrap(), Chunk::Overflow);
        assert!(!stream.is_open());

        let (bytes, truncated) = stream.finish();
        assert!(truncated);
        assert_eq!(bytes.len(), 4 + TRUNCATION_MARKER.len());
    }

    #[test]
    fn remaining_output_is_capped_but_not_truncated() {
        let (read, write) = create_pipe().unwrap();
        let mut writer = File::from(write);
        writer.write_all(&[b'x'; 8]).unwrap();

        let mut stream = OutputStream::new("stdout", read, 5);
        let mut scratch = [0u8; 4];
        assert_eq!(stream.read_remaining(&mut scratch).unwrap(), Chunk::Data(4));
        assert_eq!(stream.read_remaining(&mut scratch).unwrap(), Chunk::Overflow);
        assert!(!stream.is_open());
        assert_eq!(stream.finish(), (b"xxxx".to_vec(), false));
    }
}
