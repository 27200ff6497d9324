//! Stream values: a descriptor plus buffered line reading.
//!
//! A stream wraps an open file descriptor. Line reads strip the trailing
//! newline; the non-blocking variants report `WouldBlock` so the worker can
//! register the descriptor with its I/O multiplexer and resume the frame on
//! readiness.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

/// Readiness interest for a registered descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoInterest {
    Readable,
    Writable,
}

/// A pending I/O registration produced by a suspending instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoRequest {
    pub fd: RawFd,
    pub interest: IoInterest,
}

/// Result of a non-blocking line read.
#[derive(Debug, PartialEq, Eq)]
pub enum TryRead {
    Line(String),
    Eof,
    WouldBlock,
}

/// A descriptor-backed stream.
pub struct Stream {
    file: File,
    /// Bytes read ahead of the last consumed line.
    buf: Vec<u8>,
}

impl Stream {
    pub fn from_file(file: File) -> Self {
        Self {
            file,
            buf: Vec::new(),
        }
    }

    /// A stream over a duplicate of the process's stdin descriptor.
    pub fn stdin() -> io::Result<Self> {
        Self::dup_fd(libc::STDIN_FILENO)
    }

    /// A stream over a duplicate of the process's stdout descriptor.
    pub fn stdout() -> io::Result<Self> {
        Self::dup_fd(libc::STDOUT_FILENO)
    }

    fn dup_fd(fd: RawFd) -> io::Result<Self> {
        // Duplicate so dropping the stream never closes the real std fd.
        let dup = unsafe { libc::dup(fd) };
        if dup < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self::from_file(unsafe { File::from_raw_fd(dup) }))
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Toggle O_NONBLOCK on the underlying descriptor.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        let fd = self.fd();
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Blocking line read. Returns `None` at end of stream. The trailing
    /// newline is stripped.
    pub fn read_line_blocking(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(line) = self.take_buffered_line() {
                return Ok(Some(line));
            }
            let mut chunk = [0u8; 1024];
            let n = self.file.read(&mut chunk)?;
            if n == 0 {
                return Ok(self.take_remainder());
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Non-blocking line read. `WouldBlock` means no complete line is
    /// available yet and the caller should wait for readability.
    pub fn try_read_line(&mut self) -> io::Result<TryRead> {
        loop {
            if let Some(line) = self.take_buffered_line() {
                return Ok(TryRead::Line(line));
            }
            let mut chunk = [0u8; 1024];
            match self.file.read(&mut chunk) {
                Ok(0) => {
                    return Ok(match self.take_remainder() {
                        Some(line) => TryRead::Line(line),
                        None => TryRead::Eof,
                    });
                }
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(TryRead::WouldBlock);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Raw write of the full buffer.
    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)?;
        self.file.flush()
    }

    /// Single non-blocking write attempt; the caller re-registers on
    /// `WouldBlock`.
    pub fn try_write(&mut self, bytes: &[u8]) -> io::Result<Option<usize>> {
        match self.file.write(bytes) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn take_buffered_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop(); // strip the newline
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    fn take_remainder(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream").field("fd", &self.fd()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Seek;

    fn temp_stream(contents: &str) -> Stream {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.rewind().unwrap();
        Stream::from_file(file)
    }

    #[test]
    fn test_read_line_strips_newline() {
        let mut s = temp_stream("hello\nworld\n");
        assert_eq!(s.read_line_blocking().unwrap(), Some("hello".to_string()));
        assert_eq!(s.read_line_blocking().unwrap(), Some("world".to_string()));
        assert_eq!(s.read_line_blocking().unwrap(), None);
    }

    #[test]
    fn test_read_final_line_without_newline() {
        let mut s = temp_stream("no newline");
        assert_eq!(
            s.read_line_blocking().unwrap(),
            Some("no newline".to_string())
        );
        assert_eq!(s.read_line_blocking().unwrap(), None);
    }

    #[test]
    fn test_try_read_line_on_regular_file() {
        let mut s = temp_stream("a\nb\n");
        assert_eq!(s.try_read_line().unwrap(), TryRead::Line("a".to_string()));
        assert_eq!(s.try_read_line().unwrap(), TryRead::Line("b".to_string()));
        assert_eq!(s.try_read_line().unwrap(), TryRead::Eof);
    }
}
