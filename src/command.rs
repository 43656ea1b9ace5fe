//! Command buffer and goto target.
//!
//! A connection carries exactly one command: every byte the peer sends
//! before closing its write side. Chunks are kept in receipt order and
//! only joined once the connection is done.

use bytes::{Bytes, BytesMut};
use std::fmt;

/// Bytes received on one connection, in receipt order.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    chunks: Vec<Bytes>,
    len: usize,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk. Empty chunks are ignored.
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push(chunk);
    }

    /// Total number of bytes received.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of non-empty chunks received.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Join the chunks into the command string.
    ///
    /// Invalid UTF-8 is replaced rather than rejected, and surrounding
    /// whitespace is stripped. Internal whitespace is preserved.
    pub fn into_command(self) -> String {
        let mut joined = BytesMut::with_capacity(self.len);
        for chunk in &self.chunks {
            joined.extend_from_slice(chunk);
        }
        String::from_utf8_lossy(&joined).trim().to_string()
    }
}

/// A command string read as `path[:line]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location<'a> {
    pub path: &'a str,
    pub line: Option<u32>,
}

impl<'a> Location<'a> {
    /// Split a trailing `:<digits>` off the command.
    ///
    /// A drive letter colon (`C:\src\main.go`) is not a line separator
    /// because what follows it is not all digits.
    pub fn parse(command: &'a str) -> Self {
        if let Some((path, suffix)) = command.rsplit_once(':') {
            if !path.is_empty() && !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit())
            {
                if let Ok(line) = suffix.parse() {
                    return Location {
                        path,
                        line: Some(line),
                    };
                }
            }
        }

        Location {
            path: command,
            line: None,
        }
    }
}

impl fmt::Display for Location<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}", self.path, line),
            None => f.write_str(self.path),
        }
    }
}
