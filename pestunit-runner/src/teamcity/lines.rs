// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use bstr::ByteSlice;
use bytes::BytesMut;

/// The initial capacity of the line buffer.
///
/// This is the (normal) page size on most systems, which is also the size of
/// the chunks read from child processes.
const CHUNK_SIZE: usize = 4 * 1024;

/// Buffers raw output chunks and yields complete lines.
///
/// Lines are split on `\n`, and a single trailing `\r` is removed. Bytes are
/// buffered until a line is complete, so multi-byte UTF-8 sequences and CRLF
/// pairs split across chunk boundaries are reassembled before decoding.
#[derive(Debug)]
pub struct LineAssembler {
    buf: BytesMut,
    // Number of bytes at the start of `buf` known not to contain a newline.
    scanned: usize,
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl LineAssembler {
    /// Creates a new, empty line assembler.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(CHUNK_SIZE),
            scanned: 0,
        }
    }

    /// Adds a chunk of output, returning the lines it completed in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(offset) = self.buf[self.scanned..].find_byte(b'\n') {
            let line = self.buf.split_to(self.scanned + offset + 1);
            self.scanned = 0;
            lines.push(decode_line(&line[..line.len() - 1]));
        }
        self.scanned = self.buf.len();

        lines
    }

    /// Returns true if a partial line is buffered.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Flushes the trailing partial line at end of stream.
    ///
    /// Returns `None` if nothing is buffered.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if self.buf.is_empty() {
            return None;
        }
        let rest = self.buf.split();
        Some(decode_line(&rest))
    }
}

fn decode_line(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    line.to_str_lossy().into_owned()
}
