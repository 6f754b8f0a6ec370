// SPDX-License-Identifier: MIT

//! Generic line-splitter over a byte stream (spec §4.2, component C2).
//!
//! Feeds complete, non-blank lines to a per-adapter parser and yields a
//! lazy sequence of normalized entries. Handles UTF-8 sequences split
//! across read boundaries and parses a trailing, newline-less fragment
//! exactly once when the stream ends.

use bitk_core::IssueLogEntry;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 8192;

/// Splits an `AsyncRead` byte stream into complete lines.
pub struct LineSplitter<R> {
    reader: R,
    byte_carry: Vec<u8>,
    text_buf: String,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineSplitter<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            byte_carry: Vec::new(),
            text_buf: String::new(),
            eof: false,
        }
    }

    /// Returns the next line (without its trailing `\n`), or `None` once
    /// the stream has ended and no fragment remains to flush.
    pub async fn next_raw_line(&mut self) -> Option<String> {
        loop {
            if let Some(idx) = self.text_buf.find('\n') {
                let mut line: String = self.text_buf.drain(..=idx).collect();
                line.pop(); // drop the '\n'
                if line.ends_with('\r') {
                    line.pop();
                }
                return Some(line);
            }

            if self.eof {
                if self.text_buf.is_empty() {
                    return None;
                }
                return Some(std::mem::take(&mut self.text_buf));
            }

            self.fill().await;
        }
    }

    async fn fill(&mut self) {
        let mut chunk = [0u8; READ_CHUNK];
        match self.reader.read(&mut chunk).await {
            Ok(0) => self.eof = true,
            Ok(n) => {
                self.byte_carry.extend_from_slice(&chunk[..n]);
                self.decode_carry();
            }
            Err(_) => self.eof = true,
        }
    }

    fn decode_carry(&mut self) {
        match std::str::from_utf8(&self.byte_carry) {
            Ok(s) => {
                self.text_buf.push_str(s);
                self.byte_carry.clear();
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                if valid_up_to > 0 {
                    // Safety of `unwrap`: `valid_up_to` is guaranteed valid UTF-8 by `from_utf8`.
                    if let Ok(s) = std::str::from_utf8(&self.byte_carry[..valid_up_to]) {
                        self.text_buf.push_str(s);
                    }
                    self.byte_carry.drain(..valid_up_to);
                }
            }
        }
    }
}

/// Drive a `LineSplitter` to completion, feeding every complete non-blank
/// line through `parse`, and parsing one trailing fragment at EOF if it is
/// non-blank. Returns every entry the parser produced.
pub async fn normalize_stream<R, F>(reader: R, mut parse: F) -> Vec<IssueLogEntry>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str) -> Option<IssueLogEntry>,
{
    let mut splitter = LineSplitter::new(reader);
    let mut out = Vec::new();
    while let Some(line) = splitter.next_raw_line().await {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(entry) = parse(&line) {
            out.push(entry);
        }
    }
    out
}
