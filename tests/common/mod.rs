//! Client-side helpers shared by the integration tests.

#![allow(dead_code)]

use anyhow::{anyhow, Context, Result};
use std::io::{BufRead, BufReader, Read};

use phone_sentinel::stream::BOUNDARY;

/// Upper bound on a single part body accepted by `MultipartReader`.
const MAX_PART_BYTES: usize = 16 * 1024 * 1024;

/// One part read from a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedPart {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Reads parts back out of a `multipart/x-mixed-replace` body.
///
/// Parts carry no length, so a body runs until the next `CRLF--frame` line.
pub struct MultipartReader<R: Read> {
    reader: BufReader<R>,
    /// The boundary line of the next part was already consumed.
    boundary_pending: bool,
}

impl<R: Read> MultipartReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            boundary_pending: false,
        }
    }

    /// Next part, or `None` when the stream ends cleanly between parts.
    pub fn next_part(&mut self) -> Result<Option<ReceivedPart>> {
        if !self.boundary_pending && !self.skip_to_boundary()? {
            return Ok(None);
        }
        self.boundary_pending = false;

        let content_type = self.read_headers()?;
        let delimiter = format!("\r\n--{}\r\n", BOUNDARY);
        let mut body = Vec::new();
        loop {
            let read = self
                .reader
                .read_until(b'\n', &mut body)
                .context("read part body")?;
            if read == 0 {
                // Last part of a closed stream: body plus its CRLF terminator.
                if !body.ends_with(b"\r\n") {
                    return Err(anyhow!("stream ended inside part body"));
                }
                body.truncate(body.len() - 2);
                return Ok(Some(ReceivedPart { content_type, body }));
            }
            if body.ends_with(delimiter.as_bytes()) {
                body.truncate(body.len() - delimiter.len());
                self.boundary_pending = true;
                return Ok(Some(ReceivedPart { content_type, body }));
            }
            if body.len() > MAX_PART_BYTES {
                return Err(anyhow!("part exceeds {} bytes", MAX_PART_BYTES));
            }
        }
    }

    /// Consume lines up to and including the first boundary line.
    fn skip_to_boundary(&mut self) -> Result<bool> {
        let delimiter = format!("--{}", BOUNDARY);
        let mut line = Vec::new();
        loop {
            line.clear();
            if self.reader.read_until(b'\n', &mut line)? == 0 {
                return Ok(false);
            }
            if trim_crlf(&line) == delimiter.as_bytes() {
                return Ok(true);
            }
            if !trim_crlf(&line).is_empty() {
                return Err(anyhow!(
                    "expected boundary, got {:?}",
                    String::from_utf8_lossy(&line)
                ));
            }
        }
    }

    fn read_headers(&mut self) -> Result<Option<String>> {
        let mut content_type = None;
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(anyhow!("stream ended inside part headers"));
            }
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                return Ok(content_type);
            }
            if let Some((key, value)) = trimmed.split_once(':') {
                if key.trim().eq_ignore_ascii_case("content-type") {
                    content_type = Some(value.trim().to_string());
                }
            }
        }
    }
}

fn trim_crlf(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
