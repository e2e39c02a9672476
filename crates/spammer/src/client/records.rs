//! Incremental JSON array reading and writing.
//!
//! Query responses are JSON arrays that can be far larger than memory
//! comfortably holds. [`QueryRecords`] splits the response body into array
//! elements as chunks arrive, and [`JsonArrayWriter`] renders each record as
//! soon as it is handed over.

use super::ClientError;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::io::{self, Write};

/// Lazy sequence of records from a JSON array body.
pub struct QueryRecords {
    body: BoxStream<'static, Result<Vec<u8>, ClientError>>,
    items: ArrayItems,
    ready: VecDeque<Value>,
    finished: bool,
}

impl QueryRecords {
    /// Read records from a stream of body chunks.
    pub fn new(body: impl Stream<Item = Result<Vec<u8>, ClientError>> + Send + 'static) -> Self {
        Self {
            body: body.boxed(),
            items: ArrayItems::default(),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    /// The next record, reading more of the body only when needed.
    ///
    /// Returns `None` once the array is closed. After an error no further
    /// records are produced.
    pub async fn next(&mut self) -> Option<Result<Value, ClientError>> {
        loop {
            if let Some(record) = self.ready.pop_front() {
                return Some(Ok(record));
            }
            if self.finished {
                return None;
            }

            let step = match self.body.next().await {
                Some(Ok(chunk)) => self.items.push(&chunk, &mut self.ready),
                Some(Err(e)) => Err(e),
                None => {
                    self.finished = true;
                    self.items.finish()
                }
            };
            if let Err(e) = step {
                self.finished = true;
                self.ready.clear();
                return Some(Err(e));
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Phase {
    #[default]
    Open,
    BeforeItem,
    InItem {
        start: usize,
        depth: usize,
        in_string: bool,
        escaped: bool,
    },
    AfterItem,
    Closed,
}

/// Splits a JSON array into its top-level elements, one chunk at a time.
#[derive(Debug, Default)]
struct ArrayItems {
    buf: Vec<u8>,
    pos: usize,
    phase: Phase,
}

impl ArrayItems {
    /// Feed a chunk; every element it completes is appended to `out`.
    fn push(&mut self, chunk: &[u8], out: &mut VecDeque<Value>) -> Result<(), ClientError> {
        self.buf.extend_from_slice(chunk);

        while self.pos < self.buf.len() {
            let byte = self.buf[self.pos];
            match self.phase {
                Phase::Open => {
                    if byte == b'[' {
                        self.phase = Phase::BeforeItem;
                    } else if !byte.is_ascii_whitespace() {
                        return Err(decode("response is not a JSON array"));
                    }
                    self.pos += 1;
                }
                Phase::BeforeItem => {
                    if byte == b']' {
                        self.phase = Phase::Closed;
                    } else if !byte.is_ascii_whitespace() {
                        self.phase = Phase::InItem {
                            start: self.pos,
                            depth: 0,
                            in_string: false,
                            escaped: false,
                        };
                        continue;
                    }
                    self.pos += 1;
                }
                Phase::InItem {
                    start,
                    mut depth,
                    mut in_string,
                    mut escaped,
                } => {
                    let mut end = None;
                    if in_string {
                        if escaped {
                            escaped = false;
                        } else if byte == b'\\' {
                            escaped = true;
                        } else if byte == b'"' {
                            in_string = false;
                        }
                    } else {
                        match byte {
                            b'"' => in_string = true,
                            b'{' | b'[' => depth += 1,
                            b'}' | b']' if depth > 0 => {
                                depth -= 1;
                                if depth == 0 {
                                    end = Some(self.pos + 1);
                                }
                            }
                            // A scalar element ends at the separator, which
                            // is left for `AfterItem`.
                            b',' | b']' if depth == 0 => {
                                out.push_back(parse(&self.buf[start..self.pos])?);
                                self.phase = Phase::AfterItem;
                                continue;
                            }
                            _ => {}
                        }
                    }
                    self.pos += 1;
                    match end {
                        Some(end) => {
                            out.push_back(parse(&self.buf[start..end])?);
                            self.phase = Phase::AfterItem;
                        }
                        None => {
                            self.phase = Phase::InItem {
                                start,
                                depth,
                                in_string,
                                escaped,
                            }
                        }
                    }
                }
                Phase::AfterItem => {
                    match byte {
                        b',' => self.phase = Phase::BeforeItem,
                        b']' => self.phase = Phase::Closed,
                        b if b.is_ascii_whitespace() => {}
                        _ => return Err(decode("expected ',' or ']' between records")),
                    }
                    self.pos += 1;
                }
                Phase::Closed => {
                    if !byte.is_ascii_whitespace() {
                        return Err(decode("trailing data after JSON array"));
                    }
                    self.pos += 1;
                }
            }
        }

        self.compact();
        Ok(())
    }

    /// Check that the body ended with the array closed.
    fn finish(&self) -> Result<(), ClientError> {
        match self.phase {
            Phase::Closed => Ok(()),
            _ => Err(decode("response ended inside JSON array")),
        }
    }

    /// Drop consumed bytes, keeping any partial element.
    fn compact(&mut self) {
        let keep_from = match &mut self.phase {
            Phase::InItem { start, .. } => {
                let from = *start;
                *start = 0;
                from
            }
            _ => self.pos,
        };
        self.buf.drain(..keep_from);
        self.pos -= keep_from;
    }
}

fn parse(bytes: &[u8]) -> Result<Value, ClientError> {
    serde_json::from_slice(bytes).map_err(|e| ClientError::Decode(e.to_string()))
}

fn decode(message: &str) -> ClientError {
    ClientError::Decode(message.to_string())
}

/// Writes records as a pretty-printed JSON array, flushing after each one.
///
/// Keys are emitted in sorted order.
pub struct JsonArrayWriter<W: Write> {
    out: W,
    written: usize,
}

impl<W: Write> JsonArrayWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    /// Records written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Append one record.
    pub fn write(&mut self, record: &Value) -> io::Result<()> {
        let separator: &[u8] = if self.written == 0 { b"[\n" } else { b",\n" };
        self.out.write_all(separator)?;
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut self.out, formatter);
        serde::Serialize::serialize(record, &mut ser)?;
        self.written += 1;
        self.out.flush()
    }

    /// Close the array and hand back the writer.
    pub fn finish(mut self) -> io::Result<W> {
        if self.written == 0 {
            self.out.write_all(b"[\n")?;
        }
        self.out.write_all(b"\n]\n")?;
        self.out.flush()?;
        Ok(self.out)
    }
}
