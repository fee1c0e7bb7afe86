//! Streaming plain-text rendition of a file.
//!
//! Bytes are decoded as UTF-8 chunk by chunk, with invalid sequences replaced
//! by U+FFFD. A multi-byte character split across two reads is carried over
//! and decoded whole, so the output matches decoding the file in one piece.

use std::io::{self, ErrorKind};
use std::time::Duration;

use futures::StreamExt;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// Incremental lossy UTF-8 decoder.
#[derive(Debug, Default)]
pub struct LossyUtf8Decoder {
    pending: Vec<u8>,
}

impl LossyUtf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk. An incomplete sequence at the end of `chunk` is
    /// held back until the next call or [`finish`](Self::finish).
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(chunk);

        let mut out = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is held back. A truncated sequence at end of input
    /// becomes a single U+FFFD.
    pub fn finish(self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }
}

/// An open file read as text, one chunk at a time, each read bounded by
/// `read_timeout`.
pub struct PlainTextReader {
    reader: ReaderStream<File>,
    decoder: Option<LossyUtf8Decoder>,
    read_timeout: Duration,
}

impl PlainTextReader {
    pub fn new(file: File, read_timeout: Duration) -> Self {
        Self {
            reader: ReaderStream::new(file),
            decoder: Some(LossyUtf8Decoder::new()),
            read_timeout,
        }
    }

    /// Next non-empty piece of text, or `None` once the file is exhausted.
    /// A read that outlasts the timeout fails with [`ErrorKind::TimedOut`].
    pub async fn next_chunk(&mut self) -> io::Result<Option<String>> {
        loop {
            let Some(decoder) = self.decoder.as_mut() else {
                return Ok(None);
            };

            match tokio::time::timeout(self.read_timeout, self.reader.next()).await {
                Err(_) => return Err(io::Error::new(ErrorKind::TimedOut, "file read timed out")),
                Ok(Some(Err(err))) => return Err(err),
                Ok(Some(Ok(bytes))) => {
                    let text = decoder.decode(&bytes);
                    if !text.is_empty() {
                        return Ok(Some(text));
                    }
                }
                Ok(None) => {
                    let tail = self.decoder.take().map(LossyUtf8Decoder::finish);
                    return Ok(tail.filter(|text| !text.is_empty()));
                }
            }
        }
    }

    /// Turn the remaining chunks into a stream suitable for a response body.
    pub fn into_stream(self) -> impl futures::Stream<Item = io::Result<String>> + Send + 'static {
        futures::stream::try_unfold(self, |mut reader| async move {
            let chunk = reader.next_chunk().await?;
            Ok::<_, io::Error>(chunk.map(|chunk| (chunk, reader)))
        })
    }
}
