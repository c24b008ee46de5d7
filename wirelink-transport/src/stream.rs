//! Newline-delimited JSON response bodies.

use bytes::{Buf, Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;
use wirelink_core::ClientError;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Line too long: {0} bytes")]
    LineTooLong(usize),
    #[error("JSON error: {0}")]
    Json(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(io) => ClientError::network(io.to_string()),
            other => ClientError::codec(other.to_string()),
        }
    }
}

/// Splits a byte stream into one JSON value per line. Blank lines are skipped.
#[derive(Debug, Clone, Copy)]
pub struct JsonLinesCodec {
    max_line_length: usize,
}

impl JsonLinesCodec {
    pub fn new() -> Self {
        Self {
            max_line_length: 1024 * 1024,
        }
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self { max_line_length }
    }

    fn parse(line: &[u8]) -> Result<Option<Value>, CodecError> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(line)
            .map(Some)
            .map_err(|e| CodecError::Json(e.to_string()))
    }
}

impl Default for JsonLinesCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonLinesCodec {
    type Item = Value;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|&b| b == b'\n') else {
                if src.len() > self.max_line_length {
                    return Err(CodecError::LineTooLong(src.len()));
                }
                return Ok(None);
            };
            if pos > self.max_line_length {
                return Err(CodecError::LineTooLong(pos));
            }

            let line = src.split_to(pos);
            src.advance(1);
            if let Some(value) = Self::parse(&line)? {
                return Ok(Some(value));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(value) = self.decode(src)? {
            return Ok(Some(value));
        }
        // Final line without a trailing newline.
        let rest = src.split();
        Self::parse(&rest)
    }
}

type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Finite stream of JSON values read line by line from a response body.
pub struct JsonLinesStream {
    inner: FramedRead<StreamReader<ByteStream, Bytes>, JsonLinesCodec>,
}

impl JsonLinesStream {
    pub fn new<S, E>(bytes: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let bytes: ByteStream = bytes.map(|chunk| chunk.map_err(io::Error::other)).boxed();
        JsonLinesStream {
            inner: FramedRead::new(StreamReader::new(bytes), JsonLinesCodec::new()),
        }
    }

    pub fn from_response(response: reqwest::Response) -> Self {
        Self::new(response.bytes_stream())
    }
}

impl Stream for JsonLinesStream {
    type Item = Result<Value, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner)
            .poll_next(cx)
            .map(|item| item.map(|res| res.map_err(ClientError::from)))
    }
}

impl std::fmt::Debug for JsonLinesStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesStream").finish_non_exhaustive()
    }
}
