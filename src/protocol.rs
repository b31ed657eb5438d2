//! Length-prefixed JSON wire protocol.
//!
//! Every message in both directions is one frame:
//!
//! ```text
//! +----------------+---------------------------+
//! | len: u32 (BE)  | len bytes of UTF-8 JSON   |
//! +----------------+---------------------------+
//! ```
//!
//! Requests decode to [`Request`], responses encode from [`Response`].
//! A frame that is well delimited but does not hold a valid request is
//! a per-message problem; a frame that cannot be delimited at all is
//! fatal to the connection.

use crate::backend::Reply;
use crate::operation::Operation;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length header.
pub const HEADER_LEN: usize = 4;

/// Read buffer size
const BUFFER_SIZE: usize = 8 * 1024;

/// Message sent back for a frame that is not a valid request.
pub const MALFORMED_REQUEST: &str = "Malformed request";

/// Connection-fatal framing and transport errors.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    TooLarge { len: usize, max: usize },

    #[error("stream closed in the middle of a frame ({buffered} bytes buffered)")]
    Truncated { buffered: usize },

    #[error("read deadline elapsed")]
    TimedOut,

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub operation: Operation,
    #[serde(default)]
    pub payload: Option<String>,
}

impl Request {
    #[cfg(test)]
    pub fn new(operation: Operation, payload: Option<String>) -> Self {
        Request { operation, payload }
    }

    /// Interpret a frame body as a request.
    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

/// The server's answer to one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    pub message: String,
    pub payload: Option<String>,
}

impl Response {
    pub fn ok(reply: Reply) -> Self {
        Response {
            success: true,
            message: reply.message,
            payload: reply.payload,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Response {
            success: false,
            message: message.into(),
            payload: None,
        }
    }

    pub fn malformed() -> Self {
        Self::failure(MALFORMED_REQUEST)
    }

    /// Encode as a complete frame.
    pub fn encode(&self) -> Result<BytesMut, FrameError> {
        let body = serde_json::to_vec(self)?;
        encode_frame(&body)
    }
}

/// Result of looking for a frame at the front of a buffer.
#[derive(Debug, PartialEq)]
pub enum ParseResult {
    /// A full frame is buffered; value is header plus body length.
    Complete(usize),
    /// More bytes are needed; value is the total frame size if known.
    Incomplete(Option<usize>),
    /// The header announces an oversized body.
    TooLarge(usize),
}

/// Locate a frame at the front of `buffer`.
pub fn parse_frame(buffer: &[u8], max_frame_len: usize) -> ParseResult {
    if buffer.len() < HEADER_LEN {
        return ParseResult::Incomplete(None);
    }
    let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
    if len > max_frame_len {
        return ParseResult::TooLarge(len);
    }
    let total = HEADER_LEN + len;
    if buffer.len() >= total {
        ParseResult::Complete(total)
    } else {
        ParseResult::Incomplete(Some(total))
    }
}

/// Prefix `body` with its length header.
pub fn encode_frame(body: &[u8]) -> Result<BytesMut, FrameError> {
    let len = u32::try_from(body.len()).map_err(|_| FrameError::TooLarge {
        len: body.len(),
        max: u32::MAX as usize,
    })?;
    let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
    frame.put_u32(len);
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Write a whole frame and flush it.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Incremental frame reader holding bytes between reads.
#[derive(Debug)]
pub struct FrameReader {
    buffer: BytesMut,
    max_frame_len: usize,
}

impl FrameReader {
    pub fn new(max_frame_len: usize) -> Self {
        FrameReader {
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
            max_frame_len,
        }
    }

    /// Read the next frame body.
    ///
    /// Returns `Ok(None)` when the peer closes on a frame boundary.
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> Result<Option<Bytes>, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            match parse_frame(&self.buffer, self.max_frame_len) {
                ParseResult::Complete(total) => {
                    let mut frame = self.buffer.split_to(total);
                    frame.advance(HEADER_LEN);
                    return Ok(Some(frame.freeze()));
                }
                ParseResult::TooLarge(len) => {
                    return Err(FrameError::TooLarge {
                        len,
                        max: self.max_frame_len,
                    });
                }
                ParseResult::Incomplete(Some(total)) => {
                    self.buffer.reserve(total - self.buffer.len());
                }
                ParseResult::Incomplete(None) => {}
            }

            let n = reader.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::Truncated {
                    buffered: self.buffer.len(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body: &str) -> Vec<u8> {
        encode_frame(body.as_bytes()).unwrap().to_vec()
    }

    #[test]
    fn test_parse_frame_incomplete_header() {
        assert_eq!(parse_frame(&[0, 0], 16), ParseResult::Incomplete(None));
    }

    #[test]
    fn test_parse_frame_incomplete_body() {
        assert_eq!(parse_frame(&[0, 0, 0, 5, b'a'], 16), ParseResult::Incomplete(Some(9)));
    }

    #[test]
    fn test_parse_frame_complete_with_trailing_bytes() {
        let mut buf = frame("hi");
        buf.extend_from_slice(&[0, 0]);
        assert_eq!(parse_frame(&buf, 16), ParseResult::Complete(6));
    }

    #[test]
    fn test_parse_frame_too_large() {
        assert_eq!(parse_frame(&[0, 0, 1, 0], 16), ParseResult::TooLarge(256));
    }

    #[test]
    fn test_request_decode() {
        let request = Request::decode(br#"{"operation":"GET_ALL_ROLES","payload":""}"#).unwrap();
        assert_eq!(request.operation, Operation::GetAllRoles);
        assert_eq!(request.payload.as_deref(), Some(""));

        let request = Request::decode(br#"{"operation":"DISCONNECT"}"#).unwrap();
        assert_eq!(request, Request::new(Operation::Disconnect, None));
    }

    #[test]
    fn test_request_decode_rejects_wrong_shape() {
        assert!(Request::decode(b"not json").is_err());
        assert!(Request::decode(br#"{"payload":"x"}"#).is_err());
        assert!(Request::decode(br#"{"operation":"NOPE"}"#).is_err());
        assert!(Request::decode(br#"{"operation":7}"#).is_err());
        assert!(Request::decode(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_response_encoding() {
        let encoded = Response::failure("nope").encode().unwrap();
        assert_eq!(&encoded[..HEADER_LEN], &(encoded.len() as u32 - 4).to_be_bytes());
        let body: Response = serde_json::from_slice(&encoded[HEADER_LEN..]).unwrap();
        assert_eq!(body, Response::failure("nope"));
        assert!(std::str::from_utf8(&encoded[HEADER_LEN..])
            .unwrap()
            .contains("\"payload\":null"));
    }

    #[tokio::test]
    async fn test_read_frames_across_partial_reads() {
        let mut bytes = frame("first");
        bytes.extend(frame("second"));
        let mut stream = tokio_test::io::Builder::new()
            .read(&bytes[..3])
            .read(&bytes[3..11])
            .read(&bytes[11..])
            .build();

        let mut reader = FrameReader::new(1024);
        assert_eq!(reader.read_frame(&mut stream).await.unwrap().unwrap(), "first");
        assert_eq!(reader.read_frame(&mut stream).await.unwrap().unwrap(), "second");
        assert!(reader.read_frame(&mut stream).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_truncated() {
        let bytes = frame("unfinished");
        let mut stream = tokio_test::io::Builder::new().read(&bytes[..7]).build();
        let mut reader = FrameReader::new(1024);
        assert!(matches!(
            reader.read_frame(&mut stream).await,
            Err(FrameError::Truncated { buffered: 7 })
        ));
    }

    #[tokio::test]
    async fn test_read_frame_oversized() {
        let bytes = frame("0123456789");
        let mut stream = tokio_test::io::Builder::new().read(&bytes).build();
        let mut reader = FrameReader::new(4);
        assert!(matches!(
            reader.read_frame(&mut stream).await,
            Err(FrameError::TooLarge { len: 10, max: 4 })
        ));
    }
}
