//! Framing for write-ahead log entries.
//!
//! Each frame is:
//! ```text
//! [version: 1 byte][length: 4 bytes LE][payload: N bytes JSON][crc32: 4 bytes LE]
//! ```
//! A file starts with `[MAGIC: 4 bytes][version: 1 byte]`.

use std::io::{self, ErrorKind, Read, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Current frame version.
pub const FRAME_VERSION: u8 = 1;

/// Magic bytes identifying a Linkage log file.
pub const MAGIC: [u8; 4] = *b"LINK";

/// Size of the file header in bytes.
pub const HEADER_LEN: u64 = 5;

/// Frames larger than this are treated as corruption.
const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Why a frame could not be written or read.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The value cannot be framed (serialization failed or too large).
    #[error("frame encoding failed: {0}")]
    Encode(String),

    /// The input ended inside a frame (torn write).
    #[error("truncated frame")]
    Truncated,

    /// The bytes are readable but wrong.
    #[error("corrupt frame: {0}")]
    Corrupt(String),

    /// Underlying I/O failed.
    #[error("frame I/O failed: {0}")]
    Io(#[from] io::Error),
}

fn read_exact_or_truncated(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), FrameError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            FrameError::Truncated
        } else {
            FrameError::Io(e)
        }
    })
}

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Serialize `value` into one checksummed frame.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>, FrameError> {
    encode_frame_limited(value, MAX_PAYLOAD)
}

fn encode_frame_limited<T: Serialize>(value: &T, max_payload: usize) -> Result<Vec<u8>, FrameError> {
    let payload = serde_json::to_vec(value)
        .map_err(|e| FrameError::Encode(format!("serialization failed: {e}")))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|_| payload.len() <= max_payload)
        .ok_or_else(|| {
            FrameError::Encode(format!(
                "frame payload of {} bytes exceeds maximum {max_payload}",
                payload.len()
            ))
        })?;

    let mut out = Vec::with_capacity(payload.len() + 9);
    out.push(FRAME_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&checksum(&payload).to_le_bytes());
    Ok(out)
}

/// Read one frame, verifying version, size, and checksum.
///
/// Returns the decoded value and the number of bytes consumed.
pub fn decode_frame<T: DeserializeOwned>(reader: &mut impl Read) -> Result<(T, u64), FrameError> {
    let mut head = [0u8; 5];
    read_exact_or_truncated(reader, &mut head)?;

    if head[0] != FRAME_VERSION {
        return Err(FrameError::Corrupt(format!(
            "unsupported frame version {} (expected {FRAME_VERSION})",
            head[0]
        )));
    }

    let len = u32::from_le_bytes([head[1], head[2], head[3], head[4]]) as usize;
    if len > MAX_PAYLOAD {
        return Err(FrameError::Corrupt(format!(
            "frame length {len} exceeds maximum {MAX_PAYLOAD}"
        )));
    }

    let mut payload = vec![0u8; len];
    read_exact_or_truncated(reader, &mut payload)?;

    let mut crc = [0u8; 4];
    read_exact_or_truncated(reader, &mut crc)?;
    let stored = u32::from_le_bytes(crc);
    let computed = checksum(&payload);
    if stored != computed {
        return Err(FrameError::Corrupt(format!(
            "CRC mismatch: stored={stored:08x}, computed={computed:08x}"
        )));
    }

    let value = serde_json::from_slice(&payload)
        .map_err(|e| FrameError::Corrupt(format!("deserialization failed: {e}")))?;
    Ok((value, len as u64 + 9))
}

/// Write the file header.
pub fn write_header(writer: &mut impl Write) -> io::Result<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[FRAME_VERSION])
}

/// Read and validate the file header.
pub fn read_header(reader: &mut impl Read) -> io::Result<u8> {
    let mut header = [0u8; 5];
    reader.read_exact(&mut header)?;
    if header[..4] != MAGIC {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {:?}", &header[..4]),
        ));
    }
    Ok(header[4])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_reports_consumed_length() {
        let encoded = encode_frame(&"hello".to_string()).unwrap();
        let mut cursor = Cursor::new(encoded.clone());
        let (value, consumed): (String, u64) = decode_frame(&mut cursor).unwrap();
        assert_eq!(value, "hello");
        assert_eq!(consumed, encoded.len() as u64);
    }

    #[test]
    fn test_detects_corruption() {
        let mut encoded = encode_frame(&"test data".to_string()).unwrap();
        encoded[8] ^= 0xFF;

        let mut cursor = Cursor::new(encoded);
        let result: Result<(String, u64), _> = decode_frame(&mut cursor);
        assert!(matches!(result, Err(FrameError::Corrupt(_))));
    }

    #[test]
    fn test_torn_frame_is_truncated() {
        let encoded = encode_frame(&vec![1u32, 2, 3]).unwrap();
        let torn = encoded[..encoded.len() - 2].to_vec();

        let mut cursor = Cursor::new(torn);
        let result: Result<(Vec<u32>, u64), _> = decode_frame(&mut cursor);
        assert!(matches!(result, Err(FrameError::Truncated)));
    }

    #[test]
    fn test_rejects_oversized_length() {
        let mut bad = vec![FRAME_VERSION];
        bad.extend_from_slice(&(200_000_000u32).to_le_bytes());

        let mut cursor = Cursor::new(bad);
        let result: Result<(String, u64), _> = decode_frame(&mut cursor);
        match result {
            Err(FrameError::Corrupt(msg)) => assert!(msg.contains("exceeds maximum")),
            other => panic!("expected corrupt frame, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let err = encode_frame_limited(&"x".repeat(64), 16).unwrap_err();
        match err {
            FrameError::Encode(msg) => assert!(msg.contains("exceeds maximum 16")),
            other => panic!("expected encode error, got {other:?}"),
        }
        assert!(encode_frame_limited(&"x".repeat(8), 16).is_ok());
    }

    #[test]
    fn test_header_validation() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, HEADER_LEN);
        assert_eq!(read_header(&mut Cursor::new(buf)).unwrap(), FRAME_VERSION);

        let err = read_header(&mut Cursor::new(b"NOPE\x01".to_vec())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
