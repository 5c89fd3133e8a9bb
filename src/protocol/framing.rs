/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Length-prefixed binary framing over a byte stream.
//!
//! # Wire Format
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ Payload Length (4 bytes, big-endian u32)                      │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Payload (exactly that many bytes)                             │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads and writes are strict: a short read maps to
//! [`OefError::ConnectionClosed`], a length above the configured cap to
//! [`OefError::Protocol`]. A single `write_frame` call emits one contiguous
//! frame; callers with concurrent writers must serialise them on one write
//! queue per socket.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::OefError;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Hard cap on frame payloads (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

fn map_read_error(e: std::io::Error) -> OefError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        OefError::ConnectionClosed
    } else {
        OefError::Io(e.to_string())
    }
}

/// Read one frame from the stream.
///
/// Returns the payload bytes.
///
/// # Errors
///
/// [`OefError::ConnectionClosed`] when the stream ends mid-frame,
/// [`OefError::Protocol`] when the announced length exceeds `max_size` or
/// the hard limit, [`OefError::Io`] for any other read failure.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Vec<u8>, OefError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut prefix).await.map_err(map_read_error)?;

    let length = u32::from_be_bytes(prefix) as usize;
    if length > max_size {
        return Err(OefError::Protocol(format!(
            "Frame size {length} exceeds maximum {max_size}"
        )));
    }
    if length > MAX_FRAME_SIZE {
        return Err(OefError::Protocol(format!(
            "Frame size {length} exceeds hard limit {MAX_FRAME_SIZE}"
        )));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await.map_err(map_read_error)?;

    Ok(payload)
}

/// Write one frame to the stream and flush it.
///
/// # Errors
///
/// [`OefError::Protocol`] when the payload does not fit a `u32` length,
/// [`OefError::Io`] on write failure.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), OefError>
where
    W: AsyncWrite + Unpin,
{
    let length: u32 = payload
        .len()
        .try_into()
        .map_err(|_| OefError::Protocol("Payload too large for u32 length".to_string()))?;

    writer
        .write_all(&length.to_be_bytes())
        .await
        .map_err(|e| OefError::Io(e.to_string()))?;
    writer
        .write_all(payload)
        .await
        .map_err(|e| OefError::Io(e.to_string()))?;
    writer.flush().await.map_err(|e| OefError::Io(e.to_string()))?;

    Ok(())
}

/// Read one frame and deserialize its payload.
///
/// # Errors
///
/// Framing errors as [`read_frame`], plus [`OefError::Serialization`] when
/// the payload does not parse as `T`.
pub async fn read_message<R, T>(reader: &mut R, max_size: usize) -> Result<T, OefError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let payload = read_frame(reader, max_size).await?;
    serde_json::from_slice(&payload).map_err(OefError::from)
}

/// Serialize a message and write it as one frame.
///
/// # Errors
///
/// [`OefError::Serialization`] when encoding fails, framing errors as
/// [`write_frame`].
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), OefError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(message)?;
    write_frame(writer, &payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_write_read_frame() {
        let mut buffer = Vec::new();
        let payload = b"test payload";

        write_frame(&mut buffer, payload).await.unwrap();

        let mut reader = Cursor::new(buffer);
        let read_payload = read_frame(&mut reader, 1024).await.unwrap();

        assert_eq!(read_payload, payload);
    }

    #[tokio::test]
    async fn test_empty_payload() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &[]).await.unwrap();
        assert_eq!(buffer.len(), LENGTH_PREFIX_SIZE);

        let mut reader = Cursor::new(buffer);
        let read_payload = read_frame(&mut reader, 1024).await.unwrap();
        assert!(read_payload.is_empty());
    }

    #[tokio::test]
    async fn test_frame_too_large() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&10_000u32.to_be_bytes());

        let mut reader = Cursor::new(buffer);
        let result = read_frame(&mut reader, 100).await;

        assert!(matches!(result, Err(OefError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_connection_closed_on_empty_stream() {
        let mut reader = Cursor::new(Vec::<u8>::new());
        let result = read_frame(&mut reader, 1024).await;

        assert!(matches!(result, Err(OefError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_connection_closed_on_truncated_payload() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&8u32.to_be_bytes());
        buffer.extend_from_slice(b"shor"); // 4 of 8 announced bytes

        let mut reader = Cursor::new(buffer);
        let result = read_frame(&mut reader, 1024).await;

        assert!(matches!(result, Err(OefError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_write_read_message() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Probe {
            id: u32,
            name: String,
        }

        let mut buffer = Vec::new();
        let probe = Probe {
            id: 7,
            name: "probe".to_string(),
        };

        write_message(&mut buffer, &probe).await.unwrap();

        let mut reader = Cursor::new(buffer);
        let back: Probe = read_message(&mut reader, 1024).await.unwrap();
        assert_eq!(back, probe);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_serialization_error() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"not json").await.unwrap();

        let mut reader = Cursor::new(buffer);
        let result: Result<u32, _> = read_message(&mut reader, 1024).await;

        assert!(matches!(result, Err(OefError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_back_to_back_frames() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"first").await.unwrap();
        write_frame(&mut buffer, b"second").await.unwrap();

        let mut reader = Cursor::new(buffer);
        assert_eq!(read_frame(&mut reader, 1024).await.unwrap(), b"first");
        assert_eq!(read_frame(&mut reader, 1024).await.unwrap(), b"second");
    }
}
