//! Frame stream ingest.
//!
//! Accepts TCP connections carrying the two-part stream contract: a
//! length-prefixed JSON header describing the frame, followed by a
//! length-prefixed payload of pre-encoded bytes. Decoded frames are pushed
//! onto a bounded channel; when the writer falls behind, the channel fills
//! and backpressure propagates to the transport instead of the engine.
//!
//! Wire layout per frame:
//!
//! ```text
//! u32 BE header length | JSON header | u64 BE payload length | payload
//! ```
//!
//! The header carries `frame_index`, `shape` (rows, cols), `dtype`, and an
//! optional `encoding` tag.

use crate::config::IngestConfig;
use crate::frame::{
    FrameMessage, FrameShape, PixelType, BITSHUFFLE_LZ4_ENCODING, BITSHUFFLE_PROLOGUE_LEN,
};
use bytes::Bytes;
use metrics::counter;
use serde::Deserialize;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Headers larger than this are a protocol violation, not a big frame.
const MAX_HEADER_BYTES: u32 = 64 * 1024;

/// Errors that can occur while receiving frames.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed frame header: {0}")]
    Header(#[from] serde_json::Error),

    #[error("frame header of {0} bytes exceeds limit")]
    HeaderTooLarge(u32),

    #[error("negative frame index {0}")]
    NegativeFrameIndex(i64),

    #[error("payload of {bytes} bytes exceeds limit of {limit}")]
    PayloadTooLarge {
        bytes: u64,
        limit: usize,
    },

    #[error("bitshuffle payload of {0} bytes is shorter than its prologue")]
    PayloadTooShort(u64),

    #[error("frame queue closed")]
    QueueClosed,
}

/// JSON header preceding each payload on the wire.
#[derive(Debug, Deserialize)]
struct WireHeader {
    /// Signed on the wire so that an upstream bug surfaces as an explicit
    /// rejection instead of wrapping into a huge unsigned index.
    frame_index: i64,
    /// (rows, cols) pixel geometry.
    shape: [u32; 2],
    dtype: PixelType,
    #[serde(default)]
    encoding: Option<String>,
}

/// Read one frame from the stream.
///
/// Returns `Ok(None)` on a clean end of stream between frames; an end of
/// stream in the middle of a frame is an error.
pub async fn read_frame<R>(
    reader: &mut R,
    max_payload_bytes: usize,
) -> Result<Option<FrameMessage>, IngestError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header_len = u32::from_be_bytes(len_buf);
    if header_len > MAX_HEADER_BYTES {
        return Err(IngestError::HeaderTooLarge(header_len));
    }

    let mut header_buf = vec![0u8; header_len as usize];
    reader.read_exact(&mut header_buf).await?;
    let header: WireHeader = serde_json::from_slice(&header_buf)?;

    let frame_index = u64::try_from(header.frame_index)
        .map_err(|_| IngestError::NegativeFrameIndex(header.frame_index))?;

    let mut payload_len_buf = [0u8; 8];
    reader.read_exact(&mut payload_len_buf).await?;
    let payload_len = u64::from_be_bytes(payload_len_buf);
    if payload_len > max_payload_bytes as u64 {
        return Err(IngestError::PayloadTooLarge {
            bytes: payload_len,
            limit: max_payload_bytes,
        });
    }
    // A bitshuffle-LZ4 payload always starts with its 12-byte framing
    // prologue; anything shorter cannot be decoded downstream.
    if header.encoding.as_deref() == Some(BITSHUFFLE_LZ4_ENCODING)
        && payload_len < BITSHUFFLE_PROLOGUE_LEN as u64
    {
        return Err(IngestError::PayloadTooShort(payload_len));
    }

    let mut payload = vec![0u8; payload_len as usize];
    reader.read_exact(&mut payload).await?;

    Ok(Some(FrameMessage {
        frame_index,
        shape: FrameShape::new(header.shape[0], header.shape[1]),
        pixel_type: header.dtype,
        encoding: header.encoding,
        data: Bytes::from(payload),
    }))
}

/// TCP listener feeding decoded frames into the writer channel.
pub struct IngestServer {
    config: IngestConfig,
    tx: mpsc::Sender<FrameMessage>,
}

impl IngestServer {
    pub fn new(config: IngestConfig, tx: mpsc::Sender<FrameMessage>) -> Self {
        Self { config, tx }
    }

    /// Accept connections until the frame channel closes.
    pub async fn run(self) -> Result<(), IngestError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(address = %addr, "Ingest listener started");

        loop {
            let (stream, peer) = listener.accept().await?;
            if self.tx.is_closed() {
                return Err(IngestError::QueueClosed);
            }
            debug!(peer = %peer, "Stream connected");

            let tx = self.tx.clone();
            let max_payload_bytes = self.config.max_payload_bytes;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, tx, max_payload_bytes).await {
                    warn!(peer = %peer, error = %e, "Stream connection failed");
                }
                debug!(peer = %peer, "Stream disconnected");
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    tx: mpsc::Sender<FrameMessage>,
    max_payload_bytes: usize,
) -> Result<(), IngestError> {
    let mut reader = BufReader::new(stream);

    while let Some(frame) = read_frame(&mut reader, max_payload_bytes).await? {
        trace!(
            frame_index = frame.frame_index,
            bytes = frame.data.len(),
            "Frame received"
        );
        counter!("framestore_frames_received_total").increment(1);

        if tx.send(frame).await.is_err() {
            return Err(IngestError::QueueClosed);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    fn encode_frame(header: &serde_json::Value, payload: &[u8]) -> Vec<u8> {
        let header_bytes = serde_json::to_vec(header).unwrap();
        let mut wire = Vec::new();
        wire.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
        wire.extend_from_slice(&header_bytes);
        wire.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        wire.extend_from_slice(payload);
        wire
    }

    #[tokio::test]
    async fn test_read_frame_decodes_header_and_payload() {
        let wire = encode_frame(
            &json!({
                "frame_index": 17,
                "shape": [512, 1024],
                "dtype": "uint16",
                "encoding": "bs16-lz4<"
            }),
            b"compressed-bytes",
        );

        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(&wire).await.unwrap();
        drop(client);

        let mut reader = BufReader::new(server);
        let frame = read_frame(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(frame.frame_index, 17);
        assert_eq!(frame.shape, FrameShape::new(512, 1024));
        assert_eq!(frame.pixel_type, PixelType::UInt16);
        assert_eq!(frame.encoding.as_deref(), Some("bs16-lz4<"));
        assert_eq!(&frame.data[..], b"compressed-bytes");

        // Clean end of stream after a whole frame.
        assert!(read_frame(&mut reader, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_rejects_negative_index() {
        let wire = encode_frame(
            &json!({"frame_index": -1, "shape": [4, 4], "dtype": "uint8"}),
            b"x",
        );

        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(&wire).await.unwrap();
        drop(client);

        let mut reader = BufReader::new(server);
        let err = read_frame(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(err, IngestError::NegativeFrameIndex(-1)));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_payload() {
        let wire = encode_frame(
            &json!({"frame_index": 0, "shape": [4, 4], "dtype": "uint8"}),
            &[0u8; 64],
        );

        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(&wire).await.unwrap();
        drop(client);

        let mut reader = BufReader::new(server);
        let err = read_frame(&mut reader, 16).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::PayloadTooLarge { bytes: 64, limit: 16 }
        ));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_prologue_short_bitshuffle_payload() {
        let wire = encode_frame(
            &json!({
                "frame_index": 0,
                "shape": [4, 4],
                "dtype": "uint16",
                "encoding": "bs16-lz4<"
            }),
            &[0u8; 8],
        );

        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(&wire).await.unwrap();
        drop(client);

        let mut reader = BufReader::new(server);
        assert!(matches!(
            read_frame(&mut reader, 1024).await.unwrap_err(),
            IngestError::PayloadTooShort(8)
        ));
    }

    #[tokio::test]
    async fn test_read_frame_errors_on_truncated_payload() {
        let mut wire = encode_frame(
            &json!({"frame_index": 0, "shape": [4, 4], "dtype": "uint8"}),
            b"full-payload",
        );
        wire.truncate(wire.len() - 4);

        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(&wire).await.unwrap();
        drop(client);

        let mut reader = BufReader::new(server);
        assert!(matches!(
            read_frame(&mut reader, 1024).await.unwrap_err(),
            IngestError::Io(_)
        ));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_malformed_header() {
        let header_bytes = b"{not json";
        let mut wire = Vec::new();
        wire.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
        wire.extend_from_slice(header_bytes);

        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(&wire).await.unwrap();
        drop(client);

        let mut reader = BufReader::new(server);
        assert!(matches!(
            read_frame(&mut reader, 1024).await.unwrap_err(),
            IngestError::Header(_)
        ));
    }
}
