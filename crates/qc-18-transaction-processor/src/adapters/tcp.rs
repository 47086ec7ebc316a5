//! TCP transport: length-prefixed bincode frames over a `TcpStream`.
//!
//! The framing helpers are public so a validator (or a test double) can speak
//! the same wire format.

use async_trait::async_trait;
use shared_types::codec::{check_frame_len, decode_body, encode_frame, FRAME_HEADER_LEN};
use shared_types::RequestEnvelope;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::domain::{Endpoint, TransportError};
use crate::ports::{Connector, FrameReader, FrameWriter, TransportPair};

/// Connects to a validator over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    max_frame_len: usize,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration, max_frame_len: usize) -> Self {
        Self {
            connect_timeout,
            max_frame_len,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<TransportPair, TransportError> {
        let addr = endpoint.socket_addr();
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                TransportError::Connect(format!(
                    "{endpoint}: timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| TransportError::Connect(format!("{endpoint}: {e}")))?;

        stream.set_nodelay(true)?;
        debug!(endpoint = %endpoint, "TCP connection established");

        let (read_half, write_half) = stream.into_split();
        Ok((
            Box::new(TcpFrameWriter {
                inner: write_half,
                max_frame_len: self.max_frame_len,
            }),
            Box::new(TcpFrameReader {
                inner: BufReader::new(read_half),
                max_frame_len: self.max_frame_len,
            }),
        ))
    }
}

struct TcpFrameWriter {
    inner: OwnedWriteHalf,
    max_frame_len: usize,
}

#[async_trait]
impl FrameWriter for TcpFrameWriter {
    async fn write_frame(&mut self, envelope: &RequestEnvelope) -> Result<(), TransportError> {
        write_frame(&mut self.inner, envelope, self.max_frame_len).await
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

struct TcpFrameReader {
    inner: BufReader<OwnedReadHalf>,
    max_frame_len: usize,
}

#[async_trait]
impl FrameReader for TcpFrameReader {
    async fn read_frame(&mut self) -> Result<Option<RequestEnvelope>, TransportError> {
        read_frame(&mut self.inner, self.max_frame_len).await
    }
}

/// Write one frame. The envelope is encoded before any byte is written.
pub async fn write_frame<W>(
    writer: &mut W,
    envelope: &RequestEnvelope,
    max_frame_len: usize,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + Send,
{
    let frame = encode_frame(envelope, max_frame_len)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. End of stream before a length prefix is `Ok(None)`.
pub async fn read_frame<R>(
    reader: &mut R,
    max_frame_len: usize,
) -> Result<Option<RequestEnvelope>, TransportError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = check_frame_len(u32::from_be_bytes(header) as usize, max_frame_len)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    decode_body(&body)
        .map(Some)
        .map_err(|e| TransportError::Malformed(e.to_string()))
}
