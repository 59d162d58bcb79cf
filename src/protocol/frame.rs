use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{error, trace};

use crate::protocol::error::{LoomError, Result};
use crate::protocol::FRAME_ACK;
use crate::utils::io::read_exact;
use crate::utils::varint::{encode_varint, read_uvarint, write_uvarint};

/// Header preceding the chunk sequence of exactly one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub key: Vec<u8>,
    /// Advisory only; never trusted for allocation.
    pub declared_size: u64,
    pub msg_id: u64,
}

impl MessageHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.key.len() + 24);
        encode_varint(self.key.len() as u64, &mut buf);
        buf.extend_from_slice(&self.key);
        encode_varint(self.declared_size, &mut buf);
        encode_varint(self.msg_id, &mut buf);
        buf
    }
}

/// One read from the chunk sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Data(Vec<u8>),
    /// Zero-length sentinel terminating the message.
    End,
}

/// Write a message header. Does not flush.
pub async fn write_message_header<W: AsyncWrite + Unpin + ?Sized>(
    writer: &mut W,
    key: &[u8],
    declared_size: u64,
    msg_id: u64,
) -> Result<()> {
    let header = MessageHeader {
        key: key.to_vec(),
        declared_size,
        msg_id,
    };
    writer.write_all(&header.encode()).await?;
    Ok(())
}

pub async fn read_message_header<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
    max_key_bytes: usize,
) -> Result<MessageHeader> {
    let key_len = read_uvarint(reader).await?;
    if key_len == 0 || key_len > max_key_bytes as u64 {
        error!("Bad key length: {} (max: {})", key_len, max_key_bytes);
        return Err(LoomError::malformed(format!("bad key len: {}", key_len)));
    }
    let key = read_exact(reader, key_len as usize).await?;
    let declared_size = read_uvarint(reader).await?;
    let msg_id = read_uvarint(reader).await?;

    trace!("Read message header: key_len={}, declared_size={}, msg_id={}", key_len, declared_size, msg_id);
    Ok(MessageHeader { key, declared_size, msg_id })
}

/// Write one chunk. An empty slice writes the end-of-message sentinel.
pub async fn write_chunk<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W, data: &[u8]) -> Result<()> {
    write_uvarint(writer, data.len() as u64).await?;
    if !data.is_empty() {
        writer.write_all(data).await?;
    }
    Ok(())
}

pub async fn read_chunk<R: AsyncRead + Unpin + ?Sized>(reader: &mut R, max_chunk_bytes: usize) -> Result<Chunk> {
    let len = read_uvarint(reader).await?;
    if len == 0 {
        return Ok(Chunk::End);
    }
    if len > max_chunk_bytes as u64 {
        error!("Chunk too large: {} (max: {})", len, max_chunk_bytes);
        return Err(LoomError::malformed(format!("chunk too large: {}", len)));
    }
    Ok(Chunk::Data(read_exact(reader, len as usize).await?))
}

pub async fn write_end_of_message<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W) -> Result<()> {
    write_chunk(writer, &[]).await
}

/// Write an Ack frame and flush.
pub async fn write_ack<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W, msg_id: u64) -> Result<()> {
    let mut buf = Vec::with_capacity(11);
    encode_varint(FRAME_ACK, &mut buf);
    encode_varint(msg_id, &mut buf);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read an Ack frame, returning its msg id.
pub async fn read_ack<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> Result<u64> {
    let frame_type = read_uvarint(reader).await?;
    if frame_type != FRAME_ACK {
        return Err(LoomError::malformed(format!("unexpected frame type {}", frame_type)));
    }
    read_uvarint(reader).await
}
