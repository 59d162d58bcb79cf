use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{LoomError, Result};
use crate::protocol::MAX_VARINT_LEN;

/// Encode u64 into varint (LEB128-style)
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Number of bytes `encode_varint` emits for `value`
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Decode varint from bytes, returning the value and the bytes consumed.
///
/// `Ok(None)` means the buffer ended before the last byte of the varint.
pub fn decode_varint(buf: &[u8]) -> Result<Option<(u64, usize)>> {
    let mut decoder = VarintDecoder::new();
    for (i, &byte) in buf.iter().enumerate() {
        if let Some(value) = decoder.push(byte)? {
            return Ok(Some((value, i + 1)));
        }
    }
    Ok(None)
}

/// Incremental decoder fed one byte at a time, for poll-based readers.
#[derive(Debug, Default, Clone)]
pub struct VarintDecoder {
    value: u64,
    count: usize,
}

impl VarintDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, byte: u8) -> Result<Option<u64>> {
        if self.count >= MAX_VARINT_LEN {
            return Err(LoomError::malformed("varint too long"));
        }
        self.value |= ((byte & 0x7F) as u64) << (7 * self.count);
        self.count += 1;

        if byte & 0x80 == 0 {
            let value = self.value;
            *self = Self::default();
            return Ok(Some(value));
        }
        if self.count == MAX_VARINT_LEN {
            return Err(LoomError::malformed("varint too long"));
        }
        Ok(None)
    }
}

pub async fn write_uvarint<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W, value: u64) -> Result<()> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN);
    encode_varint(value, &mut buf);
    writer.write_all(&buf).await?;
    Ok(())
}

pub async fn read_uvarint<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> Result<u64> {
    let mut decoder = VarintDecoder::new();
    loop {
        let byte = reader.read_u8().await?;
        if let Some(value) = decoder.push(byte)? {
            return Ok(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_300_as_two_bytes() {
        let mut out = Vec::new();
        encode_varint(300, &mut out);
        assert_eq!(out, vec![0xAC, 0x02]);
        assert_eq!(decode_varint(&out).unwrap(), Some((300, 2)));
    }

    #[test]
    fn encoded_length_matches_bit_width() {
        for value in [0u64, 1, 127, 128, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let mut out = Vec::new();
            encode_varint(value, &mut out);
            assert_eq!(out.len(), varint_len(value), "value {value}");
            assert_eq!(decode_varint(&out).unwrap(), Some((value, out.len())));
        }
        assert_eq!(varint_len(0), 1);
        assert_eq!(varint_len(u64::MAX), 10);
    }

    #[test]
    fn eleven_continuation_bytes_are_malformed() {
        let buf = [0xFFu8; 11];
        assert!(matches!(decode_varint(&buf), Err(LoomError::MalformedFrame(_))));
    }

    #[test]
    fn truncated_buffer_is_incomplete() {
        assert_eq!(decode_varint(&[0x80, 0x80]).unwrap(), None);
    }

    #[tokio::test]
    async fn async_round_trip() {
        let mut buf = Vec::new();
        write_uvarint(&mut buf, 300).await.unwrap();
        write_uvarint(&mut buf, u64::MAX).await.unwrap();

        let mut reader = buf.as_slice();
        assert_eq!(read_uvarint(&mut reader).await.unwrap(), 300);
        assert_eq!(read_uvarint(&mut reader).await.unwrap(), u64::MAX);
    }

    #[tokio::test]
    async fn empty_stream_is_unexpected_end() {
        let mut reader: &[u8] = &[0x80];
        let err = read_uvarint(&mut reader).await.unwrap_err();
        assert!(matches!(err, LoomError::UnexpectedEndOfStream));
    }
}
