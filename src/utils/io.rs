use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::Result;

/// Read exactly `len` bytes or fail
pub async fn read_exact<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
    len: usize,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write all bytes and flush
pub async fn write_all<W: AsyncWrite + Unpin + ?Sized>(
    writer: &mut W,
    buf: &[u8],
) -> Result<()> {
    writer.write_all(buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Fill `buf` from `reader`, stopping early only at end of input.
///
/// Returns the number of bytes read; less than `buf.len()` means EOF.
pub async fn read_full<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
