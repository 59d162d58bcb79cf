//! Reassembly of one message's chunk sequence into a plain byte stream.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

use crate::protocol::error::{LoomError, Result};
use crate::utils::varint::VarintDecoder;

#[derive(Debug)]
enum State {
    /// Reading the next chunk's length prefix.
    Length(VarintDecoder),
    /// Filling the single-chunk buffer.
    Body { filled: usize },
    /// Handing out buffered bytes from `pos`.
    Buffered { pos: usize },
    /// The end-of-message sentinel has been consumed.
    Done,
    /// Every later read repeats this failure.
    Failed(Failure),
}

#[derive(Debug, Clone)]
enum Failure {
    Malformed(String),
    Truncated,
}

impl Failure {
    fn of(err: &LoomError) -> Self {
        match err {
            LoomError::MalformedFrame(msg) => Failure::Malformed(msg.clone()),
            _ => Failure::Truncated,
        }
    }

    fn error(&self) -> LoomError {
        match self {
            Failure::Malformed(msg) => LoomError::malformed(msg.clone()),
            Failure::Truncated => LoomError::UnexpectedEndOfStream,
        }
    }
}

/// Reads the chunks of one message from `src`, returning EOF exactly when
/// the zero-length sentinel is consumed.
///
/// At most one chunk is buffered. A chunk longer than `max_chunk_bytes`
/// fails the stream before any of its bytes are read.
pub struct ChunkReader<'a, R: ?Sized> {
    src: &'a mut R,
    max_chunk_bytes: usize,
    buf: Vec<u8>,
    state: State,
    delivered: u64,
}

impl<'a, R: AsyncRead + Unpin + ?Sized> ChunkReader<'a, R> {
    pub fn new(src: &'a mut R, max_chunk_bytes: usize) -> Self {
        Self {
            src,
            max_chunk_bytes,
            buf: Vec::new(),
            state: State::Length(VarintDecoder::new()),
            delivered: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// Payload bytes handed to readers so far, including drained bytes.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Discard everything up to and including the end-of-message sentinel.
    pub async fn drain(&mut self) -> Result<u64> {
        let drained = tokio::io::copy(self, &mut tokio::io::sink()).await?;
        Ok(drained)
    }

    fn fail(&mut self, err: LoomError) -> Poll<io::Result<()>> {
        self.state = State::Failed(Failure::of(&err));
        Poll::Ready(Err(err.into()))
    }
}

impl<R: AsyncRead + Unpin + ?Sized> AsyncRead for ChunkReader<'_, R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if out.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            match &mut this.state {
                State::Done => return Poll::Ready(Ok(())),
                State::Failed(failure) => return Poll::Ready(Err(failure.error().into())),
                State::Buffered { pos } => {
                    let n = out.remaining().min(this.buf.len() - *pos);
                    out.put_slice(&this.buf[*pos..*pos + n]);
                    *pos += n;
                    if *pos == this.buf.len() {
                        this.state = State::Length(VarintDecoder::new());
                    }
                    this.delivered += n as u64;
                    return Poll::Ready(Ok(()));
                }
                State::Length(decoder) => {
                    let mut byte = [0u8; 1];
                    let mut rb = ReadBuf::new(&mut byte);
                    ready!(Pin::new(&mut *this.src).poll_read(cx, &mut rb))?;
                    if rb.filled().is_empty() {
                        return this.fail(LoomError::UnexpectedEndOfStream);
                    }
                    match decoder.push(byte[0]) {
                        Err(e) => return this.fail(e),
                        Ok(None) => {}
                        Ok(Some(0)) => {
                            this.state = State::Done;
                            return Poll::Ready(Ok(()));
                        }
                        Ok(Some(len)) if len > this.max_chunk_bytes as u64 => {
                            return this.fail(LoomError::malformed(format!("chunk too large: {}", len)));
                        }
                        Ok(Some(len)) => {
                            this.buf.clear();
                            this.buf.resize(len as usize, 0);
                            this.state = State::Body { filled: 0 };
                        }
                    }
                }
                State::Body { filled } => {
                    let mut rb = ReadBuf::new(&mut this.buf[*filled..]);
                    ready!(Pin::new(&mut *this.src).poll_read(cx, &mut rb))?;
                    let n = rb.filled().len();
                    if n == 0 {
                        return this.fail(LoomError::UnexpectedEndOfStream);
                    }
                    *filled += n;
                    if *filled == this.buf.len() {
                        this.state = State::Buffered { pos: 0 };
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{read_message_header, write_chunk, write_end_of_message, write_message_header};
    use tokio::io::AsyncReadExt;

    async fn framed(chunks: &[&[u8]]) -> Vec<u8> {
        let mut buf = Vec::new();
        for chunk in chunks {
            write_chunk(&mut buf, chunk).await.unwrap();
        }
        write_end_of_message(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn small_reads_reassemble_payload() {
        let wire = framed(&[b"hello ", b"chunked ", b"world"]).await;
        let mut src = wire.as_slice();
        let mut body = ChunkReader::new(&mut src, 64);

        let mut out = Vec::new();
        let mut piece = [0u8; 3];
        loop {
            let n = body.read(&mut piece).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&piece[..n]);
        }
        assert_eq!(out, b"hello chunked world");
        assert!(body.is_done());
        assert_eq!(body.delivered(), 19);
        assert!(src.is_empty());
    }

    #[tokio::test]
    async fn eof_only_after_sentinel() {
        let mut wire = framed(&[b"abc"]).await;
        // Drop the sentinel: the reader must not report a clean end.
        wire.pop();
        let mut src = wire.as_slice();
        let mut body = ChunkReader::new(&mut src, 64);

        let mut out = Vec::new();
        let err = body.read_to_end(&mut out).await.unwrap_err();
        assert!(matches!(LoomError::from(err), LoomError::UnexpectedEndOfStream));
    }

    #[tokio::test]
    async fn empty_message_is_immediately_done() {
        let wire = framed(&[]).await;
        let mut src = wire.as_slice();
        let mut body = ChunkReader::new(&mut src, 64);
        let mut out = Vec::new();
        assert_eq!(body.read_to_end(&mut out).await.unwrap(), 0);
        assert!(body.is_done());
    }

    #[tokio::test]
    async fn oversized_chunk_fails_without_data() {
        let wire = framed(&[b"ok", &[9u8; 100]]).await;
        let mut src = wire.as_slice();
        let mut body = ChunkReader::new(&mut src, 16);

        let mut first = [0u8; 16];
        assert_eq!(body.read(&mut first).await.unwrap(), 2);

        let mut second = [0u8; 16];
        let err = body.read(&mut second).await.unwrap_err();
        assert!(matches!(LoomError::from(err), LoomError::MalformedFrame(_)));
        assert_eq!(second, [0u8; 16]);
        assert_eq!(body.delivered(), 2);

        // A handler that keeps reading must not see a retryable error.
        let again = body.read(&mut second).await.unwrap_err();
        assert_eq!(again.kind(), io::ErrorKind::InvalidData);
        assert!(matches!(LoomError::from(again), LoomError::MalformedFrame(_)));
        assert!(matches!(body.drain().await, Err(LoomError::MalformedFrame(_))));
    }

    #[tokio::test]
    async fn truncation_is_reported_again_on_later_reads() {
        let mut wire = framed(&[b"abc"]).await;
        wire.pop();
        let mut src = wire.as_slice();
        let mut body = ChunkReader::new(&mut src, 64);

        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap_err();
        let err = body.read(&mut [0u8; 4]).await.unwrap_err();
        assert!(matches!(LoomError::from(err), LoomError::UnexpectedEndOfStream));
    }

    #[tokio::test]
    async fn drain_leaves_cursor_at_next_frame() {
        let mut wire = framed(&[b"ignored", b"entirely"]).await;
        write_message_header(&mut wire, b"next", 0, 9).await.unwrap();

        let mut src = wire.as_slice();
        let mut body = ChunkReader::new(&mut src, 64);
        assert_eq!(body.drain().await.unwrap(), 15);
        assert!(body.is_done());

        let header = read_message_header(&mut src, 16).await.unwrap();
        assert_eq!(header.key, b"next");
        assert_eq!(header.msg_id, 9);
    }

    #[tokio::test]
    async fn drain_after_partial_read() {
        let wire = framed(&[b"abcdef", b"ghi"]).await;
        let mut src = wire.as_slice();
        let mut body = ChunkReader::new(&mut src, 64);

        let mut two = [0u8; 2];
        body.read_exact(&mut two).await.unwrap();
        assert_eq!(body.drain().await.unwrap(), 7);
        assert!(src.is_empty());
    }
}
