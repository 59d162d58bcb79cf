//! Push-to-pull byte pipe.
//!
//! The protocol writer pushes buffers through [`PipeWriter`]; a single drain
//! loop pulls them from [`PipeReader`] in FIFO order and forwards them to
//! whatever sink the transport provides (an HTTP/3 request body, or the read
//! half handed to the consumer).
//!
//! The queue is unbounded, so writes never wait on the drain side. One writer
//! and one reader per pipe.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tracing::trace;

type Item = io::Result<Bytes>;

pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        PipeWriter { tx: Some(tx) },
        PipeReader {
            rx,
            current: Bytes::new(),
            finished: false,
        },
    )
}

#[derive(Debug)]
pub struct PipeWriter {
    tx: Option<mpsc::UnboundedSender<Item>>,
}

impl PipeWriter {
    /// Queue a copy of `data`. Fails once the pipe is completed or the
    /// reader is gone.
    pub fn write(&self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.push(Bytes::copy_from_slice(data))
    }

    pub fn push(&self, data: Bytes) -> io::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "pipe completed"))?;
        tx.send(Ok(data))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader dropped"))
    }

    /// Close the pipe. Pending buffers still drain; if `error` is given the
    /// reader sees it after the last buffer instead of a clean end.
    pub fn complete(&mut self, error: Option<io::Error>) {
        if let Some(tx) = self.tx.take() {
            if let Some(err) = error {
                let _ = tx.send(Err(err));
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        self.tx.is_none()
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(PipeWriter::write(&self, buf).map(|()| buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.complete(None);
        Poll::Ready(Ok(()))
    }
}

#[derive(Debug)]
pub struct PipeReader {
    rx: mpsc::UnboundedReceiver<Item>,
    current: Bytes,
    finished: bool,
}

impl PipeReader {
    /// Next queued buffer, `None` once the pipe is completed and empty.
    pub async fn next_buf(&mut self) -> Option<io::Result<Bytes>> {
        if !self.current.is_empty() {
            return Some(Ok(std::mem::take(&mut self.current)));
        }
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(Err(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            None => {
                self.finished = true;
                None
            }
            item => item,
        }
    }

    /// Forward every buffer to `sink` in order, then finish it.
    ///
    /// A completion error ends the drain with that error and the sink is
    /// left unfinished.
    pub async fn drain_into<S: BufSink + ?Sized>(mut self, sink: &mut S) -> io::Result<u64> {
        let mut total = 0u64;
        while let Some(buf) = self.next_buf().await {
            let buf = buf?;
            let len = buf.len();
            sink.send_buf(buf).await?;
            total += len as u64;
            trace!("Pipe forwarded {} bytes", len);
        }
        sink.finish().await?;
        Ok(total)
    }
}

/// Destination of a pipe drain, e.g. an HTTP/3 request body.
#[async_trait]
pub trait BufSink: Send {
    async fn send_buf(&mut self, buf: Bytes) -> io::Result<()>;

    /// Signal that no more buffers follow.
    async fn finish(&mut self) -> io::Result<()>;
}

impl AsyncRead for PipeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.current.is_empty() {
                let n = out.remaining().min(self.current.len());
                out.put_slice(&self.current[..n]);
                self.current.advance(n);
                return Poll::Ready(Ok(()));
            }
            if self.finished {
                return Poll::Ready(Ok(()));
            }
            match ready!(self.rx.poll_recv(cx)) {
                Some(Ok(buf)) => self.current = buf,
                Some(Err(e)) => {
                    self.finished = true;
                    return Poll::Ready(Err(e));
                }
                None => self.finished = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Records every buffer it is handed.
    #[derive(Default)]
    struct Recorder {
        bufs: Vec<Bytes>,
        finished: bool,
    }

    #[async_trait]
    impl BufSink for Recorder {
        async fn send_buf(&mut self, buf: Bytes) -> io::Result<()> {
            assert!(!self.finished);
            self.bufs.push(buf);
            Ok(())
        }

        async fn finish(&mut self) -> io::Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn drain_preserves_write_order() {
        let (mut writer, reader) = pipe();
        let drainer = tokio::spawn(async move {
            let mut sink = Recorder::default();
            let total = reader.drain_into(&mut sink).await.unwrap();
            (sink, total)
        });

        for part in ["AA", "BB", "CC"] {
            writer.write_all(part.as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        writer.shutdown().await.unwrap();

        let (sink, total) = drainer.await.unwrap();
        assert_eq!(sink.bufs, vec![Bytes::from("AA"), Bytes::from("BB"), Bytes::from("CC")]);
        assert!(sink.finished);
        assert_eq!(total, 6);
    }

    #[tokio::test]
    async fn aborted_pipe_leaves_sink_unfinished() {
        let (mut writer, reader) = pipe();
        writer.write(b"partial").unwrap();
        writer.complete(Some(io::Error::new(io::ErrorKind::ConnectionAborted, "aborted")));

        let mut sink = Recorder::default();
        let err = reader.drain_into(&mut sink).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
        assert_eq!(sink.bufs, vec![Bytes::from("partial")]);
        assert!(!sink.finished);
    }

    #[tokio::test]
    async fn completion_error_surfaces_after_pending_buffers() {
        let (mut writer, mut reader) = pipe();
        writer.write(b"tail").unwrap();
        writer.complete(Some(io::Error::new(io::ErrorKind::ConnectionAborted, "aborted")));

        assert_eq!(&reader.next_buf().await.unwrap().unwrap()[..], b"tail");
        let err = reader.next_buf().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
        assert!(reader.next_buf().await.is_none());
    }

    #[tokio::test]
    async fn writes_after_complete_fail() {
        let (mut writer, _reader) = pipe();
        writer.complete(None);
        assert!(writer.is_completed());
        assert_eq!(writer.write(b"x").unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn read_side_serves_partial_buffers() {
        let (mut writer, mut reader) = pipe();
        writer.write(b"abcdef").unwrap();
        writer.complete(None);

        let mut first = [0u8; 4];
        reader.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"abcd");

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"ef");
    }
}
