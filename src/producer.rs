use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::config::ClientOptions;
use crate::protocol::error::{LoomError, Result};
use crate::protocol::frame::{read_ack, write_chunk, write_end_of_message, write_message_header};
use crate::protocol::handshake::Role;
use crate::transport::{hello_for, ConnReader, Connection, Connector, TransportConnector};
use crate::utils::cancel::CancelToken;
use crate::utils::io::read_full;

/// Sends keyed messages into a room.
///
/// Holds at most one live connection. Message ids increase monotonically
/// across reconnects, starting at 1; acks reported by the server are
/// tracked but never waited on while sending.
pub struct Producer<C: Connector = TransportConnector> {
    options: ClientOptions,
    connector: C,
    conn: Option<Connection>,
    next_msg_id: u64,
    acks: Arc<watch::Sender<AckState>>,
    ack_reader: Option<JoinHandle<()>>,
}

impl Producer<TransportConnector> {
    pub fn new(options: ClientOptions) -> Self {
        let connector = TransportConnector::new(options.clone());
        Self::with_connector(options, connector)
    }
}

impl<C: Connector> Producer<C> {
    pub fn with_connector(options: ClientOptions, connector: C) -> Self {
        let (acks, _) = watch::channel(AckState::default());
        Self {
            options,
            connector,
            conn: None,
            next_msg_id: 1,
            acks: Arc::new(acks),
            ack_reader: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Connect and send Hello. Does nothing if already connected.
    pub async fn connect(&mut self, cancel: &CancelToken) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let hello = hello_for(&self.options, Role::Producer);
        let mut conn = self.connector.connect(&hello, cancel).await?;

        if let Some(reader) = conn.take_reader() {
            self.acks.send_modify(|state| state.open = true);
            self.ack_reader = Some(spawn_ack_reader(reader, self.acks.clone()));
        }
        self.conn = Some(conn);
        info!("Producer connected (name={}, room={})", self.options.name, self.options.room);
        Ok(())
    }

    /// Send one message using the configured chunk size.
    pub async fn send<R>(&mut self, key: &[u8], payload: R, declared_size: u64, cancel: &CancelToken) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let chunk_size = self.options.limits.chunk_size;
        self.send_chunked(key, payload, declared_size, chunk_size, cancel).await
    }

    /// Stream `payload` as one message: header, chunks of at most
    /// `chunk_size` bytes, then the end-of-message sentinel.
    ///
    /// `declared_size` is advisory and need not match the bytes sent.
    /// Returns the message id carried in the header.
    pub async fn send_chunked<R>(
        &mut self,
        key: &[u8],
        mut payload: R,
        declared_size: u64,
        chunk_size: usize,
        cancel: &CancelToken,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let conn = self.conn.as_mut().ok_or(LoomError::NotConnected)?;
        if key.is_empty() {
            return Err(LoomError::malformed("message key must not be empty"));
        }
        if chunk_size == 0 {
            return Err(LoomError::InvalidConfig("chunk_size must be positive".into()));
        }

        let msg_id = self.next_msg_id;
        self.next_msg_id += 1;
        let writer = conn.writer()?;

        cancel
            .run(async {
                write_message_header(writer, key, declared_size, msg_id).await?;

                let mut buf = vec![0u8; chunk_size];
                let mut total = 0u64;
                let mut chunks = 0u64;
                loop {
                    let n = read_full(&mut payload, &mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    write_chunk(writer, &buf[..n]).await?;
                    total += n as u64;
                    chunks += 1;
                    trace!("msg {}: chunk {} ({} bytes)", msg_id, chunks, n);
                    if n < chunk_size {
                        break;
                    }
                }

                write_end_of_message(writer).await?;
                writer.flush().await?;
                debug!("Sent msg {}: {} bytes in {} chunks (declared {})", msg_id, total, chunks, declared_size);
                Ok(())
            })
            .await?;

        Ok(msg_id)
    }

    /// Highest message id acknowledged so far, if any.
    pub fn last_acked(&self) -> Option<u64> {
        match self.acks.borrow().highest {
            0 => None,
            id => Some(id),
        }
    }

    /// Wait until the server reports an ack at or beyond `msg_id`.
    ///
    /// Fails with `NotConnected` if the ack stream ends, or was never
    /// open, before that ack arrives.
    pub async fn wait_for_ack(&self, msg_id: u64, cancel: &CancelToken) -> Result<()> {
        let mut rx = self.acks.subscribe();
        cancel
            .run(async move {
                let acked = matches!(
                    rx.wait_for(|state| state.highest >= msg_id || !state.open).await,
                    Ok(state) if state.highest >= msg_id
                );
                if acked {
                    Ok(())
                } else {
                    Err(LoomError::NotConnected)
                }
            })
            .await
    }

    /// Tear down the connection. Pending acks are not awaited.
    pub async fn close(&mut self) {
        if let Some(task) = self.ack_reader.take() {
            task.abort();
        }
        self.acks.send_modify(|state| state.open = false);
        if let Some(mut conn) = self.conn.take() {
            conn.close().await;
            info!("Producer disconnected");
        }
    }
}

impl<C: Connector> Drop for Producer<C> {
    fn drop(&mut self) {
        if let Some(task) = self.ack_reader.take() {
            task.abort();
        }
    }
}

/// What the ack reader has seen on the current connection.
#[derive(Debug, Clone, Copy, Default)]
struct AckState {
    /// Highest acknowledged msg id; 0 before the first ack.
    highest: u64,
    /// Whether an ack reader is still running.
    open: bool,
}

fn spawn_ack_reader(mut reader: ConnReader, acks: Arc<watch::Sender<AckState>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match read_ack(&mut reader).await {
                Ok(msg_id) => {
                    trace!("Ack for msg {}", msg_id);
                    acks.send_if_modified(|state| {
                        if msg_id > state.highest {
                            state.highest = msg_id;
                            true
                        } else {
                            false
                        }
                    });
                }
                Err(LoomError::UnexpectedEndOfStream) => {
                    debug!("Ack stream closed");
                    break;
                }
                Err(e) => {
                    debug!("Ack reader stopped: {}", e);
                    break;
                }
            }
        }
        acks.send_modify(|state| state.open = false);
    })
}
