use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tracing::{debug, error, info, trace, warn};

use crate::body::ChunkReader;
use crate::config::ClientOptions;
use crate::protocol::error::{LoomError, Result};
use crate::protocol::frame::{read_message_header, write_ack};
use crate::protocol::handshake::Role;
use crate::transport::{hello_for, Connection, Connector, TransportConnector};
use crate::utils::cancel::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    /// Connected, waiting for the next message header.
    Idle,
    /// A message body is being handed to the handler.
    Receiving,
    Terminated,
}

/// Receives each message delivered to a consumer.
///
/// `body` yields the payload and reports EOF at the end of the message.
/// The handler may stop reading early; whatever is left is discarded
/// before the message is acknowledged.
#[async_trait]
pub trait MessageHandler: Send {
    async fn on_message(
        &mut self,
        key: &[u8],
        body: &mut (dyn AsyncRead + Send + Unpin),
        declared_size: u64,
    ) -> anyhow::Result<()>;

    /// Checked before the first message and after each acknowledged one;
    /// `true` ends the consume loop with `Ok(())`.
    fn finished(&self) -> bool {
        false
    }
}

/// Subscribes to a room and acknowledges every message it receives.
pub struct Consumer<C: Connector = TransportConnector> {
    options: ClientOptions,
    connector: C,
    conn: Option<Connection>,
    state: ConsumerState,
}

impl Consumer<TransportConnector> {
    pub fn new(options: ClientOptions) -> Self {
        let connector = TransportConnector::new(options.clone());
        Self::with_connector(options, connector)
    }
}

impl<C: Connector> Consumer<C> {
    pub fn with_connector(options: ClientOptions, connector: C) -> Self {
        Self {
            options,
            connector,
            conn: None,
            state: ConsumerState::Disconnected,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Connect and send Hello. Does nothing if already connected.
    pub async fn connect(&mut self, cancel: &CancelToken) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        transition(&mut self.state, ConsumerState::Connecting);
        let hello = hello_for(&self.options, Role::Consumer);
        match self.connector.connect(&hello, cancel).await {
            Ok(conn) => {
                self.conn = Some(conn);
                transition(&mut self.state, ConsumerState::Idle);
                info!("Consumer connected (name={}, room={})", self.options.name, self.options.room);
                Ok(())
            }
            Err(e) => {
                transition(&mut self.state, ConsumerState::Disconnected);
                Err(e)
            }
        }
    }

    /// Receive messages until `cancel` fires or an error ends the loop.
    ///
    /// Connection-level failures are retried per the reconnect options.
    /// Cancellation or a finished handler returns `Ok(())`. Once the loop returns, the consumer
    /// is closed.
    pub async fn consume_loop<H>(&mut self, handler: &mut H, cancel: &CancelToken) -> Result<()>
    where
        H: MessageHandler + ?Sized,
    {
        let reconnect = self.options.reconnect.clone();
        let mut attempts: u32 = 0;

        loop {
            let err = match self.receive(handler, cancel, &mut attempts).await {
                Ok(()) => {
                    info!("Handler finished, consume loop stopped");
                    self.close().await;
                    return Ok(());
                }
                Err(err) => err,
            };

            if cancel.is_cancelled() {
                info!("Consume loop stopped");
                self.close().await;
                return Ok(());
            }

            if !err.is_reconnectable() {
                error!("Consume loop stopped: {}", err);
                self.close().await;
                return Err(err);
            }

            if !reconnect.auto_reconnect {
                warn!("Connection lost and auto-reconnect is off: {}", err);
                self.close().await;
                return Err(err);
            }

            attempts += 1;
            if reconnect.max_reconnect_attempts > 0 && attempts >= reconnect.max_reconnect_attempts {
                error!("Giving up after {} attempts: {}", attempts, err);
                self.close().await;
                return Err(err);
            }

            warn!(
                "Connection failed (attempt {}): {}; retrying in {:?}",
                attempts,
                err,
                reconnect.delay()
            );
            self.disconnect().await;
            if sleep(reconnect.delay(), cancel).await.is_err() {
                info!("Consume loop cancelled during reconnect delay");
                self.close().await;
                return Ok(());
            }
        }
    }

    /// One connection's worth of receiving.
    ///
    /// Returns `Ok(())` only once the handler reports it is finished; the
    /// connection ending for any other reason is an error.
    async fn receive<H>(&mut self, handler: &mut H, cancel: &CancelToken, attempts: &mut u32) -> Result<()>
    where
        H: MessageHandler + ?Sized,
    {
        if handler.finished() {
            return Ok(());
        }
        self.connect(cancel).await?;

        let max_key_bytes = self.options.limits.max_key_bytes;
        let max_chunk_bytes = self.options.limits.max_chunk_bytes;
        let state = &mut self.state;
        let (reader, writer) = self.conn.as_mut().ok_or(LoomError::NotConnected)?.halves()?;

        loop {
            transition(state, ConsumerState::Idle);
            if handler.finished() {
                return Ok(());
            }
            let header = cancel.run(read_message_header(reader, max_key_bytes)).await?;
            *attempts = 0;
            transition(state, ConsumerState::Receiving);
            debug!(
                "Message {} (key={} bytes, declared {} bytes)",
                header.msg_id,
                header.key.len(),
                header.declared_size
            );

            let mut body = ChunkReader::new(&mut *reader, max_chunk_bytes);
            cancel
                .run(async {
                    handler
                        .on_message(&header.key, &mut body, header.declared_size)
                        .await
                        .map_err(handler_error)
                })
                .await?;

            let drained = cancel.run(body.drain()).await?;
            if drained > 0 {
                trace!("Drained {} unread bytes of message {}", drained, header.msg_id);
            }

            cancel.run(write_ack(writer, header.msg_id)).await?;
            trace!("Acked message {}", header.msg_id);
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close().await;
        }
        transition(&mut self.state, ConsumerState::Disconnected);
    }

    /// Tear down the connection. The consumer may connect again later.
    pub async fn close(&mut self) {
        let was_connected = self.conn.is_some();
        self.disconnect().await;
        transition(&mut self.state, ConsumerState::Terminated);
        if was_connected {
            info!("Consumer disconnected");
        }
    }
}

fn transition(state: &mut ConsumerState, next: ConsumerState) {
    if *state != next {
        trace!("Consumer state {:?} -> {:?}", state, next);
        *state = next;
    }
}

/// Body read failures keep their protocol meaning; anything else is the
/// handler's own.
fn handler_error(err: anyhow::Error) -> LoomError {
    let err = match err.downcast::<LoomError>() {
        Ok(e) => return e,
        Err(err) => err,
    };
    match err.downcast::<io::Error>() {
        Ok(e) => LoomError::from(e),
        Err(err) => LoomError::Handler(err),
    }
}

async fn sleep(delay: Duration, cancel: &CancelToken) -> Result<()> {
    cancel
        .run(async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await
}
