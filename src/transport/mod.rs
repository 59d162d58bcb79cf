//! Byte-stream transports.
//!
//! Everything above this module talks to a [`Connection`]: a buffered read
//! half and a buffered write half. Whether those halves are a native QUIC
//! stream or an HTTP/3 request/response tunnel is decided here.

pub mod duplex;
#[cfg(feature = "http3")]
pub mod http3;
#[cfg(test)]
pub(crate) mod mock;
pub mod quic;
pub mod tls;

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{ClientOptions, TransportKind};
use crate::protocol::error::{LoomError, Result};
use crate::protocol::handshake::{write_hello, Hello, Role};
use crate::utils::cancel::CancelToken;
use crate::utils::limits::{PUMP_DRAIN_TIMEOUT_MS, STREAM_BUFFER_SIZE};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub type ConnReader = BufReader<BoxedReader>;
pub type ConnWriter = BufWriter<BoxedWriter>;

/// One live, exclusively owned bidirectional byte stream.
pub struct Connection {
    reader: Option<ConnReader>,
    writer: Option<ConnWriter>,
    /// Forwards queued outbound bytes to the network (HTTP/3 only).
    outbound_pump: Option<JoinHandle<()>>,
    /// Awaits the response and forwards its body (HTTP/3 only).
    inbound_task: Option<JoinHandle<()>>,
    /// Drives the HTTP/3 client connection.
    driver: Option<JoinHandle<()>>,
    quic: Option<(quinn::Endpoint, quinn::Connection)>,
}

impl Connection {
    /// Wrap arbitrary halves, e.g. an in-memory duplex or a custom tunnel.
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Some(BufReader::with_capacity(STREAM_BUFFER_SIZE, Box::new(reader) as BoxedReader)),
            writer: Some(BufWriter::with_capacity(STREAM_BUFFER_SIZE, Box::new(writer) as BoxedWriter)),
            outbound_pump: None,
            inbound_task: None,
            driver: None,
            quic: None,
        }
    }

    pub(crate) fn with_quic(mut self, endpoint: quinn::Endpoint, connection: quinn::Connection) -> Self {
        self.quic = Some((endpoint, connection));
        self
    }

    #[cfg(feature = "http3")]
    pub(crate) fn with_tasks(
        mut self,
        outbound_pump: JoinHandle<()>,
        inbound_task: JoinHandle<()>,
        driver: JoinHandle<()>,
    ) -> Self {
        self.outbound_pump = Some(outbound_pump);
        self.inbound_task = Some(inbound_task);
        self.driver = Some(driver);
        self
    }

    pub fn reader(&mut self) -> Result<&mut ConnReader> {
        self.reader.as_mut().ok_or(LoomError::NotConnected)
    }

    pub fn writer(&mut self) -> Result<&mut ConnWriter> {
        self.writer.as_mut().ok_or(LoomError::NotConnected)
    }

    /// Both halves at once, for loops that read frames and write acks.
    pub fn halves(&mut self) -> Result<(&mut ConnReader, &mut ConnWriter)> {
        match (self.reader.as_mut(), self.writer.as_mut()) {
            (Some(r), Some(w)) => Ok((r, w)),
            _ => Err(LoomError::NotConnected),
        }
    }

    /// Move the read half out, e.g. into a background ack reader.
    pub fn take_reader(&mut self) -> Option<ConnReader> {
        self.reader.take()
    }

    /// Tear down in order: write half (completing any duplex pipe), outbound
    /// pump, pending response, client handle, stream halves, QUIC connection.
    ///
    /// Every step tolerates resources that are already gone.
    pub async fn close(&mut self) {
        let wait = Duration::from_millis(PUMP_DRAIN_TIMEOUT_MS);

        if let Some(mut writer) = self.writer.take() {
            match tokio::time::timeout(wait, writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Write half shutdown failed: {}", e),
                Err(_) => debug!("Peer did not finish reading in {:?}", wait),
            }
        }

        if let Some(mut pump) = self.outbound_pump.take() {
            if tokio::time::timeout(wait, &mut pump).await.is_err() {
                debug!("Outbound pump did not finish in {:?}, aborting", wait);
                pump.abort();
            }
        }

        // The request sender lives in the inbound task and dropping it closes
        // the connection, so let the peer end its response first. A server
        // ends it once it has read the request body.
        if let Some(mut inbound) = self.inbound_task.take() {
            let connection = self.quic.as_ref().map(|(_, connection)| connection.clone());
            let ended = async {
                match connection {
                    Some(connection) => tokio::select! {
                        _ = &mut inbound => {}
                        _ = connection.closed() => {}
                    },
                    None => {
                        let _ = (&mut inbound).await;
                    }
                }
            };
            if tokio::time::timeout(wait, ended).await.is_err() {
                debug!("Response did not end in {:?}", wait);
            }
            inbound.abort();
        }

        if let Some(driver) = self.driver.take() {
            driver.abort();
        }

        self.reader = None;

        if let Some((endpoint, connection)) = self.quic.take() {
            connection.close(0u32.into(), b"done");
            endpoint.close(0u32.into(), b"done");
        }

        debug!("Connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in [self.outbound_pump.take(), self.inbound_task.take(), self.driver.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
        if let Some((_, connection)) = self.quic.take() {
            connection.close(0u32.into(), b"dropped");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("has_reader", &self.reader.is_some())
            .field("has_writer", &self.writer.is_some())
            .field("quic", &self.quic.as_ref().map(|(_, c)| c.remote_address()))
            .finish()
    }
}

/// Establishes a transport and performs the Hello handshake on it.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, hello: &Hello, cancel: &CancelToken) -> Result<Connection>;
}

/// Production connector choosing QUIC or HTTP/3 from [`ClientOptions`].
#[derive(Debug, Clone)]
pub struct TransportConnector {
    options: ClientOptions,
}

impl TransportConnector {
    pub fn new(options: ClientOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Connector for TransportConnector {
    async fn connect(&self, hello: &Hello, cancel: &CancelToken) -> Result<Connection> {
        self.options.validate()?;
        info!(
            "Connecting to {} over {:?} as {:?} (room={})",
            self.options.address, self.options.transport, hello.role, hello.room
        );

        match self.options.transport {
            TransportKind::Quic => cancel.run(quic::connect(&self.options, hello)).await,
            #[cfg(feature = "http3")]
            TransportKind::Http3 => cancel.run(http3::connect(&self.options, hello)).await,
            #[cfg(not(feature = "http3"))]
            TransportKind::Http3 => Err(LoomError::PlatformUnsupported(
                "built without the http3 feature".into(),
            )),
        }
    }
}

/// Hello for `role` with the identity in `options`.
pub fn hello_for(options: &ClientOptions, role: Role) -> Hello {
    Hello::new(role, options.name.clone(), options.room.clone(), options.token.clone())
}

/// Write the Hello on a fresh connection.
pub(crate) async fn handshake(conn: &mut Connection, hello: &Hello) -> Result<()> {
    write_hello(conn.writer()?, hello).await?;
    info!("Handshake written ({:?})", hello.role);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::handshake::read_hello;

    #[tokio::test]
    async fn handshake_goes_through_buffered_writer() {
        let (local, remote) = tokio::io::duplex(1024);
        let (local_rx, local_tx) = tokio::io::split(local);
        let mut conn = Connection::from_io(local_rx, local_tx);

        let hello = Hello::new(Role::Consumer, "c1", "lobby", "secret");
        handshake(&mut conn, &hello).await.unwrap();

        let (mut remote_rx, _remote_tx) = tokio::io::split(remote);
        assert_eq!(read_hello(&mut remote_rx).await.unwrap(), hello);
        conn.close().await;
        assert!(matches!(conn.writer(), Err(LoomError::NotConnected)));
    }

    #[tokio::test]
    async fn invalid_options_fail_before_dialing() {
        let connector = TransportConnector::new(ClientOptions::new(""));
        let hello = hello_for(&ClientOptions::default(), Role::Producer);
        let err = connector.connect(&hello, &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, LoomError::InvalidConfig(_)));
    }
}
