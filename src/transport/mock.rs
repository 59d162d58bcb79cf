//! In-memory connectors for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

use crate::protocol::error::{LoomError, Result};
use crate::protocol::handshake::{read_hello, write_hello, Hello};
use crate::transport::{Connection, Connector};
use crate::utils::cancel::CancelToken;

/// Hands out one queued duplex stream per connect; the test keeps the
/// server ends. Fails with `TransportRejected` once the queue is empty.
pub(crate) struct MemoryConnector {
    streams: Mutex<VecDeque<DuplexStream>>,
    attempts: Arc<AtomicU32>,
}

impl MemoryConnector {
    pub(crate) fn new(count: usize) -> (Self, Vec<DuplexStream>) {
        let mut clients = VecDeque::new();
        let mut servers = Vec::new();
        for _ in 0..count {
            let (client, server) = tokio::io::duplex(256 * 1024);
            clients.push_back(client);
            servers.push(server);
        }
        let connector = Self {
            streams: Mutex::new(clients),
            attempts: Arc::new(AtomicU32::new(0)),
        };
        (connector, servers)
    }

    pub(crate) fn attempts(&self) -> Arc<AtomicU32> {
        self.attempts.clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, hello: &Hello, _cancel: &CancelToken) -> Result<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let stream = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LoomError::rejected("no more streams"))?;
        let (rx, tx) = tokio::io::split(stream);
        let mut conn = Connection::from_io(rx, tx);
        write_hello(conn.writer()?, hello).await?;
        Ok(conn)
    }
}

/// Fails every connect with the error produced by `make_error`.
pub(crate) struct FailingConnector {
    make_error: fn() -> LoomError,
    attempts: Arc<AtomicU32>,
}

impl FailingConnector {
    pub(crate) fn new(make_error: fn() -> LoomError) -> Self {
        Self {
            make_error,
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub(crate) fn attempts(&self) -> Arc<AtomicU32> {
        self.attempts.clone()
    }
}

#[async_trait]
impl Connector for FailingConnector {
    async fn connect(&self, _hello: &Hello, _cancel: &CancelToken) -> Result<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err((self.make_error)())
    }
}

/// Split a server end and consume the client's Hello.
pub(crate) async fn accept(server: DuplexStream) -> (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>, Hello) {
    let (mut rx, tx) = tokio::io::split(server);
    let hello = read_hello(&mut rx).await.unwrap();
    (rx, tx, hello)
}
