use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use tokio::io::AsyncWrite;
use tracing::{debug, info};

use crate::config::ClientOptions;
use crate::protocol::error::{LoomError, Result};
use crate::protocol::handshake::Hello;
use crate::protocol::ALPN_LOOM;
use crate::transport::{handshake, tls, Connection};

/// Resolve `options.address` to the first usable socket address.
pub(crate) async fn resolve(options: &ClientOptions) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host(options.address.as_str())
        .await
        .map_err(|e| LoomError::rejected(format!("cannot resolve {}: {}", options.address, e)))?;
    addrs
        .next()
        .ok_or_else(|| LoomError::rejected(format!("no addresses for {}", options.address)))
}

/// Open a QUIC client connection to `options.address` with the given ALPN.
pub(crate) async fn dial(options: &ClientOptions, alpn: &[u8]) -> Result<(quinn::Endpoint, quinn::Connection)> {
    let remote = resolve(options).await?;
    let server_name = options.server_name();

    let tls_config = tls::client_config(&options.tls, alpn)?;
    let quic_config = quinn::crypto::rustls::QuicClientConfig::try_from(tls_config)
        .map_err(|e| LoomError::InvalidConfig(format!("tls config unusable for QUIC: {}", e)))?;

    let bind: SocketAddr = if remote.is_ipv6() {
        SocketAddr::from(([0u16; 8], 0))
    } else {
        SocketAddr::from(([0u8; 4], 0))
    };
    let mut endpoint = quinn::Endpoint::client(bind).map_err(|e| match e.kind() {
        io::ErrorKind::Unsupported => LoomError::PlatformUnsupported(format!("QUIC endpoint: {}", e)),
        _ => LoomError::Io(e),
    })?;
    endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(quic_config)));

    debug!("Dialing {} (sni={})", remote, server_name);
    let connection = endpoint
        .connect(remote, &server_name)
        .map_err(LoomError::rejected)?
        .await
        .map_err(LoomError::rejected)?;

    info!("QUIC connection established to {}", connection.remote_address());
    Ok((endpoint, connection))
}

/// Native QUIC: one bidirectional stream serves as both halves.
pub async fn connect(options: &ClientOptions, hello: &Hello) -> Result<Connection> {
    let (endpoint, connection) = dial(options, ALPN_LOOM).await?;
    let (send, recv) = connection.open_bi().await.map_err(LoomError::rejected)?;
    debug!("Opened bidirectional stream {}", send.id());

    let mut conn = Connection::from_io(recv, SendHalf::new(send)).with_quic(endpoint, connection);
    handshake(&mut conn, hello).await?;
    Ok(conn)
}

/// Write half of the QUIC stream.
///
/// Shutdown finishes the stream and then waits until the peer has read it
/// to the end or stopped it, so closing the connection afterwards does not
/// discard bytes still in flight.
struct SendHalf {
    stream: Option<quinn::SendStream>,
    finishing: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
}

impl SendHalf {
    fn new(stream: quinn::SendStream) -> Self {
        Self {
            stream: Some(stream),
            finishing: None,
        }
    }
}

impl AsyncWrite for SendHalf {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut().stream.as_mut() {
            Some(stream) => AsyncWrite::poll_write(Pin::new(stream), cx, buf),
            None => Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream already finished"))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stream.as_mut() {
            Some(stream) => AsyncWrite::poll_flush(Pin::new(stream), cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(mut stream) = this.stream.take() {
            if let Err(e) = stream.finish() {
                debug!("Stream finish failed: {}", e);
            }
            this.finishing = Some(Box::pin(async move {
                let _ = stream.stopped().await;
            }));
        }
        if let Some(finishing) = this.finishing.as_mut() {
            ready!(finishing.as_mut().poll(cx));
            this.finishing = None;
        }
        Poll::Ready(Ok(()))
    }
}
