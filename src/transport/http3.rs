//! HTTP/3 duplex tunnel.
//!
//! A single `POST /stream` request carries the outbound byte stream as its
//! body and the inbound byte stream as its response body. The request body
//! is fed from a [`duplex::pipe`] drained by a background pump; the response
//! body is forwarded into a second pipe that serves as the read half.

use std::io;

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::config::ClientOptions;
use crate::protocol::error::{LoomError, Result};
use crate::protocol::handshake::{Hello, Role};
use crate::protocol::{ALPN_H3, TUNNEL_PATH};
use crate::transport::duplex::{self, BufSink};
use crate::transport::{handshake, quic, Connection};

pub async fn connect(options: &ClientOptions, hello: &Hello) -> Result<Connection> {
    let (endpoint, connection) = quic::dial(options, ALPN_H3).await?;

    let (mut driver, mut send_request) = h3::client::new(h3_quinn::Connection::new(connection.clone()))
        .await
        .map_err(LoomError::rejected)?;
    let driver_task = tokio::spawn(async move {
        let err = std::future::poll_fn(|cx| driver.poll_close(cx)).await;
        debug!("HTTP/3 connection closed: {:?}", err);
    });

    let uri = format!("https://{}{}", options.address, TUNNEL_PATH);
    let request = http::Request::builder()
        .method(http::Method::POST)
        .uri(uri.as_str())
        .body(())
        .map_err(|e| LoomError::InvalidConfig(format!("bad tunnel request {}: {}", uri, e)))?;

    let stream = send_request
        .send_request(request)
        .await
        .map_err(LoomError::rejected)?;
    let (send, mut recv) = stream.split();
    debug!("Sent POST {}", uri);

    let (out_writer, out_reader) = duplex::pipe();
    let outbound_pump = tokio::spawn(async move {
        let mut body = RequestBody(send);
        match out_reader.drain_into(&mut body).await {
            Ok(total) => debug!("Request body finished after {} bytes", total),
            Err(e) => warn!("Request body aborted: {}", e),
        }
    });

    let (mut in_writer, in_reader) = duplex::pipe();
    let (status_tx, status_rx) = oneshot::channel::<Result<()>>();
    let inbound_task = tokio::spawn(async move {
        // Holding the request sender keeps the HTTP/3 connection open.
        let _client = send_request;

        let response = match recv.recv_response().await {
            Ok(response) => response,
            Err(e) => {
                warn!("No response to tunnel request: {}", e);
                in_writer.complete(Some(io::Error::other(e.to_string())));
                let _ = status_tx.send(Err(LoomError::rejected(e)));
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!("Tunnel request rejected with status {}", status);
            in_writer.complete(Some(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("HTTP status {}", status),
            )));
            let _ = status_tx.send(Err(LoomError::rejected(format!("HTTP status {}", status))));
            return;
        }
        let _ = status_tx.send(Ok(()));

        loop {
            match recv.recv_data().await {
                Ok(Some(mut data)) => {
                    let bytes = data.copy_to_bytes(data.remaining());
                    let bytes_len = bytes.len();
                    if bytes_len == 0 {
                        continue;
                    }
                    // Keep reading after the reader is gone: the end of the
                    // response is what a graceful close waits for.
                    if in_writer.push(bytes).is_err() {
                        trace!("Dropping {} response bytes", bytes_len);
                    }
                }
                Ok(None) => {
                    in_writer.complete(None);
                    return;
                }
                Err(e) => {
                    in_writer.complete(Some(io::Error::other(e.to_string())));
                    return;
                }
            }
        }
    });

    let mut conn = Connection::from_io(in_reader, out_writer)
        .with_quic(endpoint, connection)
        .with_tasks(outbound_pump, inbound_task, driver_task);

    handshake(&mut conn, hello).await?;

    // Producers do not wait for response headers; a server may withhold
    // them until the first message arrives.
    if hello.role == Role::Consumer {
        match status_rx.await {
            Ok(Ok(())) => info!("HTTP/3 tunnel accepted"),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(LoomError::rejected("tunnel closed before response headers")),
        }
    }

    Ok(conn)
}

/// Send half of the tunnel request.
struct RequestBody(h3::client::RequestStream<h3_quinn::SendStream<Bytes>, Bytes>);

#[async_trait]
impl BufSink for RequestBody {
    async fn send_buf(&mut self, buf: Bytes) -> io::Result<()> {
        self.0.send_data(buf).await.map_err(|e| io::Error::other(e.to_string()))
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.0.finish().await.map_err(|e| io::Error::other(e.to_string()))
    }
}
