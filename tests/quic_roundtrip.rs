mod common;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use common::{client_options, server_endpoint};
use loom::protocol::frame::{
    read_ack, read_chunk, read_message_header, write_ack, write_chunk, write_end_of_message, write_message_header,
    Chunk,
};
use loom::protocol::handshake::read_hello;
use loom::protocol::ALPN_LOOM;
use loom::{CancelToken, Consumer, MessageHandler, Producer, Role, TransportKind};

async fn accept_stream(endpoint: &quinn::Endpoint) -> (quinn::Connection, quinn::SendStream, quinn::RecvStream) {
    let connection = endpoint.accept().await.unwrap().await.unwrap();
    let (send, recv) = connection.accept_bi().await.unwrap();
    (connection, send, recv)
}

#[tokio::test]
async fn producer_delivers_chunked_message_over_quic() {
    let (endpoint, addr) = server_endpoint(ALPN_LOOM);

    let server = tokio::spawn(async move {
        let (connection, mut send, mut recv) = accept_stream(&endpoint).await;
        let hello = read_hello(&mut recv).await.unwrap();
        assert_eq!(hello.role, Role::Producer);
        assert_eq!(hello.name, "producer-1");
        assert_eq!(hello.room, "integration");

        let header = read_message_header(&mut recv, 256).await.unwrap();
        let mut chunk_lens = Vec::new();
        let mut payload = Vec::new();
        while let Chunk::Data(data) = read_chunk(&mut recv, 64 * 1024).await.unwrap() {
            chunk_lens.push(data.len());
            payload.extend_from_slice(&data);
        }
        write_ack(&mut send, header.msg_id).await.unwrap();
        send.finish().unwrap();

        // Keep the connection until the producer hangs up.
        drop(recv);
        connection.closed().await;
        (header, chunk_lens, payload)
    });

    let payload: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
    let cancel = CancelToken::new();
    let mut producer = Producer::new(client_options(addr, "producer-1", TransportKind::Quic));
    producer.connect(&cancel).await.unwrap();
    let msg_id = producer
        .send(b"sensor/42", payload.as_slice(), payload.len() as u64, &cancel)
        .await
        .unwrap();
    producer.wait_for_ack(msg_id, &cancel).await.unwrap();
    assert_eq!(producer.last_acked(), Some(msg_id));
    producer.close().await;

    let (header, chunk_lens, received) = server.await.unwrap();
    assert_eq!(header.key, b"sensor/42");
    assert_eq!(header.declared_size, 2500);
    assert_eq!(header.msg_id, msg_id);
    assert_eq!(chunk_lens, vec![1024, 1024, 452]);
    assert_eq!(received, payload);
}

/// Collects one message and then ends the loop.
#[derive(Default)]
struct CollectOne {
    received: Option<(Vec<u8>, Vec<u8>, u64)>,
}

#[async_trait]
impl MessageHandler for CollectOne {
    async fn on_message(
        &mut self,
        key: &[u8],
        body: &mut (dyn AsyncRead + Send + Unpin),
        declared_size: u64,
    ) -> anyhow::Result<()> {
        let mut data = Vec::new();
        body.read_to_end(&mut data).await?;
        self.received = Some((key.to_vec(), data, declared_size));
        Ok(())
    }

    fn finished(&self) -> bool {
        self.received.is_some()
    }
}

#[tokio::test]
async fn consumer_receives_and_acks_over_quic() {
    let (endpoint, addr) = server_endpoint(ALPN_LOOM);

    let server = tokio::spawn(async move {
        let (connection, mut send, mut recv) = accept_stream(&endpoint).await;
        let hello = read_hello(&mut recv).await.unwrap();
        assert_eq!(hello.role, Role::Consumer);

        write_message_header(&mut send, b"greeting", 11, 7).await.unwrap();
        write_chunk(&mut send, b"hello ").await.unwrap();
        write_chunk(&mut send, b"world").await.unwrap();
        write_end_of_message(&mut send).await.unwrap();
        send.flush().await.unwrap();

        let acked = read_ack(&mut recv).await.unwrap();
        send.finish().unwrap();
        drop(recv);
        connection.closed().await;
        acked
    });

    let mut consumer = Consumer::new(client_options(addr, "consumer-1", TransportKind::Quic));
    let mut handler = CollectOne::default();
    consumer.consume_loop(&mut handler, &CancelToken::new()).await.unwrap();

    assert_eq!(server.await.unwrap(), 7);
    let (key, body, declared_size) = handler.received.unwrap();
    assert_eq!(key, b"greeting");
    assert_eq!(body, b"hello world");
    assert_eq!(declared_size, 11);
}
