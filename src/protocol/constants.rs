//! Protocol constants for Loom network communication

/// LOOM protocol magic bytes: "LOOM"
pub const LOOM_MAGIC: [u8; 4] = *b"LOOM";

/// Current protocol version, sent as a single byte in Hello
pub const PROTOCOL_VERSION: u8 = 4;

/// Role bytes
pub const ROLE_PRODUCER: u8 = b'P';
pub const ROLE_CONSUMER: u8 = b'C';

/// Frame type marker preceding an Ack's msg id
pub const FRAME_ACK: u64 = 1;

/// ALPN identifier for the native QUIC transport
pub const ALPN_LOOM: &[u8] = b"loom/1";

/// ALPN identifier for the HTTP/3 tunnel
pub const ALPN_H3: &[u8] = b"h3";

/// Request path of the HTTP/3 tunnel
pub const TUNNEL_PATH: &str = "/stream";

/// Longest LEB128 encoding of a u64
pub const MAX_VARINT_LEN: usize = 10;
