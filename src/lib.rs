//! Loom client library.
//!
//! Producers stream keyed, chunked messages into a room on a Loom server;
//! consumers receive them and acknowledge each one. Both run over native
//! QUIC or over an HTTP/3 request tunnel.

pub mod body;
pub mod config;
pub mod consumer;
pub mod producer;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use body::ChunkReader;
pub use config::{ClientConfig, ClientOptions, Limits, ReconnectOptions, TlsOptions, TransportKind};
pub use consumer::{Consumer, ConsumerState, MessageHandler};
pub use producer::Producer;
pub use protocol::error::{LoomError, Result};
pub use protocol::handshake::{Hello, Role};
pub use transport::{Connection, Connector, TransportConnector};
pub use utils::cancel::CancelToken;
