use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, trace};

use crate::protocol::error::{LoomError, Result};
use crate::protocol::{LOOM_MAGIC, PROTOCOL_VERSION, ROLE_CONSUMER, ROLE_PRODUCER};
use crate::utils::io::read_exact;
use crate::utils::varint::{encode_varint, read_uvarint};

/// Upper bound on each Hello string when parsing, independent of frame limits.
const MAX_HELLO_FIELD: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Producer,
    Consumer,
}

impl Role {
    pub fn as_byte(self) -> u8 {
        match self {
            Role::Producer => ROLE_PRODUCER,
            Role::Consumer => ROLE_CONSUMER,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            ROLE_PRODUCER => Some(Role::Producer),
            ROLE_CONSUMER => Some(Role::Consumer),
            _ => None,
        }
    }
}

/// Connection handshake, sent once before any message frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub role: Role,
    pub name: String,
    pub room: String,
    pub token: String,
}

impl Hello {
    pub fn new(role: Role, name: impl Into<String>, room: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            role,
            name: name.into(),
            room: room.into(),
            token: token.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(6 + 3 + self.name.len() + self.room.len() + self.token.len());
        buf.extend_from_slice(&LOOM_MAGIC);
        buf.push(PROTOCOL_VERSION);
        buf.push(self.role.as_byte());
        for field in [&self.name, &self.room, &self.token] {
            encode_varint(field.len() as u64, &mut buf);
            buf.extend_from_slice(field.as_bytes());
        }

        debug!("Encoded hello: role={:?}, name={}, room={}", self.role, self.name, self.room);
        trace!("Hello bytes: {:?}", buf);

        buf
    }

    /// Parse a Hello from the start of a stream.
    pub async fn read<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut prefix = [0u8; 6];
        reader.read_exact(&mut prefix).await?;
        trace!("Raw hello prefix: {:?}", prefix);

        if prefix[0..4] != LOOM_MAGIC {
            error!("Invalid magic bytes: {:?}, expected {:?}", &prefix[0..4], LOOM_MAGIC);
            return Err(LoomError::malformed("invalid protocol magic"));
        }
        if prefix[4] != PROTOCOL_VERSION {
            error!("Unsupported version: {}, expected {}", prefix[4], PROTOCOL_VERSION);
            return Err(LoomError::malformed(format!("unsupported protocol version {}", prefix[4])));
        }
        let role = Role::from_byte(prefix[5])
            .ok_or_else(|| LoomError::malformed(format!("unknown role byte {:#04x}", prefix[5])))?;

        let name = read_string(reader).await?;
        let room = read_string(reader).await?;
        let token = read_string(reader).await?;

        debug!("Decoded hello: role={:?}, name={}, room={}", role, name, room);
        Ok(Self { role, name, room, token })
    }
}

async fn read_string<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> Result<String> {
    let len = read_uvarint(reader).await?;
    if len > MAX_HELLO_FIELD {
        return Err(LoomError::malformed(format!("hello field too long: {}", len)));
    }
    let bytes = read_exact(reader, len as usize).await?;
    String::from_utf8(bytes).map_err(|_| LoomError::malformed("hello field is not utf-8"))
}

/// Write the Hello frame and flush.
pub async fn write_hello<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W, hello: &Hello) -> Result<()> {
    debug!("Writing hello");

    writer.write_all(&hello.encode()).await?;
    writer.flush().await?;

    debug!("Hello written successfully");
    Ok(())
}

pub async fn read_hello<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> Result<Hello> {
    Hello::read(reader).await
}
