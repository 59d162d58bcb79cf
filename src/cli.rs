use clap::{Parser, Subcommand};

use loom::config::{ClientOptions, TransportKind};

#[derive(Parser)]
#[command(name = "loom")]
#[command(about = "Loom producer and consumer client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Config file path")]
    pub config: Option<String>,

    #[arg(long, help = "Server address host:port (overrides config)")]
    pub address: Option<String>,

    #[arg(long, help = "Transport: quic or http3 (overrides config)")]
    pub transport: Option<TransportKind>,

    #[arg(long, help = "Room to join (overrides config)")]
    pub room: Option<String>,

    #[arg(long, help = "Client name (overrides config)")]
    pub name: Option<String>,

    #[arg(long, help = "Auth token (overrides config)")]
    pub token: Option<String>,

    #[arg(
        long,
        help = "Skip server certificate verification. DEVELOPMENT ONLY: anyone can impersonate the server"
    )]
    pub insecure: bool,

    #[arg(long, help = "Output as JSON")]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send one message, reading the payload from a file or stdin
    Produce {
        #[arg(long, help = "Message key")]
        key: String,
        #[arg(long, help = "Payload file (defaults to stdin)")]
        file: Option<String>,
        #[arg(long, help = "Advisory payload size (defaults to the file size)")]
        declared_size: Option<u64>,
        #[arg(long, help = "Wait for the server to acknowledge the message")]
        wait_ack: bool,
    },
    /// Receive messages until interrupted
    Consume {
        #[arg(long, help = "Stop after this many messages")]
        max_messages: Option<u64>,
    },
    /// Write a default config file
    GenerateConfig {
        #[arg(long, default_value = "loom.toml", help = "Config file path")]
        output: String,
    },
}

impl Cli {
    /// Apply command-line overrides on top of the loaded options.
    pub fn apply(&self, options: &mut ClientOptions) {
        if let Some(address) = &self.address {
            options.address = address.clone();
        }
        if let Some(transport) = self.transport {
            options.transport = transport;
        }
        if let Some(room) = &self.room {
            options.room = room.clone();
        }
        if let Some(name) = &self.name {
            options.name = name.clone();
        }
        if let Some(token) = &self.token {
            options.token = token.clone();
        }
        if self.insecure {
            options.tls.insecure_skip_verify = true;
        }
    }
}
