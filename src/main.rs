mod cli;

use async_trait::async_trait;
use clap::Parser;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use loom::config::{ClientConfig, ClientOptions};
use loom::{CancelToken, Consumer, MessageHandler, Producer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("loom=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::GenerateConfig { output } = &cli.command {
        let config = ClientConfig::default();
        config.save(output)?;
        if cli.json {
            println!("{}", serde_json::json!({"success": true, "config_file": output}));
        } else {
            println!("✅ Generated config file: {}", output);
        }
        return Ok(());
    }

    let mut config = ClientConfig::load_or_create(cli.config.as_deref())?;
    cli.apply(&mut config.client);
    let options = config.client;

    if options.tls.insecure_skip_verify {
        warn!("TLS certificate verification is disabled; use this for development only");
    }

    let cancel = CancelToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            ctrl_c.cancel();
        }
    });

    let result = match cli.command {
        Commands::Produce {
            key,
            file,
            declared_size,
            wait_ack,
        } => produce(options, &cancel, key, file, declared_size, wait_ack, cli.json).await,
        Commands::Consume { max_messages } => consume(options, &cancel, max_messages, cli.json).await,
        Commands::GenerateConfig { .. } => Ok(()),
    };

    if let Err(e) = &result {
        if cli.json {
            println!("{}", serde_json::json!({"error": e.to_string()}));
        } else {
            eprintln!("❌ {}", e);
        }
    }
    result
}

async fn produce(
    options: ClientOptions,
    cancel: &CancelToken,
    key: String,
    file: Option<String>,
    declared_size: Option<u64>,
    wait_ack: bool,
    json: bool,
) -> anyhow::Result<()> {
    let (payload, file_size): (Box<dyn AsyncRead + Send + Unpin>, u64) = match &file {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            let size = file.metadata().await?.len();
            (Box::new(file), size)
        }
        None => (Box::new(tokio::io::stdin()), 0),
    };
    let declared_size = declared_size.unwrap_or(file_size);

    let mut producer = Producer::new(options);
    producer.connect(cancel).await?;
    let msg_id = producer.send(key.as_bytes(), payload, declared_size, cancel).await?;
    if wait_ack {
        producer.wait_for_ack(msg_id, cancel).await?;
    }
    producer.close().await;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "success": true,
                "key": key,
                "msg_id": msg_id,
                "declared_size": declared_size,
                "acked": wait_ack
            })
        );
    } else {
        println!("📤 Sent message {} (key={})", msg_id, key);
        if wait_ack {
            println!("   Acknowledged by server");
        }
    }
    Ok(())
}

async fn consume(
    options: ClientOptions,
    cancel: &CancelToken,
    max_messages: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let mut handler = DigestPrinter {
        json,
        received: 0,
        max_messages,
    };

    let mut consumer = Consumer::new(options);
    consumer.consume_loop(&mut handler, cancel).await?;

    if !json {
        println!("📥 Received {} messages", handler.received);
    }
    Ok(())
}

/// Prints key, size and SHA-256 of every message body.
struct DigestPrinter {
    json: bool,
    received: u64,
    max_messages: Option<u64>,
}

#[async_trait]
impl MessageHandler for DigestPrinter {
    async fn on_message(
        &mut self,
        key: &[u8],
        body: &mut (dyn AsyncRead + Send + Unpin),
        declared_size: u64,
    ) -> anyhow::Result<()> {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 16 * 1024];
        let mut size = 0u64;
        loop {
            let n = body.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        let digest = hex::encode(hasher.finalize());
        let key = String::from_utf8_lossy(key);

        if self.json {
            println!(
                "{}",
                serde_json::json!({
                    "key": key,
                    "size": size,
                    "declared_size": declared_size,
                    "sha256": digest
                })
            );
        } else {
            println!("📦 {} ({} bytes) sha256={}", key, size, digest);
        }

        self.received += 1;
        Ok(())
    }

    fn finished(&self) -> bool {
        self.max_messages.is_some_and(|max| self.received >= max)
    }
}
