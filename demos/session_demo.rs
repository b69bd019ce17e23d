//! Minimal long-lived line-protocol reference transport: stands in for a
//! WebSocket-style session server to exercise sticky routing. Echoes each
//! line back prefixed with the worker id that owns the connection; a
//! client sending `quit` ends its own session.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use clusterd::{role, BindMode, Cluster, ClusterConfig, ConnectionCounter, Transport};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(about = "Sticky session demo transport for the cluster balancer")]
struct Args {
    #[arg(long, default_value_t = 9090)]
    port: u16,

    /// Number of worker processes. 0 uses the host CPU count.
    #[arg(long, default_value_t = 0)]
    workers: usize,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(short, long)]
    quiet: bool,

    #[arg(long)]
    log_file: Option<String>,
}

struct SessionTransport {
    port: u16,
    counter: ConnectionCounter,
    worker_id: u32,
}

impl SessionTransport {
    fn new(port: u16) -> Self {
        let worker_id = std::env::var(role::UNIQUE_ID_VAR)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Self {
            port,
            counter: ConnectionCounter::new(),
            worker_id,
        }
    }
}

#[async_trait]
impl Transport for SessionTransport {
    fn port(&self) -> u16 {
        self.port
    }

    fn is_permanent_connection(&self) -> bool {
        true
    }

    fn connection_counter(&self) -> &ConnectionCounter {
        &self.counter
    }

    async fn start(&self, _mode: BindMode) -> Result<()> {
        Ok(())
    }

    async fn handle_connection(&self, socket: TcpStream, _remote_addr: SocketAddr) {
        let (reader, mut writer) = socket.into_split();
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim() == "quit" => break,
                Ok(Some(line)) => {
                    let reply = format!("worker {} echo: {}\n", self.worker_id, line);
                    if writer.write_all(reply.as_bytes()).await.is_err() {
                        break;
                    }
                }
                _ => break,
            }
        }
    }

    async fn closed(&self) {
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = clusterd::logging::init(args.verbose, args.log_file.as_deref(), args.quiet);

    let transport: Arc<dyn Transport> = Arc::new(SessionTransport::new(args.port));
    let config = if args.workers > 0 {
        ClusterConfig::with_workers(args.workers)
    } else {
        ClusterConfig::default()
    };

    Cluster::new(transport, config).run().await
}
