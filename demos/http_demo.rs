//! Minimal HTTP/1.1 reference transport: replies to any request with a body
//! naming the worker that handled it, for exercising round-robin routing
//! end to end. Not a general-purpose HTTP server: request parsing is just
//! enough to find the blank line terminating the headers.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use clusterd::{role, BindMode, Cluster, ClusterConfig, ConnectionCounter, Transport};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(about = "HTTP/1.1 demo transport for the cluster balancer")]
struct Args {
    #[arg(long, default_value_t = 8080)]
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

struct HttpTransport {
    port: u16,
    counter: ConnectionCounter,
    worker_id: u32,
}

impl HttpTransport {
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
impl Transport for HttpTransport {
    fn port(&self) -> u16 {
        self.port
    }

    fn is_permanent_connection(&self) -> bool {
        false
    }

    fn connection_counter(&self) -> &ConnectionCounter {
        &self.counter
    }

    async fn start(&self, _mode: BindMode) -> Result<()> {
        // The master owns the listening socket in cluster mode; nothing to
        // bind here.
        Ok(())
    }

    async fn handle_connection(&self, mut socket: TcpStream, _remote_addr: SocketAddr) {
        let (reader, mut writer) = socket.split();
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.is_empty() => break,
                Ok(Some(_)) => continue,
                _ => return,
            }
        }

        let body = format!("handled by worker {}\n", self.worker_id);
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = writer.write_all(response.as_bytes()).await;
        let _ = writer.shutdown().await;
    }

    async fn closed(&self) {
        // This demo never closes its own server voluntarily; only process
        // shutdown (SIGINT/SIGTERM) ends it.
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = clusterd::logging::init(args.verbose, args.log_file.as_deref(), args.quiet);

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(args.port));
    let config = if args.workers > 0 {
        ClusterConfig::with_workers(args.workers)
    } else {
        ClusterConfig::default()
    };

    Cluster::new(transport, config).run().await
}
