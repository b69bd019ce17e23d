//! Spawns the `session_demo` binary and verifies sticky routing: every
//! connection from this test process shares the same remote address, so a
//! correct sticky policy must always land on the same worker.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

struct ChildGuard(Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn wait_for_port(port: u16, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return Ok(());
        }
        if start.elapsed() > timeout {
            anyhow::bail!("nothing listening on port {port} after {timeout:?}");
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn sticky_routes_every_connection_to_the_same_worker() -> Result<()> {
    let port = 20_901;
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_session_demo"));
    cmd.args(["--port", &port.to_string(), "--workers", "3", "--quiet"])
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let child = ChildGuard(cmd.spawn().context("spawning session_demo")?);

    wait_for_port(port, Duration::from_secs(5))?;

    let mut seen_workers: HashSet<String> = HashSet::new();
    for _ in 0..5 {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).context("connecting")?;
        stream.write_all(b"hello\n")?;
        let mut reader = BufReader::new(stream.try_clone().context("cloning stream")?);
        let mut line = String::new();
        reader.read_line(&mut line).context("reading echo reply")?;
        seen_workers.insert(line.trim().to_string());
        stream.write_all(b"quit\n")?;
    }

    assert_eq!(
        seen_workers.len(),
        1,
        "sticky routing should pick the same worker for every connection from \
         this address, saw {seen_workers:?}"
    );

    drop(child);
    Ok(())
}
