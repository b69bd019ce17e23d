//! Spawns the `http_demo` binary as a real master process and drives real
//! TCP clients against it, verifying round-robin routing and the logging
//! stack end to end by spawning a real process and asserting over real
//! sockets rather than mocks.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::io::{Read, Write};
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

fn http_get(port: u16) -> Result<String> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).context("connecting")?;
    stream.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")?;
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    Ok(response)
}

fn response_body(response: &str) -> &str {
    response.split("\r\n\r\n").nth(1).unwrap_or("").trim()
}

#[test]
fn round_robin_spreads_requests_across_workers_and_logs_to_file() -> Result<()> {
    let port = 20_801;
    let log_dir = tempfile::tempdir().context("creating temp log directory")?;
    let log_path = log_dir.path().join("http_demo.log");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_http_demo"));
    cmd.args([
        "--port",
        &port.to_string(),
        "--workers",
        "3",
        "--quiet",
        "--log-file",
        log_path.to_str().unwrap(),
    ])
    .stdout(Stdio::null())
    .stderr(Stdio::null());
    let child = ChildGuard(cmd.spawn().context("spawning http_demo")?);

    wait_for_port(port, Duration::from_secs(5))?;

    let mut worker_ids: HashSet<String> = HashSet::new();
    for _ in 0..9 {
        let response = http_get(port)?;
        worker_ids.insert(response_body(&response).to_string());
    }
    assert!(
        worker_ids.len() > 1,
        "expected requests spread across multiple workers, saw {worker_ids:?}"
    );

    // The rolling file appender names files with a date suffix; just check
    // the directory received at least one log file.
    let wrote_a_log_file = std::fs::read_dir(log_dir.path())
        .context("reading log directory")?
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().starts_with("http_demo.log"));
    assert!(wrote_a_log_file, "expected a rolling log file under {log_dir:?}");

    drop(child);
    Ok(())
}

#[test]
fn crashed_worker_is_respawned_and_serving_resumes() -> Result<()> {
    let port = 20_802;
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_http_demo"));
    cmd.args(["--port", &port.to_string(), "--workers", "1", "--quiet"])
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let child = ChildGuard(cmd.spawn().context("spawning http_demo")?);
    let master_pid = child.0.id();

    wait_for_port(port, Duration::from_secs(5))?;
    http_get(port).context("baseline request before killing the worker")?;

    let worker_pid = find_child_pid(master_pid).context("locating the sole worker's pid")?;
    Command::new("kill")
        .args(["-9", &worker_pid.to_string()])
        .status()
        .context("sending SIGKILL to worker")?;

    let start = Instant::now();
    loop {
        if http_get(port).is_ok() {
            break;
        }
        if start.elapsed() > Duration::from_secs(5) {
            panic!("master did not respawn a serving worker after its only worker was killed");
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    drop(child);
    Ok(())
}

fn find_child_pid(parent_pid: u32) -> Result<u32> {
    let start = Instant::now();
    loop {
        let output = Command::new("pgrep")
            .arg("-P")
            .arg(parent_pid.to_string())
            .output()
            .context("running pgrep")?;
        let text = String::from_utf8_lossy(&output.stdout);
        if let Some(pid) = text.lines().next() {
            if let Ok(pid) = pid.trim().parse() {
                return Ok(pid);
            }
        }
        if start.elapsed() > Duration::from_secs(5) {
            anyhow::bail!("no child of pid {parent_pid} appeared in time");
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}
