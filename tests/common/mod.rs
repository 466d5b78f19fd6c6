#![allow(dead_code)]

use std::io::{BufRead, BufReader};
use std::net::SocketAddr;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Every variable the portal reads, cleared so the host environment never
/// leaks into a test.
const PORTAL_ENV: &[&str] = &[
    "DB_USER",
    "DB_PASSWORD",
    "DB_HOST",
    "DB_PORT",
    "DB_NAME",
    "DB_POOL_SIZE",
    "DB_MAX_OVERFLOW",
    "DB_ACQUIRE_TIMEOUT_SECS",
    "PORTAL_LISTEN",
    "PORTAL_CACHE_TTL_SECS",
    "PORTAL_TABLE_QUERY",
    "PORTAL_MAP_QUERY",
    "PORTAL_TARGET_TABLE",
    "PORTAL_SOURCE_CRS",
];

pub struct ServerGuard {
    child: Child,
    stderr_thread: Option<thread::JoinHandle<()>>,
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
    }
}

pub fn portal_command(envs: &[(&str, &str)]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_data-portal"));
    cmd.args(["--listen", "127.0.0.1:0"]);
    for name in PORTAL_ENV {
        cmd.env_remove(name);
    }
    cmd.envs(envs.iter().copied());
    cmd
}

pub fn spawn_server(envs: &[(&str, &str)]) -> anyhow::Result<(ServerGuard, SocketAddr)> {
    let mut child = portal_command(envs)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("failed to capture server stderr"))?;

    let (addr_tx, addr_rx) = mpsc::channel::<SocketAddr>();
    let stderr_thread = thread::spawn(move || {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        while reader
            .read_line(&mut line)
            .ok()
            .filter(|n| *n > 0)
            .is_some()
        {
            if let Some(rest) = line.strip_prefix("data-portal listening on ") {
                if let Ok(addr) = rest.trim().parse::<SocketAddr>() {
                    let _ = addr_tx.send(addr);
                }
            }
            eprint!("{}", line); // Relay output
            line.clear();
        }
    });

    let addr = match addr_rx.recv_timeout(Duration::from_secs(10)) {
        Ok(addr) => addr,
        Err(err) => {
            if let Some(status) = child.try_wait()? {
                anyhow::bail!("server exited before reporting listen address: {status} ({err})");
            }
            anyhow::bail!("timed out waiting for server listen address: {err}");
        }
    };

    Ok((
        ServerGuard {
            child,
            stderr_thread: Some(stderr_thread),
        },
        addr,
    ))
}

pub fn client() -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .cookie_store(true)
        .timeout(Duration::from_secs(15))
        .build()?)
}

pub fn get_json(
    client: &reqwest::blocking::Client,
    addr: SocketAddr,
    path: &str,
) -> anyhow::Result<serde_json::Value> {
    let res = client.get(format!("http://{addr}{path}")).send()?;
    anyhow::ensure!(res.status().is_success(), "GET {path}: {}", res.status());
    Ok(res.json()?)
}

pub fn post_json(
    client: &reqwest::blocking::Client,
    addr: SocketAddr,
    path: &str,
    body: &serde_json::Value,
) -> anyhow::Result<(reqwest::StatusCode, serde_json::Value)> {
    let res = client
        .post(format!("http://{addr}{path}"))
        .json(body)
        .send()?;
    let status = res.status();
    Ok((status, res.json()?))
}
