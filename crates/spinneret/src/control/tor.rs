//! Tor control-port wire client and managed daemon bootstrap.
//!
//! Speaks the plain-text control protocol over TCP: `PROTOCOLINFO` /
//! `AUTHENTICATE` for the handshake, `EXTENDCIRCUIT 0` to request a new
//! circuit, `GETINFO circuit-status` for path metadata. Reply parsing is kept
//! in pure functions so it can be tested without a daemon.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};

use arachne_common::constants::{BOOTSTRAP_POLL_INTERVAL_MS, BOOTSTRAP_TIMEOUT_SECS};
use arachne_common::{ArachneError, CircuitId};

use super::{CircuitPath, ControlChannel};
use crate::config::TorConfig;

/// A parsed control-port reply: final status code plus all body lines.
#[derive(Debug)]
struct Reply {
    status: u16,
    lines: Vec<String>,
}

impl Reply {
    fn is_ok(&self) -> bool {
        self.status / 100 == 2
    }

    fn first_line(&self) -> String {
        self.lines.first().cloned().unwrap_or_default()
    }
}

/// Authenticated control-port connection to a Tor daemon.
pub struct TorControl {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    closed: bool,
}

impl TorControl {
    /// Connect to the control port on localhost, bounded by `connect_timeout`.
    pub async fn connect(
        control_port: u16,
        connect_timeout: Duration,
    ) -> Result<Self, ArachneError> {
        let addr = format!("127.0.0.1:{control_port}");

        let stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ArachneError::Timeout(format!("connecting to control port {addr}")))?
            .map_err(|e| ArachneError::ControlChannel(format!("connect {addr}: {e}")))?;

        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            closed: false,
        })
    }

    /// Send one command line and collect the complete reply.
    async fn command(&mut self, line: &str) -> Result<Reply, ArachneError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply, ArachneError> {
        let mut lines = Vec::new();

        loop {
            let line = self.read_line().await?;
            let (status, separator, body) = match (line.get(..3), line.as_bytes().get(3), line.get(4..)) {
                (Some(code), Some(&sep), Some(body)) => match code.parse::<u16>() {
                    Ok(status) => (status, sep, body),
                    Err(_) => {
                        return Err(ArachneError::ControlChannel(format!(
                            "malformed status code: {line:?}"
                        )));
                    }
                },
                _ => {
                    return Err(ArachneError::ControlChannel(format!(
                        "malformed control reply: {line:?}"
                    )));
                }
            };
            lines.push(body.to_string());

            match separator {
                // Mid-reply line; keep reading
                b'-' => {}
                // Data block, terminated by a lone "."
                b'+' => loop {
                    let data = self.read_line().await?;
                    if data == "." {
                        break;
                    }
                    lines.push(data);
                },
                // Final line
                b' ' => return Ok(Reply { status, lines }),
                _ => {
                    return Err(ArachneError::ControlChannel(format!(
                        "malformed control reply: {line:?}"
                    )));
                }
            }
        }
    }

    async fn read_line(&mut self) -> Result<String, ArachneError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(ArachneError::ControlChannel(
                "control connection closed by daemon".to_string(),
            ));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Build the AUTHENTICATE line for cookie auth, if the daemon offers it.
    async fn cookie_auth_line(&mut self) -> Result<Option<String>, ArachneError> {
        let reply = self.command("PROTOCOLINFO 1").await?;
        if !reply.is_ok() {
            return Ok(None);
        }

        let Some(path) = parse_cookie_file(&reply.lines) else {
            return Ok(None);
        };

        let cookie = tokio::fs::read(&path)
            .await
            .map_err(|e| ArachneError::Auth(format!("cookie file {path}: {e}")))?;

        Ok(Some(format!("AUTHENTICATE {}", to_hex(&cookie))))
    }

    /// Fetch entry/exit metadata for a circuit. Best-effort: a circuit that
    /// has not finished building yet has no path, and allocation does not
    /// depend on one.
    async fn circuit_path(&mut self, id: &str) -> Result<CircuitPath, ArachneError> {
        let reply = self.command("GETINFO circuit-status").await?;
        if !reply.is_ok() {
            return Ok(CircuitPath::default());
        }

        for line in &reply.lines {
            let line = line.strip_prefix("circuit-status=").unwrap_or(line);
            if line.split_whitespace().next() == Some(id) {
                return Ok(parse_path_line(line));
            }
        }

        Ok(CircuitPath::default())
    }
}

#[async_trait]
impl ControlChannel for TorControl {
    async fn authenticate(&mut self, credential: Option<&str>) -> Result<(), ArachneError> {
        let auth_line = match credential {
            Some(password) => format!("AUTHENTICATE \"{}\"", escape_credential(password)),
            None => match self.cookie_auth_line().await? {
                Some(line) => line,
                // No cookie advertised; try the null method
                None => "AUTHENTICATE".to_string(),
            },
        };

        let reply = self.command(&auth_line).await?;
        if !reply.is_ok() {
            return Err(ArachneError::Auth(reply.first_line()));
        }

        tracing::debug!("Control connection authenticated");
        Ok(())
    }

    async fn create_circuit(&mut self) -> Result<(CircuitId, CircuitPath), ArachneError> {
        let reply = self.command("EXTENDCIRCUIT 0").await?;
        if !reply.is_ok() {
            return Err(ArachneError::CircuitCreation(reply.first_line()));
        }

        let id = parse_extended(&reply.first_line()).ok_or_else(|| {
            ArachneError::CircuitCreation(format!("unexpected reply: {}", reply.first_line()))
        })?;

        let path = self.circuit_path(&id).await.unwrap_or_default();

        Ok((id, path))
    }

    async fn close(&mut self) -> Result<(), ArachneError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Best-effort goodbye; the daemon drops the connection either way
        let _ = self.command("QUIT").await;
        Ok(())
    }
}

/// Launch a managed tor daemon and wait for its control port to come up.
///
/// `MaxCircuitDirtiness` is set to the pool's circuit lifetime so the daemon
/// reclaims circuits the pool has already retired on its own schedule.
pub async fn bootstrap_daemon(tor: &TorConfig) -> Result<Child, ArachneError> {
    let mut cmd = Command::new("tor");
    cmd.arg("--SocksPort")
        .arg(tor.socks_port.to_string())
        .arg("--ControlPort")
        .arg(tor.control_port.to_string())
        .arg("--CookieAuthentication")
        .arg("1")
        .arg("--MaxCircuitDirtiness")
        .arg(tor.circuit_lifetime_secs.to_string())
        .arg("--MaxClientCircuitsPending")
        .arg(tor.max_circuits.to_string())
        .arg("--UseEntryGuards")
        .arg("1")
        .arg("--NumEntryGuards")
        .arg(tor.entry_guard_count.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| ArachneError::Bootstrap(format!("failed to spawn tor: {e}")))?;

    // Forward daemon output to the log
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "tor", "{line}");
            }
        });
    }

    wait_for_control_port(tor.control_port, Duration::from_secs(BOOTSTRAP_TIMEOUT_SECS)).await?;

    tracing::info!(control_port = tor.control_port, "Managed tor daemon is up");
    Ok(child)
}

async fn wait_for_control_port(port: u16, limit: Duration) -> Result<(), ArachneError> {
    let addr = format!("127.0.0.1:{port}");
    let deadline = tokio::time::Instant::now() + limit;

    loop {
        match TcpStream::connect(&addr).await {
            Ok(_) => return Ok(()),
            Err(e) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(ArachneError::Bootstrap(format!(
                        "control port {addr} not reachable within {}s: {e}",
                        limit.as_secs()
                    )));
                }
                sleep(Duration::from_millis(BOOTSTRAP_POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Extract the circuit id from an `EXTENDED <id>` reply body.
fn parse_extended(body: &str) -> Option<CircuitId> {
    let rest = body.strip_prefix("EXTENDED")?.trim_start();
    let id = rest.split_whitespace().next()?;
    (!id.is_empty()).then(|| id.to_string())
}

/// Parse entry/exit hops out of a circuit-status line, e.g.
/// `5 BUILT $AAAA~guard,$BBBB~middle,$CCCC~leaf PURPOSE=GENERAL`.
fn parse_path_line(line: &str) -> CircuitPath {
    for token in line.split_whitespace() {
        if token.starts_with('$') {
            let hops: Vec<&str> = token.split(',').collect();
            return CircuitPath {
                entry: hops.first().map(|h| hop_name(h)),
                exit: hops.last().map(|h| hop_name(h)),
            };
        }
    }
    CircuitPath::default()
}

/// `$FINGERPRINT~nickname` (or `=nickname`); the nickname is friendlier when
/// present, the fingerprint is the fallback.
fn hop_name(hop: &str) -> String {
    match hop.split_once(['~', '=']) {
        Some((_, nick)) if !nick.is_empty() => nick.to_string(),
        _ => hop.trim_start_matches('$').to_string(),
    }
}

/// Pull the COOKIEFILE path out of PROTOCOLINFO reply lines.
fn parse_cookie_file(lines: &[String]) -> Option<String> {
    for line in lines {
        if let Some(idx) = line.find("COOKIEFILE=\"") {
            let rest = &line[idx + "COOKIEFILE=\"".len()..];
            if let Some(end) = rest.find('"') {
                return Some(rest[..end].to_string());
            }
        }
    }
    None
}

fn escape_credential(password: &str) -> String {
    password.replace('\\', "\\\\").replace('"', "\\\"")
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}
