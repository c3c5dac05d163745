use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{anyhow, Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("room-chat");
    let history = tempfile::tempdir()?;

    let (mut server_child, mut server_stdout) = spawn_server(&binary, history.path()).await?;
    let addr = read_server_addr(&mut server_stdout).await?;

    // Drain additional server logs in the background so the pipe never fills.
    let server_log_task = tokio::spawn(async move {
        drain_stdout(server_stdout).await;
    });

    let mut alice = spawn_client(&binary, "alice", &addr).await?;
    alice.send_line("/users").await?;
    assert_eq!(
        read_line_expect(&mut alice.stdout, "waiting for alice roster").await?,
        "Users in room 'general': alice"
    );

    let mut bob = spawn_client(&binary, "bob", &addr).await?;
    bob.send_line("/users").await?;
    assert_eq!(
        read_line_expect(&mut bob.stdout, "waiting for bob roster").await?,
        "Users in room 'general': alice, bob"
    );

    // Alice greets Bob; the sender gets no echo.
    alice.send_line("Hello from Alice").await?;
    assert_eq!(
        read_line_expect(&mut bob.stdout, "waiting for bob to hear alice").await?,
        "alice: Hello from Alice"
    );

    bob.send_line("/quit").await.context("bob send quit")?;
    assert_eq!(
        read_line_expect(&mut bob.stdout, "waiting for bob farewell").await?,
        "Leaving chat..."
    );
    // Bob's client exits once the server has closed his session.
    ensure_success(&mut bob.child, "bob client").await?;

    alice.send_line("/users").await?;
    assert_eq!(
        read_line_expect(&mut alice.stdout, "waiting for alice roster after bob left").await?,
        "Users in room 'general': alice"
    );
    alice.send_line("/quit").await.context("alice send quit")?;
    assert_eq!(
        read_line_expect(&mut alice.stdout, "waiting for alice farewell").await?,
        "Leaving chat..."
    );

    ensure_success(&mut alice.child, "alice client").await?;

    let log = std::fs::read_to_string(history.path().join("history_general.txt"))?;
    assert_eq!(log, "alice: Hello from Alice\n");

    // The server stays up after clients disconnect; terminate it manually.
    let _ = server_child.kill().await;
    let _ = server_child.wait().await;
    let _ = server_log_task.await;

    Ok(())
}

struct ClientProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ClientProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }
}

async fn spawn_server(
    binary: &Path,
    history_dir: &Path,
) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("serve")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .arg("--history-dir")
        .arg(history_dir)
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().context("failed to spawn server")?;
    let stdout = child
        .stdout
        .take()
        .context("server stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

/// Skips startup logs until the listening banner and returns its address.
async fn read_server_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    loop {
        let line = read_line(reader)
            .await?
            .context("server exited before reporting its address")?;
        if !line.contains("listening on") {
            continue;
        }
        let addr = line
            .split_whitespace()
            .last()
            .context("unexpected server banner format")?;
        if !addr.contains(':') {
            return Err(anyhow!("server banner missing socket: {line}"));
        }
        return Ok(addr.to_string());
    }
}

async fn spawn_client(binary: &Path, name: &str, addr: &str) -> Result<ClientProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("connect")
        .arg("--name")
        .arg(name)
        .arg("--server")
        .arg(addr)
        .env("RUST_LOG", "off")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn client {name}"))?;

    let stdin = child
        .stdin
        .take()
        .context("client stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("client stdout missing after spawn")?;

    let mut process = ClientProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    };

    let prompt = read_line_expect(&mut process.stdout, "waiting for name prompt").await?;
    if prompt != "Enter your name:" {
        return Err(anyhow!("expected name prompt for {name}, got '{prompt}'"));
    }

    Ok(process)
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = timeout(READ_TIMEOUT, child.wait())
        .await
        .with_context(|| format!("timed out waiting for {name} to exit"))?
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
