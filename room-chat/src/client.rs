use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    select,
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    cli::ConnectArgs,
    command::Command,
    wire::{read_terminated_line, write_line, Inbound},
};

/// Server lines carry a sender prefix on top of the client limit, so the
/// client accepts considerably more than it may send.
const SERVER_LINE_LIMIT: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq)]
enum LoopExit {
    ServerClosed,
    LocalExit,
}

/// Terminal client: sends the display name, then relays stdin lines to the
/// server and server lines to stdout until either side closes.
pub async fn run(args: ConnectArgs) -> Result<()> {
    let (reader, mut writer) = establish_connection(&args).await?;
    write_line(&mut writer, &args.name)
        .await
        .context("failed to send display name")?;

    let mut relay = tokio::spawn(relay_server_lines(reader));
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    let exit = run_client_loop(&mut relay, &mut writer, &mut stdin, &mut input).await?;
    shutdown_connection(&mut writer).await;

    // The server closes its side once it sees ours close; print whatever it
    // sent before that.
    if exit == LoopExit::LocalExit {
        relay.await.context("server relay task failed")??;
    }

    Ok(())
}

async fn establish_connection(
    args: &ConnectArgs,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

async fn relay_server_lines(mut reader: BufReader<OwnedReadHalf>) -> io::Result<()> {
    while let Some(inbound) = read_terminated_line(&mut reader, SERVER_LINE_LIMIT).await? {
        match inbound {
            Inbound::Line(line) => write_stdout(&line).await?,
            Inbound::TooLong => warn!("dropped an oversized line from the server"),
        }
    }
    Ok(())
}

async fn run_client_loop(
    relay: &mut JoinHandle<io::Result<()>>,
    writer: &mut OwnedWriteHalf,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
) -> Result<LoopExit> {
    loop {
        select! {
            finished = &mut *relay => {
                finished.context("server relay task failed")??;
                return Ok(LoopExit::ServerClosed);
            }
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, writer).await? {
                    return Ok(LoopExit::LocalExit);
                }
                input.clear();
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                return Ok(LoopExit::LocalExit);
            }
        }
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim_end_matches(['\r', '\n']);
    if text.is_empty() {
        return Ok(true);
    }

    write_line(writer, text).await?;

    // Stop reading stdin after a quit; the server answers with a farewell
    // line and closes, which ends the relay task.
    Ok(!matches!(Command::parse(text), Ok(Command::Quit)))
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
