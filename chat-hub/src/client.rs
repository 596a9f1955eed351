use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    message::{ClientToServer, ServerToClient, read_message, write_message},
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut reader, mut writer) = establish_connection(&args).await?;
    write_message(
        &mut writer,
        &ClientToServer::Hello {
            nickname: args.nickname.clone(),
        },
    )
    .await
    .context("failed to send hello")?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    run_client_loop(&mut reader, &mut writer, &mut stdin, &mut input).await?;
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }

    Ok(())
}

async fn establish_connection(args: &ClientArgs) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

async fn run_client_loop(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
) -> Result<()> {
    loop {
        input.clear();
        select! {
            server_message = read_message::<_, ServerToClient>(reader) => {
                if !handle_server_message(server_message).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, writer).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_message(message: io::Result<Option<ServerToClient>>) -> Result<bool> {
    match message? {
        Some(message) => {
            write_line(&render_server_message(&message), matches!(message, ServerToClient::Error { .. })).await?;
            Ok(true)
        }
        None => {
            write_line("*** server closed the connection", false).await?;
            Ok(false)
        }
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    if bytes_read? == 0 {
        return Ok(false);
    }

    let text = input.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_line("*** leaving chat", false).await?;
        return Ok(false);
    }

    write_message(
        writer,
        &ClientToServer::Chat {
            text: text.to_string(),
        },
    )
    .await?;
    Ok(true)
}

/// Terminal rendering of a server frame.
pub fn render_server_message(message: &ServerToClient) -> String {
    match message {
        ServerToClient::Welcome { nickname, .. } => format!("*** connected as {nickname}"),
        ServerToClient::Chat { sender, text } => format!("<{sender}> {text}"),
        ServerToClient::Error { message } => format!("!!! {message}"),
    }
}

async fn write_line(line: &str, to_stderr: bool) -> io::Result<()> {
    if to_stderr {
        let mut stderr = tokio::io::stderr();
        stderr.write_all(line.as_bytes()).await?;
        stderr.write_all(b"\n").await?;
        return stderr.flush().await;
    }
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
