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
    protocol::{Handshake, MessageReader, Role, TERMINATE_KEYWORD, Topic, is_terminate, write_line},
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut reader, mut writer) = establish_connection(&args).await?;
    let handshake = Handshake::new(args.role, args.topic.clone());
    write_line(&mut writer, &handshake.encode())
        .await
        .context("failed to send handshake")?;
    write_stdout(&format!(
        "*** connected as {} on topic {}",
        handshake.role, handshake.topic
    ))
    .await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    run_client_loop(&handshake, &mut reader, &mut writer, &mut stdin, &mut input).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(
    args: &ClientArgs,
) -> Result<(MessageReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect((args.server_ip.as_str(), args.server_port))
        .await
        .with_context(|| {
            format!(
                "failed to connect to {}:{}; is the server running?",
                args.server_ip, args.server_port
            )
        })?;

    info!("connected to {}:{}", args.server_ip, args.server_port);

    let (reader, writer) = stream.into_split();
    Ok((MessageReader::new(reader), writer))
}

async fn run_client_loop(
    handshake: &Handshake,
    reader: &mut MessageReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
) -> Result<()> {
    loop {
        input.clear();
        select! {
            server_message = reader.next_message() => {
                if !handle_server_message(server_message).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, handshake, writer).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_message(message: io::Result<Option<String>>) -> Result<bool> {
    match message? {
        Some(message) => {
            write_stdout(&format!("[RECEIVED] {}", message.trim())).await?;
            Ok(true)
        }
        None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    handshake: &Handshake,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim_end_matches(['\r', '\n']);
    if text.trim().is_empty() {
        return Ok(true);
    }

    if is_terminate(text) {
        write_line(writer, TERMINATE_KEYWORD).await?;
        write_stdout("*** disconnecting").await?;
        return Ok(false);
    }

    write_line(writer, &outgoing_message(handshake.role, &handshake.topic, text)).await?;
    Ok(true)
}

/// Publishers address every line to their own topic; subscribers send it as-is.
fn outgoing_message(role: Role, topic: &Topic, text: &str) -> String {
    match role {
        Role::Publisher => format!("{topic}:{text}"),
        Role::Subscriber => text.to_string(),
    }
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
