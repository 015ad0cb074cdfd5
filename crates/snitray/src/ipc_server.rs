use crate::{app, opts, sink::JsonSink, util::truncate_for_log};
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::mpsc::*,
};

/// How long a client waits for the daemon to answer. Opening a menu is a round trip to the item.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound for the size of a single client message.
const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

pub async fn run_server<P: AsRef<std::path::Path>>(evt_send: UnboundedSender<app::DaemonCommand>, socket_path: P) -> Result<()> {
    let socket_path = socket_path.as_ref();
    let listener = { tokio::net::UnixListener::bind(socket_path)? };
    log::info!("IPC server initialized");
    crate::loop_select_exiting! {
        connection = listener.accept() => match connection {
            Ok((stream, _addr)) => {
                let evt_send = evt_send.clone();
                tokio::spawn(async move {
                    let result = handle_connection(stream, evt_send.clone()).await;
                    crate::print_result_err!("while handling IPC connection with client", result);
                });
            },
            Err(e) => eprintln!("Failed to connect to client: {:?}", e),
        }
    }
    Ok(())
}

/// Handle a single IPC connection from start to end.
async fn handle_connection(mut stream: tokio::net::UnixStream, evt_send: UnboundedSender<app::DaemonCommand>) -> Result<()> {
    let (mut stream_read, mut stream_write) = stream.split();

    let action: opts::ActionWithServer = read_action_from_stream(&mut stream_read).await?;

    log::debug!("received command from IPC: {:?}", &action);

    if let opts::ActionWithServer::Listen { format } = action {
        let (lines_send, mut lines_recv) = unbounded_channel();
        evt_send.send(app::DaemonCommand::AttachSink(Box::new(JsonSink::new(format, lines_send))))?;
        // the client never sends anything after its action, so any read result means it hung up
        let mut hangup_probe = [0u8; 1];
        loop {
            tokio::select! {
                line = lines_recv.recv() => match line {
                    Some(line) => {
                        if let Err(e) = stream_write.write_all(format!("{}\n", line).as_bytes()).await {
                            log::debug!("listen client went away: {}", e);
                            break;
                        }
                    }
                    None => break,
                },
                _ = stream_read.read(&mut hangup_probe) => {
                    log::debug!("listen client hung up");
                    break;
                }
            }
        }
        return Ok(());
    }

    let (command, maybe_response_recv) = action.into_daemon_command();

    evt_send.send(command)?;

    if let Some(mut response_recv) = maybe_response_recv {
        log::debug!("Waiting for response for IPC client");
        if let Ok(Some(response)) = tokio::time::timeout(RESPONSE_TIMEOUT, response_recv.recv()).await {
            log::debug!("responding with {}", truncate_for_log(&response.to_string(), 80));
            let response = bincode::serialize(&response)?;
            let result = &stream_write.write_all(&response).await;
            crate::print_result_err!("sending text response to ipc client", &result);
        }
    }
    stream_write.shutdown().await?;
    Ok(())
}

/// Read a single message from a unix stream, and parses it into a `ActionWithServer`
/// The format here requires the first 4 bytes to be the size of the rest of the message (in big-endian), followed by the rest of the message.
async fn read_action_from_stream(stream_read: &'_ mut tokio::net::unix::ReadHalf<'_>) -> Result<opts::ActionWithServer> {
    let mut message_byte_length = [0u8; 4];
    stream_read.read_exact(&mut message_byte_length).await.context("Failed to read message size header in IPC message")?;
    let message_byte_length = u32::from_be_bytes(message_byte_length);
    if message_byte_length > MAX_MESSAGE_SIZE {
        anyhow::bail!("IPC message of {} bytes exceeds the limit of {} bytes", message_byte_length, MAX_MESSAGE_SIZE);
    }
    let mut raw_message = Vec::<u8>::with_capacity(message_byte_length as usize);
    while raw_message.len() < message_byte_length as usize {
        if stream_read.read_buf(&mut raw_message).await.context("Failed to read actual IPC message")? == 0 {
            anyhow::bail!("IPC client hung up after {} of {} bytes", raw_message.len(), message_byte_length);
        }
    }

    bincode::deserialize(&raw_message).context("Failed to parse client message")
}

#[cfg(test)]
mod test {
    use super::*;

    async fn read_from(bytes: Vec<u8>) -> Result<opts::ActionWithServer> {
        let (mut client, mut server) = tokio::net::UnixStream::pair()?;
        client.write_all(&bytes).await?;
        drop(client);
        let (mut stream_read, _stream_write) = server.split();
        read_action_from_stream(&mut stream_read).await
    }

    #[tokio::test]
    async fn test_read_action() {
        let message = bincode::serialize(&opts::ActionWithServer::ListItems).unwrap();
        let mut bytes = (message.len() as u32).to_be_bytes().to_vec();
        bytes.extend(message);
        assert_eq!(read_from(bytes).await.unwrap(), opts::ActionWithServer::ListItems);
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let err = read_from(u32::MAX.to_be_bytes().to_vec()).await.unwrap_err();
        assert!(err.to_string().contains("exceeds the limit"), "{}", err);
    }

    #[tokio::test]
    async fn test_truncated_message_is_rejected() {
        let mut bytes = 16u32.to_be_bytes().to_vec();
        bytes.extend([0u8; 4]);
        assert!(read_from(bytes).await.is_err());
    }
}
