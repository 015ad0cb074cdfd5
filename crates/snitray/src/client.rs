use std::process::Stdio;

use crate::{
    daemon_response::DaemonResponse,
    ipc_server::RESPONSE_TIMEOUT,
    opts::{self, ActionClientOnly},
    SnitrayPaths,
};
use anyhow::{Context, Result};
use std::{
    io::{BufRead, BufReader, Read, Write},
    os::unix::net::UnixStream,
};

pub fn handle_client_only_action(paths: &SnitrayPaths, action: ActionClientOnly) -> Result<()> {
    match action {
        ActionClientOnly::Logs => {
            std::process::Command::new("tail")
                .args(["-f", paths.get_log_file().to_string_lossy().as_ref()].iter())
                .stdin(Stdio::null())
                .spawn()?
                .wait()?;
        }
    }
    Ok(())
}

fn send_action(stream: &mut UnixStream, action: &opts::ActionWithServer) -> Result<()> {
    log::debug!("Forwarding options to server");
    stream.set_nonblocking(false).context("Failed to set stream to blocking")?;

    let message_bytes = bincode::serialize(&action)?;

    stream.write_all(&(message_bytes.len() as u32).to_be_bytes()).context("Failed to send command size header to IPC stream")?;

    stream.write_all(&message_bytes).context("Failed to write command to IPC stream")?;
    Ok(())
}

/// Connect to the daemon and send the given request.
/// Returns the response from the daemon, or None if the daemon did not provide any useful response. An Ok(None) response does _not_ indicate failure.
pub fn do_server_call(stream: &mut UnixStream, action: &opts::ActionWithServer) -> Result<Option<DaemonResponse>> {
    send_action(stream, action)?;

    let mut buf = Vec::new();
    stream.set_read_timeout(Some(RESPONSE_TIMEOUT)).context("Failed to set read timeout")?;
    stream.read_to_end(&mut buf).context("Error reading response from server")?;

    Ok(if buf.is_empty() {
        None
    } else {
        let buf = bincode::deserialize(&buf)?;
        Some(buf)
    })
}

/// Send a `listen` action and copy the JSON lines the daemon sends to stdout until it goes away.
pub fn listen(mut stream: UnixStream, action: &opts::ActionWithServer) -> Result<()> {
    send_action(&mut stream, action)?;
    let stdout = std::io::stdout();
    for line in BufReader::new(stream).lines() {
        let line = line.context("Error reading from server")?;
        let mut out = stdout.lock();
        writeln!(out, "{}", line)?;
        out.flush()?;
    }
    Ok(())
}
