use crate::{
    app::{self, Flow},
    application_lifecycle, config, error_handling_ctx, ipc_server, watcher_process::WatcherProcess, SnitrayPaths,
};
use anyhow::{Context, Result};

use sni_host::names;
use std::{os::unix::io::AsRawFd, path::Path};
use tokio::sync::mpsc::*;
use zbus::export::ordered_stream::OrderedStreamExt;

pub fn initialize_server(paths: SnitrayPaths, should_daemonize: bool) -> Result<ForkResult> {
    log::info!("Loading paths: {}", &paths);

    let config = match config::read_from_file(paths.get_config_file()) {
        Ok(config) => config,
        Err(err) => {
            error_handling_ctx::print_error(err);
            config::SnitrayConfig::default()
        }
    };

    if should_daemonize {
        let fork_result = do_detach(paths.get_log_file())?;

        if fork_result == ForkResult::Parent {
            return Ok(ForkResult::Parent);
        }
    }

    println!(
        r#"
┏━━━━━━━━━━━━━━━━━━━━━━━━━━━┓
┃Initializing snitray daemon┃
┗━━━━━━━━━━━━━━━━━━━━━━━━━━━┛
    "#
    );

    application_lifecycle::exit_on_signals("snitray daemon");

    // everything runs on this one thread, so the host's state is never touched concurrently
    let rt = tokio::runtime::Builder::new_current_thread()
        .thread_name("snitray-daemon")
        .enable_all()
        .build()
        .context("Failed to initialize tokio runtime")?;
    let result = rt.block_on(run_daemon(&paths, config));

    let _ = std::fs::remove_file(paths.get_ipc_socket_file());
    result?;
    log::info!("daemon finished");

    Ok(ForkResult::Child)
}

async fn run_daemon(paths: &SnitrayPaths, config: config::SnitrayConfig) -> Result<()> {
    let (evt_send, mut evt_recv) = unbounded_channel();

    let ipc_server_join_handle = {
        let socket = paths.get_ipc_socket_file().to_path_buf();
        tokio::spawn(async move {
            let result = ipc_server::run_server(evt_send, socket).await;
            crate::print_result_err!("running the IPC server", result);
        })
    };

    let con = zbus::Connection::session().await.context("Failed to connect to the session bus")?;

    let watcher = if config.spawn_watcher { WatcherProcess::spawn().map_err(|e| log::error!("{:?}", e)).ok() } else { None };

    let host_name = sni_host::claim_host_name(&con).await.context("Failed to claim a StatusNotifierHost name")?;
    log::info!("Running as {}", host_name);
    let snw = sni_host::proxy::StatusNotifierWatcherProxy::new(&con).await?;
    let (host, mut item_events) = sni_host::Host::new(con.clone(), config.host_config());

    let mut app = app::App { host, snw, host_name, config, watcher };

    // subscribe before checking for the watcher, so that it can't slip through in between
    let dbus = zbus::fdo::DBusProxy::new(&con).await?;
    let mut watcher_owner_changes = dbus.receive_name_owner_changed_with_args(&[(0, names::WATCHER_BUS)]).await?;
    let mut watcher_events = sni_host::watcher_events(&app.snw).await?;

    if dbus.name_has_owner(names::WATCHER_BUS.try_into()?).await? {
        app.handle_watcher_owner_change(true).await;
    } else {
        log::info!("Waiting for {} to appear", names::WATCHER_BUS);
    }

    crate::loop_select_exiting! {
        Some(command) = evt_recv.recv() => {
            if app.handle_command(command).await == Flow::Exit {
                break;
            }
        },
        Some(event) = item_events.recv() => app.host.handle_item_event(event),
        Some(event) = watcher_events.next() => {
            if let Some(event) = event {
                app.handle_watcher_event(event).await;
            }
        },
        Some(change) = watcher_owner_changes.next() => match change.args() {
            Ok(args) => app.handle_watcher_owner_change(args.new_owner().is_some()).await,
            Err(e) => log::warn!("malformed NameOwnerChanged: {}", e),
        },
        else => break,
    }

    app.shutdown().await;
    ipc_server_join_handle.abort();
    Ok(())
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ForkResult {
    Parent,
    Child,
}

/// detach the process from the terminal, also redirecting stdout and stderr to LOG_FILE
fn do_detach(log_file_path: impl AsRef<Path>) -> Result<ForkResult> {
    // detach from terminal
    match unsafe { nix::unistd::fork()? } {
        nix::unistd::ForkResult::Child => {
            nix::unistd::setsid()?;
            match unsafe { nix::unistd::fork()? } {
                nix::unistd::ForkResult::Parent { .. } => std::process::exit(0),
                nix::unistd::ForkResult::Child => {}
            }
        }
        nix::unistd::ForkResult::Parent { .. } => {
            return Ok(ForkResult::Parent);
        }
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file_path)
        .with_context(|| format!("Error opening log file ({}), for writing", log_file_path.as_ref().display()))?;
    let fd = file.as_raw_fd();

    if nix::unistd::isatty(1)? {
        nix::unistd::dup2(fd, std::io::stdout().as_raw_fd())?;
    }
    if nix::unistd::isatty(2)? {
        nix::unistd::dup2(fd, std::io::stderr().as_raw_fd())?;
    }

    Ok(ForkResult::Child)
}
