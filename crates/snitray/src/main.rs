use anyhow::{Context, Result};
use clap::CommandFactory as _;
use daemon_response::DaemonResponse;
use opts::ActionWithServer;
use paths::SnitrayPaths;
use std::{os::unix::net, path::Path, time::Duration};

mod app;
mod application_lifecycle;
mod client;
mod config;
mod daemon_response;
mod error_handling_ctx;
mod ipc_server;
mod opts;
mod paths;
mod server;
mod sink;
mod util;
mod watcher_process;

fn main() {
    let snitray_binary_name = std::env::args().next().unwrap_or_else(|| "snitray".to_owned());
    let opts: opts::Opt = opts::Opt::from_env();

    let log_level_filter = if opts.log_debug { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::init_timed();
    } else {
        pretty_env_logger::formatted_timed_builder()
            .filter(Some("snitray"), log_level_filter)
            .filter(Some("sni_host"), log_level_filter)
            .init();
    }

    let result = match opts.action {
        opts::Action::ShellCompletions { shell } => {
            clap_complete::generate(shell, &mut opts::RawOpt::command(), "snitray", &mut std::io::stdout());
            return;
        }
        opts::Action::Watcher => watcher_process::run(),
        _ => run(opts, snitray_binary_name),
    };

    if let Err(err) = result {
        error_handling_ctx::print_error(err);
        std::process::exit(1);
    }
}

fn run(opts: opts::Opt, snitray_binary_name: String) -> Result<()> {
    let paths = opts
        .config_path
        .map(SnitrayPaths::from_config_dir)
        .unwrap_or_else(SnitrayPaths::default)
        .context("Failed to initialize snitray paths")?;

    let should_restart = match &opts.action {
        opts::Action::Daemon | opts::Action::WithServer(_) => opts.restart,
        _ => false,
    };
    if should_restart {
        let response = handle_server_command(&paths, &ActionWithServer::KillServer, 1);
        if let Ok(Some(response)) = response {
            handle_daemon_response(response);
        }
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    match opts.action {
        opts::Action::ShellCompletions { .. } | opts::Action::Watcher => unreachable!(),
        opts::Action::ClientOnly(action) => {
            client::handle_client_only_action(&paths, action)?;
        }

        // make sure that there isn't already a snitray daemon running.
        opts::Action::Daemon if check_server_running(paths.get_ipc_socket_file()) => {
            eprintln!("snitray server already running.");
        }
        opts::Action::Daemon => {
            log::info!("Initializing snitray server. ({})", paths.get_ipc_socket_file().display());
            let _ = std::fs::remove_file(paths.get_ipc_socket_file());

            if !opts.no_daemonize {
                println!("Run `{} logs` to see what the daemon is doing.", snitray_binary_name);
            }
            let fork_result = server::initialize_server(paths, !opts.no_daemonize)?;
            log::debug!("daemon returned in {:?}", fork_result);
        }

        opts::Action::WithServer(ActionWithServer::KillServer) => {
            if let Some(response) = handle_server_command(&paths, &ActionWithServer::KillServer, 1)? {
                handle_daemon_response(response);
            }
        }

        opts::Action::WithServer(action @ ActionWithServer::Listen { .. }) => {
            let stream = attempt_connect(paths.get_ipc_socket_file(), 5)
                .with_context(|| format!("Failed to connect to daemon. Is `{} daemon` running?", snitray_binary_name))?;
            client::listen(stream, &action)?;
        }

        // a running daemon is necessary for this command
        opts::Action::WithServer(action) => {
            let response = handle_server_command(&paths, &action, 5)
                .with_context(|| format!("Is `{} daemon` running?", snitray_binary_name))?;
            if let Some(response) = response {
                handle_daemon_response(response);
            }
        }
    }
    Ok(())
}

/// attempt to send a command to the daemon and send it the given action repeatedly.
fn handle_server_command(paths: &SnitrayPaths, action: &ActionWithServer, connect_attempts: usize) -> Result<Option<DaemonResponse>> {
    log::debug!("Trying to find server process at socket {}", paths.get_ipc_socket_file().display());
    let mut stream = attempt_connect(paths.get_ipc_socket_file(), connect_attempts).context("Failed to connect to daemon")?;
    log::debug!("Connected to snitray server ({}).", &paths.get_ipc_socket_file().display());
    client::do_server_call(&mut stream, action).context("Error while forwarding command to server")
}

fn handle_daemon_response(res: DaemonResponse) {
    match res {
        DaemonResponse::Success(x) if x.is_empty() => {}
        DaemonResponse::Success(x) => println!("{}", x),
        DaemonResponse::Failure(x) => {
            eprintln!("{}", x);
            std::process::exit(1);
        }
    }
}

fn attempt_connect(socket_path: impl AsRef<Path>, attempts: usize) -> Option<net::UnixStream> {
    for _ in 0..attempts {
        if let Ok(mut con) = net::UnixStream::connect(&socket_path) {
            if client::do_server_call(&mut con, &opts::ActionWithServer::Ping).is_ok() {
                return net::UnixStream::connect(&socket_path).ok();
            }
        }
        std::thread::sleep(Duration::from_millis(200));
    }
    None
}

/// Check if a snitray server is currently running by trying to send a ping message to it.
fn check_server_running(socket_path: impl AsRef<Path>) -> bool {
    let response = net::UnixStream::connect(socket_path)
        .ok()
        .and_then(|mut stream| client::do_server_call(&mut stream, &opts::ActionWithServer::Ping).ok());
    response.is_some()
}
