//! The StatusNotifierWatcher runs in its own process, so that an item that blocks while it
//! registers can't stall the daemon.

use std::time::Duration;

use anyhow::{Context, Result};

/// Handle to a `snitray watcher` child process.
#[derive(Debug)]
pub struct WatcherProcess {
    child: tokio::process::Child,
}

impl WatcherProcess {
    /// Start `snitray watcher` from the current executable.
    pub fn spawn() -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to find the snitray executable")?;
        let child = tokio::process::Command::new(exe)
            .arg("watcher")
            .stdin(std::process::Stdio::null())
            // keep ctrl-c in a terminal from reaching the watcher directly
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn the watcher process")?;
        log::info!("Started StatusNotifierWatcher process {:?}", child.id());
        Ok(Self { child })
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the watcher to terminate, killing it if it doesn't within a second.
    pub async fn terminate(mut self) {
        let Some(pid) = self.child.id() else {
            return;
        };
        let pid = nix::unistd::Pid::from_raw(pid as i32);
        // the watcher leads its own process group
        if let Err(e) = nix::sys::signal::killpg(pid, nix::sys::signal::Signal::SIGTERM) {
            log::debug!("could not send SIGTERM to watcher: {}", e);
        }
        match tokio::time::timeout(Duration::from_secs(1), self.child.wait()).await {
            Ok(Ok(status)) => log::debug!("watcher exited with {}", status),
            Ok(Err(e)) => log::warn!("failed to wait for watcher: {}", e),
            Err(_) => {
                log::warn!("watcher did not exit in time, killing it");
                crate::print_result_err!("killing watcher", self.child.kill().await);
            }
        }
    }
}

/// Entry point of `snitray watcher`.
///
/// Serves the watcher until the last host unregisters or the process is told to exit. Exits right
/// away if another watcher is already running.
pub fn run() -> Result<()> {
    crate::application_lifecycle::exit_on_signals("watcher");

    let rt = tokio::runtime::Builder::new_current_thread()
        .thread_name("snitray-watcher")
        .enable_all()
        .build()
        .context("Failed to initialize tokio runtime")?;

    rt.block_on(async {
        let con = zbus::Connection::session().await.context("Failed to connect to the session bus")?;
        let watcher = sni_host::Watcher::new();
        let abandoned = watcher.abandoned();

        if !watcher.attach_to(&con).await.context("Failed to serve StatusNotifierWatcher")? {
            log::info!("Another StatusNotifierWatcher is already running, deferring to it");
            return Ok(());
        }
        log::info!("Serving {}", sni_host::names::WATCHER_BUS);

        tokio::select! {
            _ = abandoned.notified() => log::info!("Last StatusNotifierHost is gone, stopping watcher"),
            Ok(()) = crate::application_lifecycle::recv_exit() => log::info!("Stopping watcher"),
        }
        Ok(())
    })
}
