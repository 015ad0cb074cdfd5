use anyhow::{Context, Result};
use sni_host::{names, proxy::StatusNotifierWatcherProxy, Host, MouseButton, ScrollInput, TraySink, WatcherItemEvent};

use crate::{config::SnitrayConfig, daemon_response::DaemonResponseSender, watcher_process::WatcherProcess};

pub enum DaemonCommand {
    NoOp,
    KillServer,
    ListItems(DaemonResponseSender),
    AttachSink(Box<dyn TraySink>),
    Click {
        id: String,
        button: MouseButton,
        x: i32,
        y: i32,
        sender: DaemonResponseSender,
    },
    Scroll {
        id: String,
        input: ScrollInput,
        sender: DaemonResponseSender,
    },
    ShowMenu {
        id: String,
        sender: DaemonResponseSender,
    },
    MenuEvent {
        id: String,
        entry: i32,
        sender: DaemonResponseSender,
    },
}

impl std::fmt::Debug for DaemonCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonCommand::NoOp => write!(f, "NoOp"),
            DaemonCommand::KillServer => write!(f, "KillServer"),
            DaemonCommand::ListItems(_) => write!(f, "ListItems"),
            DaemonCommand::AttachSink(_) => write!(f, "AttachSink"),
            DaemonCommand::Click { id, button, x, y, .. } => write!(f, "Click({id}, {button}, {x}, {y})"),
            DaemonCommand::Scroll { id, input, .. } => write!(f, "Scroll({id}, {input:?})"),
            DaemonCommand::ShowMenu { id, .. } => write!(f, "ShowMenu({id})"),
            DaemonCommand::MenuEvent { id, entry, .. } => write!(f, "MenuEvent({id}, {entry})"),
        }
    }
}

/// Whether the daemon should keep running after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct App {
    pub host: Host,
    pub snw: StatusNotifierWatcherProxy<'static>,
    /// Our well-known StatusNotifierHost name.
    pub host_name: String,
    pub config: SnitrayConfig,
    pub watcher: Option<WatcherProcess>,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("host", &self.host)
            .field("host_name", &self.host_name)
            .field("config", &self.config)
            .field("watcher", &self.watcher)
            .finish()
    }
}

impl App {
    /// Handle a DaemonCommand event.
    pub async fn handle_command(&mut self, event: DaemonCommand) -> Flow {
        log::debug!("Handling event: {:?}", &event);
        match event {
            DaemonCommand::NoOp => {}
            DaemonCommand::KillServer => {
                log::info!("Received kill command, stopping server!");
                return Flow::Exit;
            }
            DaemonCommand::AttachSink(sink) => {
                self.host.attach_sink(sink);
                log::debug!("attached sink, now {} sinks", self.host.tray().sink_count());
            }
            DaemonCommand::ListItems(sender) => {
                let result = serde_json::to_string_pretty(&self.host.items());
                crate::print_result_err!("responding to list", sender.respond_with_result(result));
            }
            DaemonCommand::Click { id, button, x, y, sender } => {
                let result = self.host.click(&id, button, x, y).await.map_err(anyhow::Error::from).and_then(|menu| match menu {
                    Some(menu) => serde_json::to_string_pretty(&menu).context("Failed to serialize menu"),
                    None => Ok(String::new()),
                });
                crate::print_result_err!("responding to click", sender.respond_with_result(result));
            }
            DaemonCommand::Scroll { id, input, sender } => {
                let result = self.host.scroll(&id, input).await.map(|_| String::new());
                crate::print_result_err!("responding to scroll", sender.respond_with_result(result));
            }
            DaemonCommand::ShowMenu { id, sender } => {
                let result = self
                    .host
                    .menu_for(&id)
                    .await
                    .map_err(anyhow::Error::from)
                    .and_then(|menu| serde_json::to_string_pretty(&menu).context("Failed to serialize menu"));
                crate::print_result_err!("responding to menu", sender.respond_with_result(result));
            }
            DaemonCommand::MenuEvent { id, entry, sender } => {
                let result = self.host.menu_event(&id, entry).await.map(|_| String::new());
                crate::print_result_err!("responding to menu-event", sender.respond_with_result(result));
            }
        }
        Flow::Continue
    }

    /// Follow an item (un)registration announced by the watcher.
    pub async fn handle_watcher_event(&mut self, event: WatcherItemEvent) {
        match event {
            WatcherItemEvent::Registered(id) => self.host.add_from_address(&id).await,
            WatcherItemEvent::Unregistered(id) => self.host.remove(&id),
        }
    }

    /// The watcher's bus name got a new owner, or lost it.
    pub async fn handle_watcher_owner_change(&mut self, has_owner: bool) {
        if has_owner {
            let result = self.watcher_appeared().await;
            crate::print_result_err!("registering with the new StatusNotifierWatcher", result);
        } else {
            log::warn!("{} disappeared", names::WATCHER_BUS);
            if self.config.spawn_watcher {
                self.spawn_watcher();
            }
        }
    }

    /// (Re-)register as a host, and catch up on the items the watcher already knows about.
    pub async fn watcher_appeared(&mut self) -> Result<()> {
        sni_host::register_with_watcher(&self.snw, &self.host_name).await?;
        let registered = self.snw.registered_status_notifier_items().await.context("Failed to list registered items")?;
        self.host.reconcile(&registered).await;
        Ok(())
    }

    pub fn spawn_watcher(&mut self) {
        if let Some(watcher) = &mut self.watcher {
            if watcher.is_running() {
                return;
            }
        }
        match WatcherProcess::spawn() {
            Ok(watcher) => self.watcher = Some(watcher),
            Err(e) => log::error!("Failed to start a StatusNotifierWatcher: {:?}", e),
        }
    }

    pub async fn shutdown(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.terminate().await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{opts::ListenFormat, sink::JsonSink};

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_commands_are_send_and_sync() {
        assert_send_sync::<DaemonCommand>();
    }

    #[test]
    fn test_failed_send_converts_to_anyhow() {
        let (evt_send, evt_recv) = tokio::sync::mpsc::unbounded_channel::<DaemonCommand>();
        drop(evt_recv);
        let (lines, _lines_recv) = tokio::sync::mpsc::unbounded_channel();
        let result: Result<()> = evt_send
            .send(DaemonCommand::AttachSink(Box::new(JsonSink::new(ListenFormat::Events, lines))))
            .map_err(anyhow::Error::from);
        assert!(result.is_err());
    }
}
