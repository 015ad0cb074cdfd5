use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use sni_host::{MouseButton, ScrollDirection, ScrollInput};

use crate::{
    app,
    daemon_response::{self, DaemonResponseReceiver},
};

/// Struct that gets generated from `RawOpt`.
#[derive(Debug, PartialEq)]
pub struct Opt {
    pub log_debug: bool,
    pub restart: bool,
    pub no_daemonize: bool,
    pub config_path: Option<std::path::PathBuf>,
    pub action: Action,
}

#[derive(Parser, Debug, PartialEq)]
#[command(author = "elkowar", version, about = "A StatusNotifierItem system tray daemon", long_about = None)]
pub(super) struct RawOpt {
    /// Write out debug logs. (To read the logs, run `snitray logs`).
    #[arg(long = "debug", global = true)]
    log_debug: bool,

    /// Override the path to the configuration directory (the directory that contains config.json).
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Restart the daemon completely before running the command.
    #[arg(long = "restart", global = true)]
    restart: bool,

    /// Don't fork the daemon into the background.
    #[arg(long = "no-daemonize", global = true)]
    no_daemonize: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Action {
    /// Generate a shell completion script
    ShellCompletions {
        #[arg(short, long)]
        shell: clap_complete::shells::Shell,
    },

    /// Start the snitray daemon.
    #[command(name = "daemon", alias = "d")]
    Daemon,

    /// Run a StatusNotifierWatcher until the last host is gone. Started by the daemon.
    #[command(name = "watcher", hide = true)]
    Watcher,

    #[command(flatten)]
    ClientOnly(ActionClientOnly),

    #[command(flatten)]
    WithServer(ActionWithServer),
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum ActionClientOnly {
    /// Print and watch the snitray logs
    #[command(name = "logs")]
    Logs,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListenFormat {
    /// One JSON object per add, update or removal.
    #[default]
    Events,
    /// The full list of items after every change.
    Snapshot,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionWithServer {
    /// Ping the snitray server, checking if it is reachable.
    #[command(name = "ping")]
    Ping,

    /// Kill the snitray daemon
    #[command(name = "kill", alias = "k")]
    KillServer,

    /// Print the current tray items as JSON.
    #[command(name = "list", alias = "ls")]
    ListItems,

    /// Print changes to the tray as JSON lines until interrupted.
    #[command(name = "listen")]
    Listen {
        #[arg(short, long, value_enum, default_value = "events")]
        format: ListenFormat,
    },

    /// Press a mouse button on a tray item. Prints the menu as JSON if that opened it.
    #[command(name = "click")]
    Click {
        /// Id of the item, as printed by `snitray list`
        id: String,
        /// left, middle or right
        button: MouseButton,
        /// Screen coordinates the item may use to position its own windows
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        x: i32,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        y: i32,
    },

    /// Scroll on a tray item.
    #[command(name = "scroll")]
    Scroll {
        id: String,
        /// Smooth horizontal delta
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        dx: f64,
        /// Smooth vertical delta
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        dy: f64,
        /// A single wheel notch (up, down, left or right) instead of a smooth delta
        #[arg(long, conflicts_with_all = ["dx", "dy"])]
        discrete: Option<ScrollDirection>,
    },

    /// Print the menu of a tray item as JSON.
    #[command(name = "menu")]
    ShowMenu { id: String },

    /// Click an entry in the menu of a tray item.
    #[command(name = "menu-event")]
    MenuEvent {
        id: String,
        /// Id of the menu entry, as printed by `snitray menu`
        entry: i32,
    },
}

impl Opt {
    pub fn from_env() -> Self {
        let raw: RawOpt = RawOpt::parse();
        raw.into()
    }
}

impl From<RawOpt> for Opt {
    fn from(other: RawOpt) -> Self {
        let RawOpt { action, log_debug, config, restart, no_daemonize } = other;
        Opt { action, log_debug, restart, no_daemonize, config_path: config }
    }
}

impl ActionWithServer {
    /// Turn this action into the command the app handles. `Listen` is streamed by the IPC server
    /// itself and becomes a no-op here.
    pub fn into_daemon_command(self) -> (app::DaemonCommand, Option<DaemonResponseReceiver>) {
        let command = match self {
            ActionWithServer::Ping => {
                let (send, recv) = daemon_response::create_pair();
                let _ = send.send_success("pong".to_owned());
                return (app::DaemonCommand::NoOp, Some(recv));
            }
            ActionWithServer::KillServer => app::DaemonCommand::KillServer,
            ActionWithServer::Listen { .. } => app::DaemonCommand::NoOp,
            ActionWithServer::ListItems => return with_response_channel(app::DaemonCommand::ListItems),
            ActionWithServer::Click { id, button, x, y } => {
                return with_response_channel(|sender| app::DaemonCommand::Click { id, button, x, y, sender })
            }
            ActionWithServer::Scroll { id, dx, dy, discrete } => {
                let input = match discrete {
                    Some(direction) => ScrollInput::Discrete(direction),
                    None => ScrollInput::Smooth { dx, dy },
                };
                return with_response_channel(|sender| app::DaemonCommand::Scroll { id, input, sender });
            }
            ActionWithServer::ShowMenu { id } => {
                return with_response_channel(|sender| app::DaemonCommand::ShowMenu { id, sender })
            }
            ActionWithServer::MenuEvent { id, entry } => {
                return with_response_channel(|sender| app::DaemonCommand::MenuEvent { id, entry, sender })
            }
        };
        (command, None)
    }
}

fn with_response_channel<O, F>(f: F) -> (O, Option<DaemonResponseReceiver>)
where
    F: FnOnce(daemon_response::DaemonResponseSender) -> O,
{
    let (sender, recv) = daemon_response::create_pair();
    (f(sender), Some(recv))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Opt {
        RawOpt::try_parse_from(std::iter::once("snitray").chain(args.iter().copied())).unwrap().into()
    }

    #[test]
    fn test_parse_click() {
        let opt = parse(&["click", ":1.50/org/ayatana/NotificationItem/nm_applet", "right", "--x", "-20", "--debug"]);
        assert!(opt.log_debug);
        assert_eq!(
            opt.action,
            Action::WithServer(ActionWithServer::Click {
                id: ":1.50/org/ayatana/NotificationItem/nm_applet".to_owned(),
                button: MouseButton::Right,
                x: -20,
                y: 0,
            })
        );
    }

    #[test]
    fn test_parse_scroll() {
        let opt = parse(&["scroll", "org.example.A/StatusNotifierItem", "--dy", "-0.5"]);
        assert_eq!(
            opt.action,
            Action::WithServer(ActionWithServer::Scroll {
                id: "org.example.A/StatusNotifierItem".to_owned(),
                dx: 0.0,
                dy: -0.5,
                discrete: None,
            })
        );
        let opt = parse(&["scroll", "x", "--discrete", "up"]);
        assert!(matches!(
            opt.action,
            Action::WithServer(ActionWithServer::Scroll { discrete: Some(ScrollDirection::Up), .. })
        ));
        assert!(RawOpt::try_parse_from(["snitray", "scroll", "x", "--discrete", "up", "--dy", "1"]).is_err());
    }

    #[test]
    fn test_parse_listen_and_globals() {
        let opt = parse(&["listen", "--format", "snapshot", "--no-daemonize", "--config", "/tmp/snitray"]);
        assert_eq!(opt.action, Action::WithServer(ActionWithServer::Listen { format: ListenFormat::Snapshot }));
        assert!(opt.no_daemonize);
        assert_eq!(opt.config_path, Some("/tmp/snitray".into()));
        assert_eq!(parse(&["listen"]).action, Action::WithServer(ActionWithServer::Listen { format: ListenFormat::Events }));
    }

    #[test]
    fn test_watcher_is_hidden_but_parses() {
        assert_eq!(parse(&["watcher"]).action, Action::Watcher);
        assert_eq!(parse(&["k"]).action, Action::WithServer(ActionWithServer::KillServer));
    }

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        RawOpt::command().debug_assert();
    }
}
