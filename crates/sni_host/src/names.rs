//! Well-known names and object paths of the StatusNotifierItem protocol.

/// Bus name the watcher is published under.
pub const WATCHER_BUS: &str = "org.kde.StatusNotifierWatcher";
/// Object path of the watcher on [`WATCHER_BUS`].
pub const WATCHER_OBJECT: &str = "/StatusNotifierWatcher";

/// Object path items are expected at when they only give us a bus name.
pub const ITEM_OBJECT: &str = "/StatusNotifierItem";
/// Interface implemented by every tray item.
pub const ITEM_INTERFACE: &str = "org.kde.StatusNotifierItem";

/// Prefix of the per-instance host names, completed with `-{pid}-{instance}`.
pub const HOST_BUS_PREFIX: &str = "org.freedesktop.StatusNotifierHost";
