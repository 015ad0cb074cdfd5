//! # DBus interface proxy for: `com.canonical.dbusmenu`
//!
//! This code was generated by `zbus-xmlgen` `4.1.0` from DBus introspection data.
//! Source: `dbus_menu.xml`.

use std::collections::HashMap;

use zbus::{proxy, zvariant::OwnedValue};

/// Layout node as returned by `GetLayout`: `(id, properties, children)`, where every child is a
/// variant wrapping another node.
pub type RawLayout = (i32, HashMap<String, OwnedValue>, Vec<OwnedValue>);

#[proxy(interface = "com.canonical.dbusmenu", gen_blocking = false)]
trait DBusMenu {
    /// AboutToShow method
    fn about_to_show(&self, id: i32) -> zbus::Result<bool>;

    /// Event method
    fn event(&self, id: i32, event_id: &str, data: &zbus::zvariant::Value<'_>, timestamp: u32) -> zbus::Result<()>;

    /// GetLayout method
    fn get_layout(&self, parent_id: i32, recursion_depth: i32, property_names: &[&str]) -> zbus::Result<(u32, RawLayout)>;

    /// LayoutUpdated signal
    #[zbus(signal)]
    fn layout_updated(&self, revision: u32, parent: i32) -> zbus::Result<()>;
}
