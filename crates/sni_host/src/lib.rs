//! Implementation of the [StatusNotifierItem] protocol: a watcher service, a host that turns the
//! watcher's registrations into tray items, and the per-item proxy and menu handling needed to
//! drive a tray from them.
//!
//! Rendering is left to the user of this crate, through the [`TraySink`] trait.
//!
//! [StatusNotifierItem]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/

pub mod names;
pub mod proxy;

mod address;
pub use address::*;

mod error;
pub use error::*;

mod host;
pub use host::*;

mod icon;
pub use icon::*;

mod item;
pub use item::*;

mod liveness;
pub use liveness::*;

mod menu;
pub use menu::*;

mod property;
pub use property::*;

mod watcher;
pub use watcher::*;
