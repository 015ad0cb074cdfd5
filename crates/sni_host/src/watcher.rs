use std::sync::{Arc, Mutex};

use crate::*;
use zbus::{interface, names::BusName, Interface};

/// Something that happened to a [`WatcherRegistry`] and has to be announced on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    ItemRegistered(String),
    ItemUnregistered(String),
    HostRegistered(String),
    HostUnregistered(String),
    /// `IsStatusNotifierHostRegistered` flipped to the given value.
    HostPresenceChanged(bool),
}

/// The set of registered tray items and hosts, shared between the [`Watcher`] and its liveness
/// tasks.
///
/// Every mutation returns the events it caused, in the order they should be published. Mutations
/// that don't change anything return no events, which makes registration idempotent.
#[derive(Debug, Default)]
pub struct WatcherRegistry {
    items: Vec<String>,
    hosts: Vec<String>,
}

pub type SharedRegistry = Arc<Mutex<WatcherRegistry>>;

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered item identities, in registration order.
    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn is_host_registered(&self) -> bool {
        !self.hosts.is_empty()
    }

    pub fn add_item(&mut self, item: &ItemAddress) -> Vec<WatcherEvent> {
        let id = item.to_string();
        if self.items.contains(&id) {
            return Vec::new();
        }
        self.items.push(id.clone());
        vec![WatcherEvent::ItemRegistered(id)]
    }

    pub fn remove_item(&mut self, item: &ItemAddress) -> Vec<WatcherEvent> {
        let id = item.to_string();
        match self.items.iter().position(|x| *x == id) {
            Some(idx) => {
                self.items.remove(idx);
                vec![WatcherEvent::ItemUnregistered(id)]
            }
            None => Vec::new(),
        }
    }

    pub fn add_host(&mut self, host: &str) -> Vec<WatcherEvent> {
        if self.hosts.iter().any(|x| x == host) {
            return Vec::new();
        }
        self.hosts.push(host.to_owned());
        let mut events = Vec::new();
        if self.hosts.len() == 1 {
            events.push(WatcherEvent::HostPresenceChanged(true));
        }
        events.push(WatcherEvent::HostRegistered(host.to_owned()));
        events
    }

    pub fn remove_host(&mut self, host: &str) -> Vec<WatcherEvent> {
        let Some(idx) = self.hosts.iter().position(|x| x == host) else {
            return Vec::new();
        };
        self.hosts.remove(idx);
        let mut events = vec![WatcherEvent::HostUnregistered(host.to_owned())];
        if self.hosts.is_empty() {
            events.push(WatcherEvent::HostPresenceChanged(false));
        }
        events
    }
}

/// An instance of [`org.kde.StatusNotifierWatcher`]. It only tracks what tray items and trays
/// exist, and doesn't have any logic for displaying items (for that, see [`Host`][`crate::Host`]).
///
/// Registrations only take effect once the registering service is confirmed to be on the bus, and
/// are dropped again as soon as it leaves. Once the last host is gone the watcher is of no use;
/// [`Watcher::abandoned`] fires so that whoever runs it can shut down.
///
/// [`org.kde.StatusNotifierWatcher`]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierWatcher/
#[derive(Debug, Default)]
pub struct Watcher {
    tasks: tokio::task::JoinSet<()>,

    // Intentionally using std::sync::Mutex instead of tokio's async mutex, since we don't need to
    // hold the mutex across an await.
    //
    // See <https://docs.rs/tokio/latest/tokio/sync/struct.Mutex.html#which-kind-of-mutex-should-you-use>
    registry: SharedRegistry,
    abandoned: Arc<tokio::sync::Notify>,
}

/// Implementation of the `StatusNotifierWatcher` service.
///
/// Methods and properties correspond to methods and properties on the DBus service that can be
/// used by others, while signals are events that we generate that other services listen to.
#[interface(name = "org.kde.StatusNotifierWatcher")]
impl Watcher {
    /// RegisterStatusNotifierHost method
    async fn register_status_notifier_host(
        &mut self,
        service: &str,
        #[zbus(header)] hdr: zbus::message::Header<'_>,
        #[zbus(connection)] con: &zbus::Connection,
        #[zbus(signal_context)] ctxt: zbus::SignalContext<'_>,
    ) -> zbus::fdo::Result<()> {
        // Hosts are tracked by the unique name of the connection that registered them, so a host
        // that drops its well-known name but keeps its connection stays registered.
        let host = match hdr.sender() {
            Some(sender) => sender.to_string(),
            None => {
                log::warn!("host registration {:?} without sender", service);
                return Err(zbus::fdo::Error::InvalidArgs("Unknown bus address".into()));
            }
        };
        log::info!("new host: {} ({})", host, service);

        self.spawn_observer(observe_host(con.to_owned(), ctxt.to_owned(), self.registry.clone(), self.abandoned.clone(), host));
        Ok(())
    }

    /// StatusNotifierHostRegistered signal.
    #[zbus(signal)]
    async fn status_notifier_host_registered(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()>;

    /// StatusNotifierHostUnregistered signal
    #[zbus(signal)]
    async fn status_notifier_host_unregistered(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()>;

    /// IsStatusNotifierHostRegistered property
    #[zbus(property)]
    async fn is_status_notifier_host_registered(&self) -> bool {
        let registry = self.registry.lock().unwrap(); // unwrap: mutex poisoning is okay
        registry.is_host_registered()
    }

    // ------------------------------------------------------------------------

    /// RegisterStatusNotifierItem method
    async fn register_status_notifier_item(
        &mut self,
        service: &str,
        #[zbus(header)] hdr: zbus::message::Header<'_>,
        #[zbus(connection)] con: &zbus::Connection,
        #[zbus(signal_context)] ctxt: zbus::SignalContext<'_>,
    ) -> zbus::fdo::Result<()> {
        let sender = hdr.sender().map(|s| s.to_string());
        let item = match ItemAddress::canonicalize(service, sender.as_deref()) {
            Ok(item) => item,
            Err(e) => {
                log::warn!("received invalid item registration {:?}: {}", service, e);
                return Err(zbus::fdo::Error::InvalidArgs(e.to_string()));
            }
        };

        {
            let registry = self.registry.lock().unwrap(); // unwrap: mutex poisoning is okay
            if registry.items().contains(&item.to_string()) {
                log::info!("new item: {} (duplicate)", item);
                return Ok(());
            }
        }
        log::info!("new item: {}", item);

        self.spawn_observer(observe_item(con.to_owned(), ctxt.to_owned(), self.registry.clone(), item));
        Ok(())
    }

    /// StatusNotifierItemRegistered signal
    #[zbus(signal)]
    async fn status_notifier_item_registered(ctxt: &zbus::SignalContext<'_>, service: &str) -> zbus::Result<()>;

    /// StatusNotifierItemUnregistered signal
    #[zbus(signal)]
    async fn status_notifier_item_unregistered(ctxt: &zbus::SignalContext<'_>, service: &str) -> zbus::Result<()>;

    /// RegisteredStatusNotifierItems property
    #[zbus(property)]
    async fn registered_status_notifier_items(&self) -> Vec<String> {
        let registry = self.registry.lock().unwrap(); // unwrap: mutex poisoning is okay
        registry.items().to_vec()
    }

    // ------------------------------------------------------------------------

    /// ProtocolVersion property
    #[zbus(property)]
    fn protocol_version(&self) -> i32 {
        0
    }
}

impl Watcher {
    /// Create a new Watcher with an empty registry.
    pub fn new() -> Watcher {
        Default::default()
    }

    /// Create a Watcher on top of an existing registry.
    pub fn with_registry(registry: SharedRegistry) -> Watcher {
        Watcher { registry, ..Default::default() }
    }

    /// Run a liveness task, first reaping the ones that already finished.
    fn spawn_observer(&mut self, task: impl std::future::Future<Output = ()> + Send + 'static) {
        while self.tasks.try_join_next().is_some() {}
        self.tasks.spawn(task);
    }

    /// Notified once the last registered host has gone away.
    pub fn abandoned(&self) -> Arc<tokio::sync::Notify> {
        self.abandoned.clone()
    }

    /// Attach and run the Watcher (in the background) on a connection.
    ///
    /// Returns `Ok(false)` if another watcher already owns the well-known name, in which case we
    /// defer to it.
    pub async fn attach_to(self, con: &zbus::Connection) -> zbus::Result<bool> {
        if !con.object_server().at(names::WATCHER_OBJECT, self).await? {
            return Err(zbus::Error::Failure(format!(
                "Object already exists at {} on this connection -- is StatusNotifierWatcher already running?",
                names::WATCHER_OBJECT
            )));
        }

        // not AllowReplacement, not ReplaceExisting, not DoNotQueue
        let flags: [zbus::fdo::RequestNameFlags; 0] = [];
        match con.request_name_with_flags(names::WATCHER_BUS, flags.into_iter().collect()).await {
            Ok(zbus::fdo::RequestNameReply::PrimaryOwner) => Ok(true),
            Ok(_) | Err(zbus::Error::NameTaken) => Ok(false), // defer to existing
            Err(e) => Err(e),
        }
    }

    /// Equivalent to `is_status_notifier_host_registered_invalidate`, but without requiring
    /// `self`.
    async fn is_status_notifier_host_registered_refresh(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()> {
        zbus::fdo::Properties::properties_changed(
            ctxt,
            Self::name(),
            &std::collections::HashMap::new(),
            &["IsStatusNotifierHostRegistered"],
        )
        .await
    }

    /// Equivalent to `registered_status_notifier_items_invalidate`, but without requiring `self`.
    async fn registered_status_notifier_items_refresh(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()> {
        zbus::fdo::Properties::properties_changed(
            ctxt,
            Self::name(),
            &std::collections::HashMap::new(),
            &["RegisteredStatusNotifierItems"],
        )
        .await
    }

    /// Publish registry events as signals.
    async fn publish(ctxt: &zbus::SignalContext<'_>, events: Vec<WatcherEvent>) {
        for event in events {
            let result = match &event {
                WatcherEvent::ItemRegistered(item) => {
                    match Watcher::registered_status_notifier_items_refresh(ctxt).await {
                        Ok(()) => Watcher::status_notifier_item_registered(ctxt, item).await,
                        Err(e) => Err(e),
                    }
                }
                WatcherEvent::ItemUnregistered(item) => {
                    match Watcher::registered_status_notifier_items_refresh(ctxt).await {
                        Ok(()) => Watcher::status_notifier_item_unregistered(ctxt, item).await,
                        Err(e) => Err(e),
                    }
                }
                WatcherEvent::HostRegistered(_) => Watcher::status_notifier_host_registered(ctxt).await,
                WatcherEvent::HostUnregistered(_) => Watcher::status_notifier_host_unregistered(ctxt).await,
                WatcherEvent::HostPresenceChanged(_) => Watcher::is_status_notifier_host_registered_refresh(ctxt).await,
            };
            if let Err(e) = result {
                log::error!("failed to signal {:?}: {}", event, e);
            }
        }
    }
}

/// Track a host from the moment it is seen on the bus until it leaves.
async fn observe_host(
    con: zbus::Connection,
    ctxt: zbus::SignalContext<'static>,
    registry: SharedRegistry,
    abandoned: Arc<tokio::sync::Notify>,
    host: String,
) {
    let Ok(name) = BusName::try_from(host.as_str()) else {
        log::warn!("host {:?} is not a valid bus name", host);
        return;
    };
    if let Err(e) = wait_for_service(&con, name.as_ref()).await {
        log::warn!("host {} never became available: {}", host, e);
        return;
    }

    let events = registry.lock().unwrap().add_host(&host); // unwrap: mutex poisoning is okay
    if events.is_empty() {
        // we're already tracking them
        return;
    }
    Watcher::publish(&ctxt, events).await;

    if let Err(e) = wait_for_service_exit(&con, name).await {
        log::error!("failed to wait for service exit: {}", e);
    }
    log::info!("lost host: {}", host);

    let events = registry.lock().unwrap().remove_host(&host); // unwrap: mutex poisoning is okay
    let removed_last = events.contains(&WatcherEvent::HostPresenceChanged(false));
    Watcher::publish(&ctxt, events).await;
    if removed_last {
        abandoned.notify_one();
    }
}

/// Track an item from the moment it is seen on the bus until it leaves.
async fn observe_item(con: zbus::Connection, ctxt: zbus::SignalContext<'static>, registry: SharedRegistry, item: ItemAddress) {
    let Ok(name) = BusName::try_from(item.service.as_str()) else {
        log::warn!("item {} does not live on a valid bus name", item);
        return;
    };
    if let Err(e) = wait_for_service(&con, name.as_ref()).await {
        log::warn!("item {} never became available: {}", item, e);
        return;
    }

    let events = registry.lock().unwrap().add_item(&item); // unwrap: mutex poisoning is okay
    if events.is_empty() {
        return;
    }
    Watcher::publish(&ctxt, events).await;

    if let Err(e) = wait_for_service_exit(&con, name).await {
        log::error!("failed to wait for service exit: {}", e);
    }
    log::info!("gone item: {}", item);

    let events = registry.lock().unwrap().remove_item(&item); // unwrap: mutex poisoning is okay
    Watcher::publish(&ctxt, events).await;
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn item(service: &str) -> ItemAddress {
        ItemAddress::canonicalize("org.example.A", Some(service)).unwrap()
    }

    #[test]
    fn test_register_item_twice_yields_one_entry() {
        let mut registry = WatcherRegistry::new();
        let first = ItemAddress::canonicalize("/StatusNotifierItem", Some(":1.5")).unwrap();
        let second = ItemAddress::canonicalize(":1.5", Some(":1.5")).unwrap();
        assert_eq!(registry.add_item(&first), vec![WatcherEvent::ItemRegistered(":1.5/StatusNotifierItem".to_owned())]);
        assert_eq!(registry.add_item(&second), vec![]);
        assert_eq!(registry.items(), &[":1.5/StatusNotifierItem".to_owned()]);
    }

    #[test]
    fn test_items_keep_registration_order() {
        let mut registry = WatcherRegistry::new();
        registry.add_item(&item(":1.9"));
        registry.add_item(&item(":1.3"));
        registry.add_item(&item(":1.7"));
        registry.remove_item(&item(":1.3"));
        assert_eq!(registry.items(), &[":1.9/StatusNotifierItem".to_owned(), ":1.7/StatusNotifierItem".to_owned()]);
    }

    #[test]
    fn test_item_appears_and_disappears() {
        let mut registry = WatcherRegistry::new();
        let a = item("org.example.A");

        registry.add_item(&a);
        assert_eq!(registry.items(), &["org.example.A/StatusNotifierItem".to_owned()]);

        let mut unregistered = registry.remove_item(&a);
        unregistered.extend(registry.remove_item(&a));
        assert_eq!(registry.items(), &[] as &[String]);
        assert_eq!(unregistered, vec![WatcherEvent::ItemUnregistered("org.example.A/StatusNotifierItem".to_owned())]);
    }

    #[test]
    fn test_host_presence_flips_once() {
        let mut registry = WatcherRegistry::new();
        assert_eq!(
            registry.add_host(":1.1"),
            vec![WatcherEvent::HostPresenceChanged(true), WatcherEvent::HostRegistered(":1.1".to_owned())]
        );
        assert_eq!(registry.add_host(":1.2"), vec![WatcherEvent::HostRegistered(":1.2".to_owned())]);
        assert_eq!(registry.add_host(":1.2"), vec![]);
        assert!(registry.is_host_registered());

        assert_eq!(registry.remove_host(":1.1"), vec![WatcherEvent::HostUnregistered(":1.1".to_owned())]);
        assert_eq!(
            registry.remove_host(":1.2"),
            vec![WatcherEvent::HostUnregistered(":1.2".to_owned()), WatcherEvent::HostPresenceChanged(false)]
        );
        assert!(!registry.is_host_registered());
    }

    #[tokio::test]
    async fn test_finished_observers_are_reaped() {
        let mut watcher = Watcher::new();
        for _ in 0..3 {
            watcher.spawn_observer(async {});
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        watcher.spawn_observer(std::future::pending());
        assert_eq!(watcher.tasks.len(), 1);
    }

    #[test]
    fn test_unknown_host_is_never_unregistered() {
        let mut registry = WatcherRegistry::new();
        assert_eq!(registry.remove_host(":1.1"), vec![]);
        registry.add_host(":1.1");
        registry.remove_host(":1.1");
        assert_eq!(registry.remove_host(":1.1"), vec![]);
    }
}
