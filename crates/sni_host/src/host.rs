use crate::*;

use zbus::export::ordered_stream::{self, OrderedStream, OrderedStreamExt};

/// Something that displays tray items, e.g. a tray widget on one panel.
///
/// Any number of sinks can be attached to one [`Host`]; every one of them sees every item.
/// Sinks are handed over through the daemon's command channel and must be `Send + Sync`.
pub trait TraySink: Send + Sync {
    fn add_item(&mut self, item: &TrayItem);
    fn update_item(&mut self, item: &TrayItem, changed: &[Property]);
    fn remove_item(&mut self, id: &str);

    /// A closed sink is dropped by the host after the next change it would have received.
    fn is_closed(&self) -> bool {
        false
    }
}

#[derive(Debug)]
struct TrayEntry {
    id: String,
    /// Set once the item finished loading.
    snapshot: Option<TrayItem>,
    bridge: MenuBridge,
}

/// The set of tray items a host tracks, and the sinks they are shown in.
///
/// This holds no connection; [`Host`] feeds it from the bus.
pub struct Tray {
    sinks: Vec<Box<dyn TraySink>>,
    entries: Vec<TrayEntry>,
    scroll_threshold: f64,
}

impl std::fmt::Debug for Tray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tray").field("sinks", &self.sinks.len()).field("entries", &self.entries).finish()
    }
}

impl Tray {
    pub fn new(scroll_threshold: f64) -> Self {
        Self { sinks: Vec::new(), entries: Vec::new(), scroll_threshold }
    }

    /// Attach a sink. Items that are already loaded are added to it right away.
    pub fn attach_sink(&mut self, mut sink: Box<dyn TraySink>) {
        for item in self.items() {
            sink.add_item(item);
        }
        if !sink.is_closed() {
            self.sinks.push(sink);
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Start tracking an item. Returns false if it is tracked already.
    pub fn track(&mut self, id: &str) -> bool {
        if self.entries.iter().any(|e| e.id == id) {
            return false;
        }
        self.entries.push(TrayEntry { id: id.to_owned(), snapshot: None, bridge: MenuBridge::new(self.scroll_threshold) });
        true
    }

    /// Stop tracking an item, removing it from every sink if it was shown. Returns false if the
    /// item wasn't tracked.
    pub fn untrack(&mut self, id: &str) -> bool {
        let Some(idx) = self.entries.iter().position(|e| e.id == id) else {
            return false;
        };
        let entry = self.entries.remove(idx);
        if entry.snapshot.is_some() {
            self.fan_out(|sink| sink.remove_item(id));
        }
        true
    }

    pub fn is_tracked(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Compare the tracked items with what the watcher has `registered`.
    ///
    /// Returns the ids to start tracking, each once and in registration order, and the tracked
    /// ids the watcher no longer lists.
    pub fn reconcile(&self, registered: &[String]) -> (Vec<String>, Vec<String>) {
        let mut to_add: Vec<String> = Vec::new();
        for id in registered {
            if !self.is_tracked(id) && !to_add.contains(id) {
                to_add.push(id.clone());
            }
        }
        let to_remove = self.ids().filter(|id| !registered.iter().any(|r| r == id)).map(str::to_owned).collect();
        (to_add, to_remove)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.id.as_str())
    }

    /// Loaded items, in the order they were tracked.
    pub fn items(&self) -> impl Iterator<Item = &TrayItem> {
        self.entries.iter().filter_map(|e| e.snapshot.as_ref())
    }

    pub fn item(&self, id: &str) -> Option<&TrayItem> {
        self.entry(id)?.snapshot.as_ref()
    }

    pub fn bridge(&self, id: &str) -> Option<&MenuBridge> {
        self.entry(id).map(|e| &e.bridge)
    }

    pub fn bridge_mut(&mut self, id: &str) -> Option<&mut MenuBridge> {
        self.entries.iter_mut().find(|e| e.id == id).map(|e| &mut e.bridge)
    }

    fn entry(&self, id: &str) -> Option<&TrayEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Apply an event reported by an item. Events of items that are no longer tracked are
    /// dropped.
    pub fn handle_item_event(&mut self, event: ItemEvent) {
        match event {
            ItemEvent::Loaded(item) => {
                let Some(entry) = self.entries.iter_mut().find(|e| e.id == item.id) else {
                    log::debug!("dropping load of untracked item {}", item.id);
                    return;
                };
                let first = entry.snapshot.is_none();
                entry.snapshot = Some(item.clone());
                if first {
                    self.fan_out(|sink| sink.add_item(&item));
                } else {
                    let changed: Vec<Property> = Property::all().collect();
                    self.fan_out(|sink| sink.update_item(&item, &changed));
                }
            }
            ItemEvent::Updated { item, changed } => {
                let Some(entry) = self.entries.iter_mut().find(|e| e.id == item.id) else {
                    return;
                };
                if entry.snapshot.is_none() {
                    return;
                }
                entry.snapshot = Some(item.clone());
                self.fan_out(|sink| sink.update_item(&item, &changed));
            }
            ItemEvent::MenuChanged { id, menu } => {
                if let Some(bridge) = self.bridge_mut(&id) {
                    log::debug!("menu of {} is now {}", id, if menu.is_some() { "bound" } else { "unbound" });
                    bridge.bind(menu);
                }
            }
        }
    }

    fn fan_out(&mut self, mut f: impl FnMut(&mut dyn TraySink)) {
        for sink in self.sinks.iter_mut() {
            f(sink.as_mut());
        }
        self.sinks.retain(|sink| !sink.is_closed());
    }
}

/// Tunables of a [`Host`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostConfig {
    /// Accumulated smooth scroll delta at which a scroll is sent to an item.
    pub scroll_threshold: f64,
    /// How many levels of a menu to fetch when opening it, `-1` for all of them.
    pub menu_depth: i32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self { scroll_threshold: 1.0, menu_depth: -1 }
    }
}

/// An item with the task that keeps it up to date.
#[derive(Debug)]
struct Running {
    item: Item,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A StatusNotifierHost: turns the items registered with the watcher into [`TrayItem`]s shown by
/// the attached [`TraySink`]s, and forwards user input back to the items.
///
/// Items report back through the channel returned by [`Host::new`]; the receiving end has to be
/// drained into [`Host::handle_item_event`].
#[derive(Debug)]
pub struct Host {
    con: zbus::Connection,
    config: HostConfig,
    tray: Tray,
    running: Vec<Running>,
    events: tokio::sync::mpsc::UnboundedSender<ItemEvent>,
}

impl Host {
    pub fn new(con: zbus::Connection, config: HostConfig) -> (Self, tokio::sync::mpsc::UnboundedReceiver<ItemEvent>) {
        let (events, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let host = Self { con, config, tray: Tray::new(config.scroll_threshold), running: Vec::new(), events };
        (host, events_rx)
    }

    pub fn tray(&self) -> &Tray {
        &self.tray
    }

    pub fn attach_sink(&mut self, sink: Box<dyn TraySink>) {
        self.tray.attach_sink(sink);
    }

    pub fn items(&self) -> Vec<TrayItem> {
        self.tray.items().cloned().collect()
    }

    /// Start tracking the item at `address`, unless it is tracked already.
    pub async fn add_from_address(&mut self, address: &str) {
        if !self.tray.track(address) {
            log::debug!("ignoring duplicate item {}", address);
            return;
        }
        match Item::from_address(&self.con, address).await {
            Ok(item) => {
                log::info!("tracking item {}", address);
                let task = tokio::spawn(item.clone().maintain(ChannelListener(self.events.clone())));
                self.running.push(Running { item, task });
            }
            Err(e) => {
                log::warn!("Could not create StatusNotifierItem from address {:?}: {}", address, e);
                self.tray.untrack(address);
            }
        }
    }

    pub fn remove(&mut self, address: &str) {
        self.running.retain(|r| r.item.id != address);
        if self.tray.untrack(address) {
            log::info!("removed item {}", address);
        }
    }

    /// Bring the tracked items in line with what the watcher currently has registered.
    pub async fn reconcile(&mut self, registered: &[String]) {
        let (to_add, to_remove) = self.tray.reconcile(registered);
        for id in to_remove {
            self.remove(&id);
        }
        for id in to_add {
            self.add_from_address(&id).await;
        }
    }

    pub fn handle_item_event(&mut self, event: ItemEvent) {
        self.tray.handle_item_event(event);
    }

    fn running(&self, id: &str) -> Result<&Item> {
        self.running.iter().find(|r| r.item.id == id).map(|r| &r.item).ok_or_else(|| Error::UnknownItem(id.to_owned()))
    }

    /// Handle a button press on an item. Returns the menu if the press opened it.
    pub async fn click(&mut self, id: &str, button: MouseButton, x: i32, y: i32) -> Result<Option<MenuEntry>> {
        let item = self.running(id)?;
        let item_is_menu = self.tray.item(id).map_or(false, TrayItem::item_is_menu);
        let bridge = self.tray.bridge(id).ok_or_else(|| Error::UnknownItem(id.to_owned()))?;

        match bridge.route(button, item_is_menu) {
            InputAction::OpenMenu => {
                let menu = bridge.menu().cloned().ok_or_else(|| Error::NoMenu(id.to_owned()))?;
                return Ok(Some(open_menu(&menu, self.config.menu_depth).await?));
            }
            InputAction::ContextMenu => item.context_menu(x, y).await?,
            InputAction::Activate => item.activate(x, y).await?,
            InputAction::SecondaryAction => item.secondary_action(x, y).await?,
        }
        Ok(None)
    }

    /// Handle a scroll event on an item, forwarding it once it amounts to something.
    pub async fn scroll(&mut self, id: &str, input: ScrollInput) -> Result<()> {
        let calls = self.tray.bridge_mut(id).ok_or_else(|| Error::UnknownItem(id.to_owned()))?.scroll(input);
        let item = self.running(id)?;
        for (distance, orientation) in calls {
            item.scroll(distance, orientation).await?;
        }
        Ok(())
    }

    /// Fetch the menu of an item.
    pub async fn menu_for(&self, id: &str) -> Result<MenuEntry> {
        let menu = self.bound_menu(id)?;
        open_menu(&menu, self.config.menu_depth).await
    }

    /// Click an entry of an item's menu.
    pub async fn menu_event(&self, id: &str, entry: i32) -> Result<()> {
        let menu = self.bound_menu(id)?;
        activate_entry(&menu, entry).await
    }

    fn bound_menu(&self, id: &str) -> Result<proxy::DBusMenuProxy<'static>> {
        let bridge = self.tray.bridge(id).ok_or_else(|| Error::UnknownItem(id.to_owned()))?;
        bridge.menu().cloned().ok_or_else(|| Error::NoMenu(id.to_owned()))
    }
}

/// Claim a unique StatusNotifierHost name on `con` and register it with the watcher.
///
/// Returns the name, which has to be registered again should the watcher restart.
pub async fn register_as_host(con: &zbus::Connection) -> Result<(String, proxy::StatusNotifierWatcherProxy<'static>)> {
    let wellknown_name = claim_host_name(con).await?;
    let snw = proxy::StatusNotifierWatcherProxy::new(con).await?;
    register_with_watcher(&snw, &wellknown_name).await?;
    Ok((wellknown_name, snw))
}

/// Pick and request a free `org.freedesktop.StatusNotifierHost-{pid}-{n}` name.
pub async fn claim_host_name(con: &zbus::Connection) -> Result<String> {
    // From <https://www.freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierHost/>:
    //
    // Instances of this service are registered on the Dbus session bus, under a name on the
    // form org.freedesktop.StatusNotifierHost-id where id is an unique identifier, that keeps
    // the names unique on the bus, such as the process-id of the application or another type
    // of identifier if more that one StatusNotifierHost is registered by the same process.

    let pid = std::process::id();
    let mut i = 0;
    loop {
        let wellknown_name = format!("{}-{}-{}", names::HOST_BUS_PREFIX, pid, i);
        let flags = [zbus::fdo::RequestNameFlags::DoNotQueue];

        use zbus::fdo::RequestNameReply::*;
        match con.request_name_with_flags(wellknown_name.as_str(), flags.into_iter().collect()).await? {
            PrimaryOwner => return Ok(wellknown_name),
            Exists => {}
            AlreadyOwner => {}
            InQueue => {
                return Err(Error::DbusError(zbus::Error::Failure(format!(
                    "got queued for {} even though queueing was disabled",
                    wellknown_name
                ))))
            }
        };

        i += 1;
    }
}

/// Register `name` as a host with the watcher behind `snw`.
pub async fn register_with_watcher(snw: &proxy::StatusNotifierWatcherProxy<'_>, name: &str) -> Result<()> {
    snw.register_status_notifier_host(name).await?;
    log::info!("registered {} with the watcher", name);
    Ok(())
}

/// Item registration as announced by the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherItemEvent {
    Registered(String),
    Unregistered(String),
}

/// Stream of the watcher's item registrations and unregistrations, in the order they were sent.
///
/// Signals with malformed arguments come through as `None`.
pub async fn watcher_events(
    snw: &proxy::StatusNotifierWatcherProxy<'static>,
) -> Result<impl OrderedStream<Data = Option<WatcherItemEvent>> + Unpin + Send> {
    let new_items = snw.receive_status_notifier_item_registered().await?;
    let gone_items = snw.receive_status_notifier_item_unregistered().await?;

    Ok(ordered_stream::join(
        OrderedStreamExt::map(new_items, |sig| match sig.args() {
            Ok(args) => Some(WatcherItemEvent::Registered(args.service.to_owned())),
            Err(e) => {
                log::warn!("malformed StatusNotifierItemRegistered: {}", e);
                None
            }
        }),
        OrderedStreamExt::map(gone_items, |sig| match sig.args() {
            Ok(args) => Some(WatcherItemEvent::Unregistered(args.service.to_owned())),
            Err(e) => {
                log::warn!("malformed StatusNotifierItemUnregistered: {}", e);
                None
            }
        }),
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Add(String),
        Update(String, Vec<Property>),
        Remove(String),
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        calls: Arc<Mutex<Vec<Call>>>,
        closed: Arc<Mutex<bool>>,
    }

    impl RecordingSink {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TraySink for RecordingSink {
        fn add_item(&mut self, item: &TrayItem) {
            self.calls.lock().unwrap().push(Call::Add(item.id.clone()));
        }

        fn update_item(&mut self, item: &TrayItem, changed: &[Property]) {
            self.calls.lock().unwrap().push(Call::Update(item.id.clone(), changed.to_vec()));
        }

        fn remove_item(&mut self, id: &str) {
            self.calls.lock().unwrap().push(Call::Remove(id.to_owned()));
        }

        fn is_closed(&self) -> bool {
            *self.closed.lock().unwrap()
        }
    }

    const NM: &str = ":1.50/org/ayatana/NotificationItem/nm_applet";

    fn loaded(id: &str, title: &str) -> ItemEvent {
        let mut item = TrayItem::new(id);
        item.properties.insert(Property::Title, PropertyValue::Text(title.to_owned()));
        ItemEvent::Loaded(item)
    }

    #[test]
    fn test_every_sink_gets_exactly_one_add() {
        let mut tray = Tray::new(1.0);
        let (a, b) = (RecordingSink::default(), RecordingSink::default());
        tray.attach_sink(Box::new(a.clone()));
        tray.attach_sink(Box::new(b.clone()));

        assert!(tray.track(NM));
        assert!(!tray.track(NM));
        tray.handle_item_event(loaded(NM, "Network"));

        assert_eq!(a.calls(), vec![Call::Add(NM.to_owned())]);
        assert_eq!(b.calls(), vec![Call::Add(NM.to_owned())]);
    }

    #[test]
    fn test_late_sink_gets_loaded_items_replayed() {
        let mut tray = Tray::new(1.0);
        tray.track(NM);
        tray.track(":1.7/StatusNotifierItem");
        tray.handle_item_event(loaded(NM, "Network"));

        let late = RecordingSink::default();
        tray.attach_sink(Box::new(late.clone()));
        assert_eq!(late.calls(), vec![Call::Add(NM.to_owned())]);
    }

    #[test]
    fn test_updates_and_removal_fan_out() {
        let mut tray = Tray::new(1.0);
        let sink = RecordingSink::default();
        tray.attach_sink(Box::new(sink.clone()));
        tray.track(NM);

        // nothing is shown before the item loaded
        tray.handle_item_event(ItemEvent::Updated { item: TrayItem::new(NM), changed: vec![Property::Title] });
        assert_eq!(sink.calls(), vec![]);

        tray.handle_item_event(loaded(NM, "Network"));
        let ItemEvent::Loaded(mut item) = loaded(NM, "Wi-Fi") else { unreachable!() };
        item.properties.insert(Property::Status, PropertyValue::Text("Active".to_owned()));
        tray.handle_item_event(ItemEvent::Updated { item, changed: vec![Property::Title, Property::Status] });
        assert_eq!(tray.item(NM).and_then(TrayItem::title), Some("Wi-Fi"));

        assert!(tray.untrack(NM));
        assert!(!tray.untrack(NM));
        assert_eq!(
            sink.calls(),
            vec![
                Call::Add(NM.to_owned()),
                Call::Update(NM.to_owned(), vec![Property::Title, Property::Status]),
                Call::Remove(NM.to_owned()),
            ]
        );
    }

    #[test]
    fn test_unloaded_items_are_removed_silently() {
        let mut tray = Tray::new(1.0);
        let sink = RecordingSink::default();
        tray.attach_sink(Box::new(sink.clone()));
        tray.track(NM);
        tray.untrack(NM);
        tray.handle_item_event(loaded(NM, "Network"));
        assert_eq!(sink.calls(), vec![]);
        assert_eq!(tray.items().count(), 0);
    }

    #[test]
    fn test_reconcile_picks_up_existing_items() {
        let tray = Tray::new(1.0);
        let registered = vec![NM.to_owned(), ":1.7/StatusNotifierItem".to_owned(), NM.to_owned()];
        let (to_add, to_remove) = tray.reconcile(&registered);
        assert_eq!(to_add, vec![NM.to_owned(), ":1.7/StatusNotifierItem".to_owned()]);
        assert_eq!(to_remove, Vec::<String>::new());
    }

    #[test]
    fn test_reconcile_after_watcher_restart() {
        const GONE: &str = ":1.7/StatusNotifierItem";
        const NEW: &str = ":1.9/StatusNotifierItem";
        let mut tray = Tray::new(1.0);
        let (a, b) = (RecordingSink::default(), RecordingSink::default());
        tray.attach_sink(Box::new(a.clone()));
        tray.attach_sink(Box::new(b.clone()));
        for id in [NM, GONE] {
            tray.track(id);
            tray.handle_item_event(loaded(id, "x"));
        }

        let (to_add, to_remove) = tray.reconcile(&[NM.to_owned(), NEW.to_owned()]);
        assert_eq!(to_add, vec![NEW.to_owned()]);
        assert_eq!(to_remove, vec![GONE.to_owned()]);

        for id in &to_remove {
            tray.untrack(id);
        }
        for id in &to_add {
            tray.track(id);
            tray.handle_item_event(loaded(id, "x"));
        }
        assert_eq!(tray.ids().collect::<Vec<_>>(), vec![NM, NEW]);
        for sink in [a, b] {
            assert_eq!(
                sink.calls(),
                vec![
                    Call::Add(NM.to_owned()),
                    Call::Add(GONE.to_owned()),
                    Call::Remove(GONE.to_owned()),
                    Call::Add(NEW.to_owned()),
                ]
            );
        }
        assert_eq!(tray.reconcile(&[NM.to_owned(), NEW.to_owned()]), (vec![], vec![]));
    }

    #[test]
    fn test_closed_sinks_are_pruned() {
        let mut tray = Tray::new(1.0);
        let (open, closing) = (RecordingSink::default(), RecordingSink::default());
        tray.attach_sink(Box::new(open.clone()));
        tray.attach_sink(Box::new(closing.clone()));
        assert_eq!(tray.sink_count(), 2);

        *closing.closed.lock().unwrap() = true;
        tray.track(NM);
        tray.handle_item_event(loaded(NM, "Network"));
        assert_eq!(tray.sink_count(), 1);

        tray.untrack(NM);
        assert_eq!(open.calls(), vec![Call::Add(NM.to_owned()), Call::Remove(NM.to_owned())]);
        assert_eq!(closing.calls(), vec![Call::Add(NM.to_owned())]);
    }
}
