use std::pin::Pin;

use crate::*;

use futures::{Stream, StreamExt};
use serde::Deserialize;
use zbus::fdo::IntrospectableProxy;

/// Receives the changes of a single tray item.
///
/// The listener is handed to [`Item::maintain`] and is the only way an item reports anything. An
/// item going away is not reported here; that is the watcher's job.
pub trait ItemListener: Send {
    /// The item's properties were fetched for the first time.
    fn on_loaded(&mut self, item: &TrayItem);

    /// Some properties changed. `changed` only contains properties that were actually (re)fetched
    /// or removed, never names the item doesn't support.
    fn on_updated(&mut self, item: &TrayItem, changed: &[Property]);

    /// The item's menu became reachable (`Some`) or unreachable (`None`).
    fn on_menu_changed(&mut self, _id: &str, _menu: Option<proxy::DBusMenuProxy<'static>>) {}
}

/// Event produced by an item, as forwarded by [`ChannelListener`].
#[derive(Debug)]
pub enum ItemEvent {
    Loaded(TrayItem),
    Updated { item: TrayItem, changed: Vec<Property> },
    MenuChanged { id: String, menu: Option<proxy::DBusMenuProxy<'static>> },
}

/// [`ItemListener`] that forwards everything into a channel, so that items running as their own
/// tasks can report back to a [`Host`].
#[derive(Debug, Clone)]
pub struct ChannelListener(pub tokio::sync::mpsc::UnboundedSender<ItemEvent>);

impl ChannelListener {
    fn send(&self, event: ItemEvent) {
        if self.0.send(event).is_err() {
            log::debug!("item event dropped, host is gone");
        }
    }
}

impl ItemListener for ChannelListener {
    fn on_loaded(&mut self, item: &TrayItem) {
        self.send(ItemEvent::Loaded(item.clone()));
    }

    fn on_updated(&mut self, item: &TrayItem, changed: &[Property]) {
        self.send(ItemEvent::Updated { item: item.clone(), changed: changed.to_vec() });
    }

    fn on_menu_changed(&mut self, id: &str, menu: Option<proxy::DBusMenuProxy<'static>>) {
        self.send(ItemEvent::MenuChanged { id: id.to_owned(), menu });
    }
}

/// Result of fetching a batch of properties. `None` means the fetch failed, for whatever reason.
pub type Fetched = Vec<(Property, Option<PropertyValue>)>;

/// The local mirror of one item: its property cache and what it turned out to support.
#[derive(Debug, Clone)]
pub struct ItemState {
    item: TrayItem,
    capabilities: Capabilities,
    loaded: bool,
}

impl ItemState {
    pub fn new(id: impl Into<String>) -> Self {
        Self { item: TrayItem::new(id), capabilities: Capabilities::default(), loaded: false }
    }

    pub fn item(&self) -> &TrayItem {
        &self.item
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Apply the initial bulk fetch. Whatever fetched successfully makes up the capabilities.
    pub fn load(&mut self, fetched: Fetched, listener: &mut dyn ItemListener) {
        for (property, value) in fetched {
            if let Some(value) = value {
                self.capabilities.record(property);
                self.item.properties.insert(property, value);
            }
        }
        self.loaded = true;
        listener.on_loaded(&self.item);
    }

    /// Apply a re-fetch and a set of invalidated properties, reporting what changed.
    ///
    /// Properties that failed to fetch are left alone and not reported. Invalidated properties are
    /// removed from the cache, and reported if they were there. If nothing changed, the listener
    /// isn't called.
    pub fn apply(&mut self, fetched: Fetched, invalidated: &[Property], listener: &mut dyn ItemListener) -> Vec<Property> {
        let mut changed = Vec::new();
        for property in invalidated {
            if self.item.properties.remove(*property).is_some() && !changed.contains(property) {
                changed.push(*property);
            }
        }
        for (property, value) in fetched {
            if let Some(value) = value {
                self.capabilities.record(property);
                self.item.properties.insert(property, value);
                if !changed.contains(&property) {
                    changed.push(property);
                }
            }
        }

        if self.loaded && !changed.is_empty() {
            listener.on_updated(&self.item, &changed);
        }
        changed
    }
}

/// The specific change signals of `org.kde.StatusNotifierItem`, each implying that a fixed set of
/// properties changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSignal {
    NewTitle,
    NewIcon,
    NewAttentionIcon,
    NewOverlayIcon,
    NewToolTip,
    NewIconThemePath,
    NewStatus,
}

impl ChangeSignal {
    pub fn implicated(self) -> &'static [Property] {
        use Property::*;
        match self {
            ChangeSignal::NewTitle => &[Title],
            ChangeSignal::NewIcon => &[IconName, IconPixmap],
            ChangeSignal::NewAttentionIcon => &[AttentionIconName, AttentionIconPixmap, AttentionMovieName],
            ChangeSignal::NewOverlayIcon => &[OverlayIconName, OverlayIconPixmap],
            ChangeSignal::NewToolTip => &[ToolTip],
            ChangeSignal::NewIconThemePath => &[IconThemePath],
            ChangeSignal::NewStatus => &[Status],
        }
    }
}

/// What a received signal asks of us.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ItemSignal {
    Refetch(&'static [Property]),
    Changed { changed: Vec<Property>, invalidated: Vec<Property> },
}

type SignalStream = Pin<Box<dyn Stream<Item = ItemSignal> + Send>>;

/// A StatusNotifierItem (SNI).
///
/// Wraps the proxy of the remote object. Cloning is cheap and yields a handle to the same object.
#[derive(Debug, Clone)]
pub struct Item {
    /// Identity of this item, as published by the watcher.
    pub id: String,
    /// The StatusNotifierItem that is wrapped by this instance.
    pub sni: proxy::StatusNotifierItemProxy<'static>,
}

impl Item {
    /// Create an instance from the service's address.
    ///
    /// The format of `addr` is `{bus}{object_path}` (e.g.
    /// `:1.50/org/ayatana/NotificationItem/nm_applet`), which is the format that is used for
    /// StatusNotifierWatcher's [RegisteredStatusNotifierItems property][rsni]). If the address
    /// has no path, the item's object tree is searched for it.
    ///
    /// [rsni]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierWatcher/#registeredstatusnotifieritems
    pub async fn from_address(con: &zbus::Connection, service: &str) -> Result<Self> {
        let addr: PartialAddress = service.parse()?;
        let path = match addr.path {
            Some(path) => path,
            None => resolve_pathless_address(con, &addr.service, "/".to_owned())
                .await?
                .ok_or_else(|| Error::DbusAddressError(format!("no StatusNotifierItem found for {service}")))?,
        };

        let sni = proxy::StatusNotifierItemProxy::builder(con)
            .destination(addr.service)?
            .path(path)?
            .cache_properties(zbus::proxy::CacheProperties::No)
            .build()
            .await?;

        Ok(Self { id: service.to_owned(), sni })
    }

    /// Fetch the given properties. Properties that can't be fetched come back as `None`.
    pub async fn fetch(&self, properties: impl IntoIterator<Item = Property>) -> Fetched {
        let fetches = properties.into_iter().map(|property| async move {
            match self.fetch_one(property).await {
                Ok(value) => (property, Some(value)),
                Err(e) => {
                    log::debug!("{}: could not fetch {}: {}", self.id, property, e);
                    (property, None)
                }
            }
        });
        futures::future::join_all(fetches).await
    }

    async fn fetch_one(&self, property: Property) -> zbus::Result<PropertyValue> {
        let sni = &self.sni;
        let value = match property {
            Property::Id => PropertyValue::Text(sni.id().await?),
            Property::Category => PropertyValue::Text(sni.category().await?),
            Property::Title => PropertyValue::Text(sni.title().await?),
            Property::Status => {
                let status = sni.status().await?;
                if status.parse::<Status>().is_err() {
                    return Err(zbus::Error::Failure(format!("Invalid status {:?}", status)));
                }
                PropertyValue::Text(status)
            }
            Property::WindowId => PropertyValue::WindowId(sni.window_id().await?),
            Property::IconName => PropertyValue::Text(sni.icon_name().await?),
            Property::IconPixmap => PropertyValue::Pixmaps(pixmaps_from_raw(sni.icon_pixmap().await?)),
            Property::OverlayIconName => PropertyValue::Text(sni.overlay_icon_name().await?),
            Property::OverlayIconPixmap => PropertyValue::Pixmaps(pixmaps_from_raw(sni.overlay_icon_pixmap().await?)),
            Property::AttentionIconName => PropertyValue::Text(sni.attention_icon_name().await?),
            Property::AttentionIconPixmap => PropertyValue::Pixmaps(pixmaps_from_raw(sni.attention_icon_pixmap().await?)),
            Property::AttentionMovieName => PropertyValue::Text(sni.attention_movie_name().await?),
            Property::ToolTip => {
                let (icon_name, icon_pixmap, title, description) = sni.tool_tip().await?;
                PropertyValue::ToolTip(ToolTip { icon_name, icon_pixmap: pixmaps_from_raw(icon_pixmap), title, description })
            }
            Property::IconThemePath => PropertyValue::Text(sni.icon_theme_path().await?),
            Property::ItemIsMenu => PropertyValue::Flag(sni.item_is_menu().await?),
            Property::Menu => PropertyValue::ObjectPath(sni.menu().await?.as_str().to_owned()),
        };
        Ok(value)
    }

    /// Keep the item's state in sync with the remote object until it leaves the bus.
    ///
    /// Waits for the service to be reachable, loads all properties, and then follows the change
    /// signals of everything the item turned out to support.
    pub async fn maintain(self, mut listener: impl ItemListener) {
        let con = self.sni.inner().connection().clone();
        let service = self.sni.inner().destination().to_owned();

        if let Err(e) = wait_for_service(&con, service.clone()).await {
            log::warn!("{} never became available: {}", self.id, e);
            return;
        }

        let mut state = ItemState::new(self.id.clone());
        state.load(self.fetch(Property::all()).await, &mut listener);

        let mut menu_path = state.item().menu_path().map(str::to_owned);
        if let Some(path) = &menu_path {
            listener.on_menu_changed(&self.id, self.bind_menu(path).await);
        }

        let mut signals = match self.subscribe(state.capabilities()).await {
            Ok(s) => s,
            Err(e) => {
                log::warn!("could not subscribe to changes of {}: {}", self.id, e);
                futures::stream::select_all(Vec::new())
            }
        };

        let exit = wait_for_service_exit(&con, service.clone());
        tokio::pin!(exit);

        loop {
            let signal = tokio::select! {
                _ = &mut exit => break,
                signal = signals.next() => signal,
            };
            let (fetched, invalidated) = match signal {
                Some(ItemSignal::Refetch(properties)) => (self.fetch(properties.iter().copied()).await, Vec::new()),
                Some(ItemSignal::Changed { changed, invalidated }) => {
                    let refetch: Vec<_> = changed.into_iter().filter(|p| !invalidated.contains(p)).collect();
                    (self.fetch(refetch).await, invalidated)
                }
                None => {
                    // no more signals, but the item may still be around
                    if let Err(e) = (&mut exit).await {
                        log::warn!("lost track of {}: {}", self.id, e);
                    }
                    break;
                }
            };
            state.apply(fetched, &invalidated, &mut listener);

            let new_menu_path = state.item().menu_path().map(str::to_owned);
            if new_menu_path != menu_path {
                menu_path = new_menu_path;
                let menu = match &menu_path {
                    Some(path) => self.bind_menu(path).await,
                    None => None,
                };
                listener.on_menu_changed(&self.id, menu);
            }
        }

        log::debug!("{} left the bus", self.id);
        if menu_path.is_some() {
            listener.on_menu_changed(&self.id, None);
        }
    }

    async fn bind_menu(&self, path: &str) -> Option<proxy::DBusMenuProxy<'static>> {
        let menu = async {
            proxy::DBusMenuProxy::builder(self.sni.inner().connection())
                .destination(self.sni.inner().destination().to_owned())?
                .path(path.to_owned())?
                .cache_properties(zbus::proxy::CacheProperties::No)
                .build()
                .await
        };
        match menu.await {
            Ok(menu) => Some(menu),
            Err(e) => {
                log::warn!("failed to bind menu {} of {}: {}", path, self.id, e);
                None
            }
        }
    }

    /// Subscribe to `PropertiesChanged` and to every specific change signal that concerns a
    /// property the item supports.
    async fn subscribe(&self, capabilities: &Capabilities) -> zbus::Result<futures::stream::SelectAll<SignalStream>> {
        let mut streams: Vec<SignalStream> = Vec::new();

        let props = zbus::fdo::PropertiesProxy::builder(self.sni.inner().connection())
            .destination(self.sni.inner().destination().to_owned())?
            .path(self.sni.inner().path().to_owned())?
            .cache_properties(zbus::proxy::CacheProperties::No)
            .build()
            .await?;
        streams.push(Box::pin(props.receive_properties_changed().await?.map(|sig| match sig.args() {
            Ok(args) if args.interface_name().as_str() == names::ITEM_INTERFACE => ItemSignal::Changed {
                changed: args.changed_properties().keys().filter_map(|name| Property::from_dbus_name(name)).collect(),
                invalidated: args.invalidated_properties().iter().filter_map(|name| Property::from_dbus_name(name)).collect(),
            },
            _ => ItemSignal::Changed { changed: Vec::new(), invalidated: Vec::new() },
        })));

        let sni = &self.sni;
        macro_rules! subscribe_to {
            ($signal:expr, $receive:ident) => {
                if capabilities.supports_any($signal.implicated()) {
                    let implicated = $signal.implicated();
                    streams.push(Box::pin(sni.$receive().await?.map(move |_| ItemSignal::Refetch(implicated))));
                }
            };
        }
        subscribe_to!(ChangeSignal::NewTitle, receive_new_title);
        subscribe_to!(ChangeSignal::NewIcon, receive_new_icon);
        subscribe_to!(ChangeSignal::NewAttentionIcon, receive_new_attention_icon);
        subscribe_to!(ChangeSignal::NewOverlayIcon, receive_new_overlay_icon);
        subscribe_to!(ChangeSignal::NewToolTip, receive_new_tool_tip);
        subscribe_to!(ChangeSignal::NewIconThemePath, receive_new_icon_theme_path);
        subscribe_to!(ChangeSignal::NewStatus, receive_new_status);

        Ok(futures::stream::select_all(streams))
    }

    /// Ask the item to perform its primary action.
    pub async fn activate(&self, x: i32, y: i32) -> zbus::Result<()> {
        self.sni.activate(x, y).await
    }

    /// Ask the item to perform its secondary action (usually on middle click).
    pub async fn secondary_action(&self, x: i32, y: i32) -> zbus::Result<()> {
        self.sni.secondary_activate(x, y).await
    }

    /// Ask the item to show its own context menu.
    pub async fn context_menu(&self, x: i32, y: i32) -> zbus::Result<()> {
        self.sni.context_menu(x, y).await
    }

    pub async fn scroll(&self, distance: i32, orientation: Orientation) -> zbus::Result<()> {
        self.sni.scroll(distance, orientation.as_ref()).await
    }
}

#[derive(Deserialize)]
struct DBusNode {
    #[serde(default)]
    interface: Vec<DBusInterface>,

    #[serde(default)]
    node: Vec<DBusNode>,

    #[serde(rename = "@name")]
    name: Option<String>,
}

#[derive(Deserialize)]
struct DBusInterface {
    #[serde(rename = "@name")]
    name: String,
}

async fn resolve_pathless_address(con: &zbus::Connection, service: &str, path: String) -> zbus::Result<Option<String>> {
    let introspection_xml =
        IntrospectableProxy::builder(con).destination(service)?.path(path.as_str())?.build().await?.introspect().await?;

    let dbus_node =
        quick_xml::de::from_str::<DBusNode>(&introspection_xml).map_err(|err| zbus::Error::Failure(err.to_string()))?;

    if dbus_node.interface.iter().any(|interface| interface.name == names::ITEM_INTERFACE) {
        // This item implements the desired interface, so bubble it back up
        Ok(Some(path))
    } else {
        for node in dbus_node.node {
            if let Some(name) = node.name {
                if name == "StatusNotifierItem" {
                    // If this exists, then there's a good chance DBus may not think anything
                    // implements the desired interface, so just bubble this up instead.
                    return Ok(Some(join_to_path(&path, name)));
                }

                let path = Box::pin(resolve_pathless_address(con, service, join_to_path(&path, name))).await?;

                if path.is_some() {
                    // Return the first item found from a child
                    return Ok(path);
                }
            }
        }

        // No children had the item we want...
        Ok(None)
    }
}

fn join_to_path(path: &str, name: String) -> String {
    // Make sure we don't double-up on the leading slash
    format!("{path}/{name}", path = if path == "/" { "" } else { path })
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Recorder {
        loaded: Vec<TrayItem>,
        updated: Vec<Vec<Property>>,
    }

    impl ItemListener for Recorder {
        fn on_loaded(&mut self, item: &TrayItem) {
            self.loaded.push(item.clone());
        }

        fn on_updated(&mut self, _item: &TrayItem, changed: &[Property]) {
            self.updated.push(changed.to_vec());
        }
    }

    fn text(s: &str) -> Option<PropertyValue> {
        Some(PropertyValue::Text(s.to_owned()))
    }

    fn loaded_state(recorder: &mut Recorder) -> ItemState {
        let mut state = ItemState::new(":1.5/StatusNotifierItem");
        let fetched = Property::all()
            .map(|p| match p {
                Property::Title => (p, text("Network")),
                Property::Status => (p, text("Active")),
                Property::IconName => (p, text("nm-signal-100")),
                _ => (p, None),
            })
            .collect();
        state.load(fetched, recorder);
        state
    }

    #[test]
    fn test_load_records_capabilities() {
        let mut recorder = Recorder::default();
        let state = loaded_state(&mut recorder);

        assert_eq!(recorder.loaded.len(), 1);
        assert_eq!(state.item().properties.keys().collect::<Vec<_>>(), vec![Property::Title, Property::Status, Property::IconName]);
        assert!(state.capabilities().supports(Property::Title));
        assert!(!state.capabilities().supports(Property::ToolTip));
        assert!(state.capabilities().supports_any(ChangeSignal::NewIcon.implicated()));
        assert!(!state.capabilities().supports_any(ChangeSignal::NewAttentionIcon.implicated()));
    }

    #[test]
    fn test_failed_refetch_is_not_reported() {
        let mut recorder = Recorder::default();
        let mut state = loaded_state(&mut recorder);

        let changed = state.apply(vec![(Property::Title, text("Wi-Fi")), (Property::Category, None)], &[], &mut recorder);
        assert_eq!(changed, vec![Property::Title]);
        assert_eq!(recorder.updated, vec![vec![Property::Title]]);
        assert_eq!(state.item().title(), Some("Wi-Fi"));
        assert!(!state.item().properties.contains(Property::Category));
    }

    #[test]
    fn test_all_failed_refetch_is_silent() {
        let mut recorder = Recorder::default();
        let mut state = loaded_state(&mut recorder);

        state.apply(vec![(Property::ToolTip, None), (Property::WindowId, None)], &[], &mut recorder);
        assert!(recorder.updated.is_empty());
    }

    #[test]
    fn test_invalidated_properties_are_removed() {
        let mut recorder = Recorder::default();
        let mut state = loaded_state(&mut recorder);

        let changed = state.apply(Vec::new(), &[Property::IconName, Property::ToolTip], &mut recorder);
        assert_eq!(changed, vec![Property::IconName]);
        assert!(!state.item().properties.contains(Property::IconName));
        assert_eq!(recorder.updated, vec![vec![Property::IconName]]);
    }

    #[test]
    fn test_unknown_names_never_reach_the_cache() {
        let mut recorder = Recorder::default();
        let mut state = loaded_state(&mut recorder);

        let changed: Vec<Property> =
            ["Title", "XAyatanaLabel", "IconAccessibleDesc"].into_iter().filter_map(Property::from_dbus_name).collect();
        let fetched = changed.iter().map(|p| (*p, text("x"))).collect();
        state.apply(fetched, &[], &mut recorder);

        assert_eq!(recorder.updated, vec![vec![Property::Title]]);
        assert!(state.item().properties.keys().all(|k| Property::all().any(|p| p == k)));
    }

    #[test]
    fn test_join_to_path() {
        assert_eq!(join_to_path("/", "StatusNotifierItem".to_owned()), "/StatusNotifierItem");
        assert_eq!(join_to_path("/org/ayatana", "NotificationItem".to_owned()), "/org/ayatana/NotificationItem");
    }
}
