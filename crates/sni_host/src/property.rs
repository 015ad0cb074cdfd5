use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::*;

/// The properties of [`org.kde.StatusNotifierItem`] that are mirrored locally.
///
/// This set is fixed: a property cache never holds anything else, and names received from the bus
/// that are not part of it are ignored.
///
/// [`org.kde.StatusNotifierItem`]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierItem/
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum Property {
    Id,
    Category,
    Title,
    Status,
    WindowId,
    IconName,
    IconPixmap,
    OverlayIconName,
    OverlayIconPixmap,
    AttentionIconName,
    AttentionIconPixmap,
    AttentionMovieName,
    ToolTip,
    IconThemePath,
    ItemIsMenu,
    Menu,
}

impl Property {
    /// Every property, in declaration order.
    pub fn all() -> impl Iterator<Item = Property> {
        <Property as strum::IntoEnumIterator>::iter()
    }

    /// Parse a property name as sent over the bus, ignoring names outside the fixed set.
    pub fn from_dbus_name(name: &str) -> Option<Property> {
        name.parse().ok()
    }
}

/// Recognised values of [`org.freedesktop.StatusNotifierItem.Status`].
///
/// [`org.freedesktop.StatusNotifierItem.Status`]: https://www.freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierItem/#org.freedesktop.statusnotifieritem.status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    /// The item doesn't convey important information to the user, it can be considered an "idle"
    /// status and is likely that visualizations will chose to hide it.
    Passive,
    /// The item is active, is more important that the item will be shown in some way to the user.
    Active,
    /// The item carries really important information for the user, such as battery charge running
    /// out and is wants to incentive the direct user intervention. Visualizations should emphasize
    /// in some way the items with NeedsAttention status.
    NeedsAttention,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ParseStatusError;

impl std::str::FromStr for Status {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> std::result::Result<Self, ParseStatusError> {
        match s {
            "Passive" => Ok(Status::Passive),
            "Active" => Ok(Status::Active),
            "NeedsAttention" => Ok(Status::NeedsAttention),
            _ => Err(ParseStatusError),
        }
    }
}

/// Tooltip as carried by the `ToolTip` property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolTip {
    pub icon_name: String,
    pub icon_pixmap: Vec<Pixmap>,
    pub title: String,
    pub description: String,
}

/// Typed value of a single [`Property`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Text(String),
    WindowId(i32),
    Pixmaps(Vec<Pixmap>),
    ToolTip(ToolTip),
    Flag(bool),
    ObjectPath(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) | PropertyValue::ObjectPath(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            PropertyValue::Flag(b) => Some(*b),
            _ => None,
        }
    }
}

/// The locally cached properties of one tray item.
///
/// Only properties the remote object actually provided are present; there is no "null" value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PropertyCache(BTreeMap<Property, PropertyValue>);

impl PropertyCache {
    pub fn get(&self, property: Property) -> Option<&PropertyValue> {
        self.0.get(&property)
    }

    pub fn insert(&mut self, property: Property, value: PropertyValue) -> Option<PropertyValue> {
        self.0.insert(property, value)
    }

    pub fn remove(&mut self, property: Property) -> Option<PropertyValue> {
        self.0.remove(&property)
    }

    pub fn contains(&self, property: Property) -> bool {
        self.0.contains_key(&property)
    }

    pub fn keys(&self) -> impl Iterator<Item = Property> + '_ {
        self.0.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Properties that an item turned out to support while it was first loaded.
///
/// Later signal subscriptions are gated on this set, so that we never listen for changes of
/// something the item does not have.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities(BTreeSet<Property>);

impl Capabilities {
    pub fn supports(&self, property: Property) -> bool {
        self.0.contains(&property)
    }

    pub fn supports_any(&self, properties: &[Property]) -> bool {
        properties.iter().any(|p| self.supports(*p))
    }

    pub(crate) fn record(&mut self, property: Property) {
        self.0.insert(property);
    }
}

impl FromIterator<Property> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Property>>(iter: I) -> Self {
        Capabilities(iter.into_iter().collect())
    }
}

/// Snapshot of one tray item, as handed to [`TraySink`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrayItem {
    pub id: String,
    #[serde(flatten)]
    pub properties: PropertyCache,
}

impl TrayItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), properties: PropertyCache::default() }
    }

    pub fn status(&self) -> Option<Status> {
        self.properties.get(Property::Status)?.as_str()?.parse().ok()
    }

    pub fn title(&self) -> Option<&str> {
        self.properties.get(Property::Title)?.as_str()
    }

    /// Whether the item asked to only ever show its menu when clicked.
    pub fn item_is_menu(&self) -> bool {
        self.properties.get(Property::ItemIsMenu).and_then(PropertyValue::as_flag).unwrap_or(false)
    }

    /// Object path of the item's dbusmenu, if it has a usable one.
    pub fn menu_path(&self) -> Option<&str> {
        match self.properties.get(Property::Menu)?.as_str()? {
            "" | "/" => None,
            path => Some(path),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_property_names_roundtrip_dbus_names() {
        assert_eq!(Property::from_dbus_name("IconThemePath"), Some(Property::IconThemePath));
        assert_eq!(Property::from_dbus_name("ToolTip"), Some(Property::ToolTip));
        assert_eq!(Property::from_dbus_name("XAyatanaLabel"), None);
        assert_eq!(Property::Menu.to_string(), "Menu");
        assert_eq!(Property::all().count(), 16);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("NeedsAttention".parse::<Status>(), Ok(Status::NeedsAttention));
        assert_eq!("passive".parse::<Status>(), Err(ParseStatusError));
    }

    #[test]
    fn test_menu_path_ignores_root() {
        let mut item = TrayItem::new(":1.5/StatusNotifierItem");
        item.properties.insert(Property::Menu, PropertyValue::ObjectPath("/".to_owned()));
        assert_eq!(item.menu_path(), None);
        item.properties.insert(Property::Menu, PropertyValue::ObjectPath("/MenuBar".to_owned()));
        assert_eq!(item.menu_path(), Some("/MenuBar"));
    }

    #[test]
    fn test_serialize_item_flattens_properties() {
        let mut item = TrayItem::new(":1.5/StatusNotifierItem");
        item.properties.insert(Property::Title, PropertyValue::Text("nm-applet".to_owned()));
        item.properties.insert(Property::ItemIsMenu, PropertyValue::Flag(false));
        assert_eq!(
            serde_json::to_value(&item).unwrap(),
            serde_json::json!({ "id": ":1.5/StatusNotifierItem", "Title": "nm-applet", "ItemIsMenu": false })
        );
    }
}
