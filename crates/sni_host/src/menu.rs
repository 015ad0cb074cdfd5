//! Turning user input on a tray item into calls on the item or its menu.
//!
//! A rendered tray item never talks to the bus directly. It hands button presses and scroll
//! events to the item's [`MenuBridge`], which decides what the remote side should be asked to do.

use serde::{Deserialize, Serialize};
use zbus::zvariant::Value;

use crate::*;

/// Association between a tray item and its remote menu object.
#[derive(Debug, Clone, Default)]
pub enum MenuBinding {
    #[default]
    Unbound,
    Bound(proxy::DBusMenuProxy<'static>),
}

impl MenuBinding {
    pub fn is_bound(&self) -> bool {
        matches!(self, MenuBinding::Bound(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// What a button press on a tray item results in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputAction {
    /// Show the item's dbusmenu locally.
    OpenMenu,
    /// Ask the item to show its own menu.
    ContextMenu,
    Activate,
    SecondaryAction,
}

/// Decide what a button press does.
///
/// The right button, and the left button on items that are only a menu, open the menu. Without a
/// bound menu the item is asked to show its own instead.
pub fn route_button(button: MouseButton, item_is_menu: bool, menu_bound: bool) -> InputAction {
    let menu = if menu_bound { InputAction::OpenMenu } else { InputAction::ContextMenu };
    match button {
        MouseButton::Right => menu,
        MouseButton::Left if item_is_menu => menu,
        MouseButton::Left => InputAction::Activate,
        MouseButton::Middle => InputAction::SecondaryAction,
    }
}

/// Scroll axis, as passed to `org.kde.StatusNotifierItem.Scroll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Orientation {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScrollInput {
    /// A notch of a scroll wheel.
    Discrete(ScrollDirection),
    /// High resolution scrolling, e.g. from a touchpad.
    Smooth { dx: f64, dy: f64 },
}

/// Accumulates smooth scroll deltas per axis until they are worth telling the item about.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollAccumulator {
    threshold: f64,
    dx: f64,
    dy: f64,
}

impl ScrollAccumulator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold, dx: 0.0, dy: 0.0 }
    }

    /// Accumulated, not yet emitted delta as `(dx, dy)`.
    pub fn pending(&self) -> (f64, f64) {
        (self.dx, self.dy)
    }

    /// Feed a scroll event, returning the scroll calls that should be made.
    pub fn feed(&mut self, input: ScrollInput) -> Vec<(i32, Orientation)> {
        match input {
            ScrollInput::Discrete(direction) => vec![match direction {
                ScrollDirection::Up => (-1, Orientation::Vertical),
                ScrollDirection::Down => (1, Orientation::Vertical),
                ScrollDirection::Left => (-1, Orientation::Horizontal),
                ScrollDirection::Right => (1, Orientation::Horizontal),
            }],
            ScrollInput::Smooth { dx, dy } => {
                // NaN and infinities carry no usable distance
                if dx.is_finite() {
                    self.dx += dx;
                }
                if dy.is_finite() {
                    self.dy += dy;
                }
                let mut out = Vec::new();
                if let Some(distance) = drain(&mut self.dx, self.threshold) {
                    out.push((distance, Orientation::Horizontal));
                }
                if let Some(distance) = drain(&mut self.dy, self.threshold) {
                    out.push((distance, Orientation::Vertical));
                }
                out
            }
        }
    }
}

/// Largest distance sent in a single scroll call.
const MAX_SCROLL_DISTANCE: f64 = 1000.0;

fn drain(acc: &mut f64, threshold: f64) -> Option<i32> {
    if !acc.is_finite() {
        *acc = 0.0;
        return None;
    }
    if *acc == 0.0 || acc.abs() < threshold {
        return None;
    }
    let rounded = acc.round().clamp(-MAX_SCROLL_DISTANCE, MAX_SCROLL_DISTANCE) as i32;
    let distance = if rounded == 0 { acc.signum() as i32 } else { rounded };
    *acc = 0.0;
    Some(distance)
}

/// Input handling state of one tray item.
#[derive(Debug, Clone)]
pub struct MenuBridge {
    binding: MenuBinding,
    scroll: ScrollAccumulator,
}

impl MenuBridge {
    pub fn new(scroll_threshold: f64) -> Self {
        Self { binding: MenuBinding::Unbound, scroll: ScrollAccumulator::new(scroll_threshold) }
    }

    pub fn bind(&mut self, menu: Option<proxy::DBusMenuProxy<'static>>) {
        self.binding = match menu {
            Some(menu) => MenuBinding::Bound(menu),
            None => MenuBinding::Unbound,
        };
    }

    pub fn menu(&self) -> Option<&proxy::DBusMenuProxy<'static>> {
        match &self.binding {
            MenuBinding::Bound(menu) => Some(menu),
            MenuBinding::Unbound => None,
        }
    }

    pub fn route(&self, button: MouseButton, item_is_menu: bool) -> InputAction {
        route_button(button, item_is_menu, self.binding.is_bound())
    }

    pub fn scroll(&mut self, input: ScrollInput) -> Vec<(i32, Orientation)> {
        self.scroll.feed(input)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[default]
    Standard,
    Separator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleKind {
    Checkmark,
    Radio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Toggle {
    pub kind: ToggleKind,
    /// 0 is off, 1 is on, anything else is indeterminate.
    pub state: i32,
}

/// One entry of a dbusmenu layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuEntry {
    pub id: i32,
    pub label: String,
    pub enabled: bool,
    pub visible: bool,
    pub kind: EntryKind,
    pub toggle: Option<Toggle>,
    pub icon_name: Option<String>,
    pub children: Vec<MenuEntry>,
}

impl MenuEntry {
    fn from_parts<'a>(
        id: i32,
        properties: impl IntoIterator<Item = (&'a str, &'a Value<'a>)>,
        children: Vec<MenuEntry>,
    ) -> Self {
        let mut entry = MenuEntry {
            id,
            label: String::new(),
            enabled: true,
            visible: true,
            kind: EntryKind::Standard,
            toggle: None,
            icon_name: None,
            children,
        };
        let mut toggle_kind = None;
        let mut toggle_state = -1;

        for (key, value) in properties {
            match (key, peel(value)) {
                ("label", Value::Str(s)) => entry.label = strip_mnemonic(s.as_str()),
                ("enabled", Value::Bool(b)) => entry.enabled = *b,
                ("visible", Value::Bool(b)) => entry.visible = *b,
                ("type", Value::Str(s)) if s.as_str() == "separator" => entry.kind = EntryKind::Separator,
                ("icon-name", Value::Str(s)) if !s.as_str().is_empty() => entry.icon_name = Some(s.as_str().to_owned()),
                ("toggle-type", Value::Str(s)) => {
                    toggle_kind = match s.as_str() {
                        "checkmark" => Some(ToggleKind::Checkmark),
                        "radio" => Some(ToggleKind::Radio),
                        _ => None,
                    }
                }
                ("toggle-state", Value::I32(state)) => toggle_state = *state,
                _ => {}
            }
        }
        entry.toggle = toggle_kind.map(|kind| Toggle { kind, state: toggle_state });
        entry
    }

    /// Parse a `(ia{sv}av)` layout as returned by `GetLayout`.
    pub fn from_layout(layout: &proxy::RawLayout) -> Self {
        let (id, properties, children) = layout;
        let children = children.iter().filter_map(|child| Self::from_value(child)).collect();
        Self::from_parts(*id, properties.iter().map(|(k, v)| (k.as_str(), &**v)), children)
    }

    fn from_value(value: &Value<'_>) -> Option<Self> {
        let Value::Structure(structure) = peel(value) else {
            log::debug!("ignoring malformed menu entry {:?}", value);
            return None;
        };
        let (id, properties, children) = match structure.fields() {
            [Value::I32(id), Value::Dict(properties), Value::Array(children)] => (*id, properties, children),
            _ => {
                log::debug!("ignoring malformed menu entry {:?}", structure);
                return None;
            }
        };
        let children = children.iter().filter_map(|child| Self::from_value(child)).collect();
        let properties = properties.iter().filter_map(|(k, v)| match peel(k) {
            Value::Str(k) => Some((k.as_str(), v)),
            _ => None,
        });
        Some(Self::from_parts(id, properties, children))
    }
}

fn peel<'a, 'v>(value: &'a Value<'v>) -> &'a Value<'v> {
    match value {
        Value::Value(inner) => peel(inner),
        value => value,
    }
}

/// Remove the access key markers of a dbusmenu label. A doubled underscore is a literal one.
fn strip_mnemonic(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut chars = label.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '_' {
            out.push(c);
        } else if chars.peek() == Some(&'_') {
            chars.next();
            out.push('_');
        }
    }
    out
}

/// Fetch the menu for display, down to `depth` levels (`-1` for everything).
pub async fn open_menu(menu: &proxy::DBusMenuProxy<'_>, depth: i32) -> Result<MenuEntry> {
    if let Err(e) = menu.about_to_show(0).await {
        log::debug!("AboutToShow failed, fetching layout anyway: {}", e);
    }
    let (_revision, layout) = menu.get_layout(0, depth, &[]).await?;
    Ok(MenuEntry::from_layout(&layout))
}

/// Tell the item that a menu entry was clicked.
pub async fn activate_entry(menu: &proxy::DBusMenuProxy<'_>, id: i32) -> Result<()> {
    menu.event(id, "clicked", &Value::I32(0), 0).await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_route_button() {
        use InputAction::*;
        use MouseButton::*;
        let cases = [
            (Left, false, false, Activate),
            (Left, false, true, Activate),
            (Left, true, false, ContextMenu),
            (Left, true, true, OpenMenu),
            (Right, false, false, ContextMenu),
            (Right, false, true, OpenMenu),
            (Right, true, true, OpenMenu),
            (Middle, false, true, SecondaryAction),
            (Middle, true, true, SecondaryAction),
        ];
        for (button, item_is_menu, bound, expected) in cases {
            assert_eq!(route_button(button, item_is_menu, bound), expected, "{button} menu={item_is_menu} bound={bound}");
        }
    }

    #[test]
    fn test_smooth_scroll_accumulates_to_threshold() {
        let mut acc = ScrollAccumulator::new(1.0);
        for _ in 0..3 {
            assert_eq!(acc.feed(ScrollInput::Smooth { dx: 0.0, dy: 0.3 }), vec![]);
        }
        assert_eq!(acc.feed(ScrollInput::Smooth { dx: 0.0, dy: 0.3 }), vec![(1, Orientation::Vertical)]);
        assert_eq!(acc.pending(), (0.0, 0.0));
    }

    #[test]
    fn test_smooth_scroll_axes_are_independent() {
        let mut acc = ScrollAccumulator::new(1.0);
        assert_eq!(acc.feed(ScrollInput::Smooth { dx: -0.6, dy: 0.5 }), vec![]);
        assert_eq!(acc.feed(ScrollInput::Smooth { dx: -0.6, dy: 0.0 }), vec![(-1, Orientation::Horizontal)]);
        assert_eq!(acc.pending(), (0.0, 0.5));
        assert_eq!(acc.feed(ScrollInput::Smooth { dx: 0.0, dy: 2.6 }), vec![(3, Orientation::Vertical)]);
    }

    #[test]
    fn test_smooth_scroll_ignores_non_finite_deltas() {
        let mut acc = ScrollAccumulator::new(1.0);
        assert_eq!(acc.feed(ScrollInput::Smooth { dx: f64::NAN, dy: f64::INFINITY }), vec![]);
        assert_eq!(acc.feed(ScrollInput::Smooth { dx: f64::NEG_INFINITY, dy: 0.4 }), vec![]);
        assert_eq!(acc.pending(), (0.0, 0.4));
        assert_eq!(acc.feed(ScrollInput::Smooth { dx: 1.2, dy: f64::NAN }), vec![(1, Orientation::Horizontal)]);
    }

    #[test]
    fn test_smooth_scroll_distance_is_clamped() {
        let mut acc = ScrollAccumulator::new(1.0);
        assert_eq!(acc.feed(ScrollInput::Smooth { dx: 0.0, dy: -1e12 }), vec![(-1000, Orientation::Vertical)]);
        assert_eq!(acc.feed(ScrollInput::Smooth { dx: f64::MAX, dy: 0.0 }), vec![(1000, Orientation::Horizontal)]);
        assert_eq!(acc.pending(), (0.0, 0.0));
    }

    #[test]
    fn test_discrete_scroll_is_unit_distance() {
        let mut acc = ScrollAccumulator::new(10.0);
        assert_eq!(acc.feed(ScrollInput::Discrete(ScrollDirection::Up)), vec![(-1, Orientation::Vertical)]);
        assert_eq!(acc.feed(ScrollInput::Discrete(ScrollDirection::Right)), vec![(1, Orientation::Horizontal)]);
        assert_eq!(Orientation::Vertical.as_ref(), "vertical");
    }

    #[test]
    fn test_unbound_bridge_falls_back_to_context_menu() {
        let bridge = MenuBridge::new(1.0);
        assert!(bridge.menu().is_none());
        assert_eq!(bridge.route(MouseButton::Right, false), InputAction::ContextMenu);
    }

    #[test]
    fn test_entry_from_properties() {
        let label = Value::from("_Save __As");
        let disabled = Value::from(false);
        let toggle = Value::from("checkmark");
        let state = Value::from(1i32);
        let unknown = Value::from("whatever");
        let entry = MenuEntry::from_parts(
            7,
            [
                ("label", &label),
                ("enabled", &disabled),
                ("toggle-type", &toggle),
                ("toggle-state", &state),
                ("x-kde-unknown", &unknown),
            ],
            vec![],
        );
        assert_eq!(entry.id, 7);
        assert_eq!(entry.label, "Save _As");
        assert!(!entry.enabled);
        assert!(entry.visible);
        assert_eq!(entry.toggle, Some(Toggle { kind: ToggleKind::Checkmark, state: 1 }));
        assert_eq!(entry.kind, EntryKind::Standard);
    }

    #[test]
    fn test_separator_entry() {
        let separator = Value::from("separator");
        let entry = MenuEntry::from_parts(3, [("type", &separator)], vec![]);
        assert_eq!(entry.kind, EntryKind::Separator);
        assert_eq!(serde_json::to_value(&entry).unwrap()["kind"], "separator");
    }
}
