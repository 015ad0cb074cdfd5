//! Tray sinks that write JSON lines for `snitray listen` clients.

use serde::Serialize;
use sni_host::{Property, TrayItem, TraySink};
use tokio::sync::mpsc::UnboundedSender;

use crate::opts::ListenFormat;

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum SinkEvent<'a> {
    Add { item: &'a TrayItem },
    Update { item: &'a TrayItem, changed: &'a [Property] },
    Remove { id: &'a str },
}

/// Sink that serializes every change into a line of JSON and sends it off to a client.
///
/// The sink closes once the receiving end is dropped, i.e. when the client went away.
#[derive(Debug)]
pub struct JsonSink {
    lines: UnboundedSender<String>,
    format: ListenFormat,
    /// Current items, kept for [`ListenFormat::Snapshot`].
    items: Vec<TrayItem>,
}

impl JsonSink {
    pub fn new(format: ListenFormat, lines: UnboundedSender<String>) -> Self {
        Self { lines, format, items: Vec::new() }
    }

    fn emit(&mut self, event: SinkEvent<'_>) {
        let line = match self.format {
            ListenFormat::Events => serde_json::to_string(&event),
            ListenFormat::Snapshot => serde_json::to_string(&self.items),
        };
        match line {
            Ok(line) => {
                // a closed channel is noticed through is_closed
                let _ = self.lines.send(line);
            }
            Err(e) => log::error!("Failed to serialize tray event: {}", e),
        }
    }
}

impl TraySink for JsonSink {
    fn add_item(&mut self, item: &TrayItem) {
        self.items.push(item.clone());
        self.emit(SinkEvent::Add { item });
    }

    fn update_item(&mut self, item: &TrayItem, changed: &[Property]) {
        if let Some(existing) = self.items.iter_mut().find(|i| i.id == item.id) {
            *existing = item.clone();
        }
        self.emit(SinkEvent::Update { item, changed });
    }

    fn remove_item(&mut self, id: &str) {
        self.items.retain(|i| i.id != id);
        self.emit(SinkEvent::Remove { id });
    }

    fn is_closed(&self) -> bool {
        self.lines.is_closed()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use sni_host::PropertyValue;

    fn item(id: &str, title: &str) -> TrayItem {
        let mut item = TrayItem::new(id);
        item.properties.insert(Property::Title, PropertyValue::Text(title.to_owned()));
        item
    }

    fn lines(rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            out.push(serde_json::from_str(&line).unwrap());
        }
        out
    }

    #[test]
    fn test_events_format() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sink = JsonSink::new(ListenFormat::Events, tx);
        sink.add_item(&item(":1.5/StatusNotifierItem", "Network"));
        sink.update_item(&item(":1.5/StatusNotifierItem", "Wi-Fi"), &[Property::Title]);
        sink.remove_item(":1.5/StatusNotifierItem");

        assert_eq!(
            lines(&mut rx),
            vec![
                serde_json::json!({ "event": "add", "item": { "id": ":1.5/StatusNotifierItem", "Title": "Network" } }),
                serde_json::json!({
                    "event": "update",
                    "item": { "id": ":1.5/StatusNotifierItem", "Title": "Wi-Fi" },
                    "changed": ["Title"],
                }),
                serde_json::json!({ "event": "remove", "id": ":1.5/StatusNotifierItem" }),
            ]
        );
    }

    #[test]
    fn test_snapshot_format() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sink = JsonSink::new(ListenFormat::Snapshot, tx);
        sink.add_item(&item("a", "A"));
        sink.add_item(&item("b", "B"));
        sink.update_item(&item("a", "AA"), &[Property::Title]);
        sink.remove_item("b");

        assert_eq!(
            lines(&mut rx),
            vec![
                serde_json::json!([{ "id": "a", "Title": "A" }]),
                serde_json::json!([{ "id": "a", "Title": "A" }, { "id": "b", "Title": "B" }]),
                serde_json::json!([{ "id": "a", "Title": "AA" }, { "id": "b", "Title": "B" }]),
                serde_json::json!([{ "id": "a", "Title": "AA" }]),
            ]
        );
    }

    #[test]
    fn test_closes_with_client() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = JsonSink::new(ListenFormat::Events, tx);
        assert!(!sink.is_closed());
        drop(rx);
        assert!(sink.is_closed());
    }
}
