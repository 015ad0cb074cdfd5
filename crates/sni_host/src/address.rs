use crate::*;

/// Canonical identity of a tray item: the bus it lives on and the object path within that bus.
///
/// Two items are the same item if and only if their addresses are equal. The string form
/// (`{service}{path}`, e.g. `:1.50/org/ayatana/NotificationItem/nm_applet`) is what the watcher
/// publishes in `RegisteredStatusNotifierItems`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemAddress {
    pub service: String,
    pub path: String,
}

impl ItemAddress {
    pub fn new(service: impl Into<String>, path: impl Into<String>) -> Self {
        Self { service: service.into(), path: path.into() }
    }

    /// Normalize the service string given to `RegisterStatusNotifierItem`.
    ///
    /// The freedesktop.org specification has this be just the bus name, however some status
    /// items pass non-conforming values. The rules, in order:
    ///
    /// - starting with `/`, it is an object path on the caller's own connection;
    /// - starting with `:`, it is a unique bus name, and the item sits at the default path;
    /// - otherwise, the item sits at the default path of the caller's connection.
    pub fn canonicalize(hint: &str, sender: Option<&str>) -> Result<Self> {
        let sender = || match sender {
            Some(s) if !s.is_empty() => Ok(s.to_owned()),
            _ => Err(Error::DbusAddressError(format!("{hint} (unknown sender)"))),
        };

        if hint.starts_with('/') {
            Ok(Self::new(sender()?, hint))
        } else if hint.starts_with(':') {
            match zbus::names::UniqueName::try_from(hint) {
                Ok(_) => Ok(Self::new(hint, names::ITEM_OBJECT)),
                Err(_) => Err(Error::DbusAddressError(hint.to_owned())),
            }
        } else if hint.is_empty() {
            Err(Error::DbusAddressError(hint.to_owned()))
        } else {
            Ok(Self::new(sender()?, names::ITEM_OBJECT))
        }
    }
}

impl std::fmt::Display for ItemAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.service, self.path)
    }
}

/// An address as found in `RegisteredStatusNotifierItems` or the `StatusNotifierItemRegistered`
/// signal. Other watcher implementations sometimes omit the path, in which case it has to be
/// looked up on the bus (see [`Item::from_address`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialAddress {
    pub service: String,
    pub path: Option<String>,
}

impl std::str::FromStr for PartialAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // Based on <https://github.com/oknozor/stray/blob/main/stray/src/notifier_watcher/notifier_address.rs>
        if let Some((service, path)) = s.split_once('/') {
            if service.is_empty() {
                return Err(Error::DbusAddressError(s.to_owned()));
            }
            Ok(Self { service: service.to_owned(), path: Some(format!("/{}", path)) })
        } else if s.starts_with(':') {
            Ok(Self { service: s.to_owned(), path: None })
        } else if !s.is_empty() {
            Ok(Self { service: s.to_owned(), path: Some(names::ITEM_OBJECT.to_owned()) })
        } else {
            Err(Error::DbusAddressError(s.to_owned()))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_canonicalize_object_path() {
        let addr = ItemAddress::canonicalize("/org/ayatana/NotificationItem/nm_applet", Some(":1.50")).unwrap();
        assert_eq!(addr, ItemAddress::new(":1.50", "/org/ayatana/NotificationItem/nm_applet"));
        assert_eq!(addr.to_string(), ":1.50/org/ayatana/NotificationItem/nm_applet");
    }

    #[test]
    fn test_canonicalize_unique_name() {
        let addr = ItemAddress::canonicalize(":1.77", Some(":1.50")).unwrap();
        assert_eq!(addr.to_string(), ":1.77/StatusNotifierItem");
    }

    #[test]
    fn test_canonicalize_well_known_name_uses_sender() {
        let addr = ItemAddress::canonicalize("org.kde.StatusNotifierItem-4077-1", Some(":1.50")).unwrap();
        assert_eq!(addr.to_string(), ":1.50/StatusNotifierItem");
    }

    #[test]
    fn test_canonicalize_is_deterministic() {
        let a = ItemAddress::canonicalize("org.example.A", Some(":1.9")).unwrap();
        let b = ItemAddress::canonicalize("org.example.A", Some(":1.9")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_canonicalize_rejects_unknown_sender() {
        assert!(ItemAddress::canonicalize("/StatusNotifierItem", None).is_err());
        assert!(ItemAddress::canonicalize("org.example.A", Some("")).is_err());
        assert!(ItemAddress::canonicalize("", Some(":1.9")).is_err());
    }

    #[test]
    fn test_parse_partial_address() {
        let addr: PartialAddress = ":1.50/org/ayatana/NotificationItem/nm_applet".parse().unwrap();
        assert_eq!(addr.service, ":1.50");
        assert_eq!(addr.path.as_deref(), Some("/org/ayatana/NotificationItem/nm_applet"));

        let addr: PartialAddress = ":1.50".parse().unwrap();
        assert_eq!(addr.path, None);

        let addr: PartialAddress = "org.example.A".parse().unwrap();
        assert_eq!(addr.path.as_deref(), Some("/StatusNotifierItem"));

        assert!("/StatusNotifierItem".parse::<PartialAddress>().is_err());
    }
}
