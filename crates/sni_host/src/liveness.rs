//! Observing whether a participant on the bus is reachable.
//!
//! Both functions subscribe to `NameOwnerChanged` before asking the bus about the current owner,
//! so that a change happening in between is not missed.

use zbus::{export::ordered_stream::OrderedStreamExt, names::BusName};

/// Wait for a DBus service to appear. Returns immediately if it is already there.
pub async fn wait_for_service(con: &zbus::Connection, service: BusName<'_>) -> zbus::Result<()> {
    let dbus = zbus::fdo::DBusProxy::new(con).await?;
    let mut owner_changes = dbus.receive_name_owner_changed_with_args(&[(0, service.as_str())]).await?;

    if dbus.name_has_owner(service.as_ref()).await? {
        return Ok(());
    }

    while let Some(sig) = owner_changes.next().await {
        let args = sig.args()?;
        if args.new_owner().is_some() {
            return Ok(());
        }
    }

    Err(zbus::Error::Failure(format!("stopped receiving owner changes for {}", service)))
}

/// Wait for a DBus service to disappear
pub async fn wait_for_service_exit(con: &zbus::Connection, service: BusName<'_>) -> zbus::Result<()> {
    let dbus = zbus::fdo::DBusProxy::new(con).await?;
    let mut owner_changes = dbus.receive_name_owner_changed_with_args(&[(0, service.as_str())]).await?;

    if !dbus.name_has_owner(service.as_ref()).await? {
        // service has already disappeared
        return Ok(());
    }

    while let Some(sig) = owner_changes.next().await {
        let args = sig.args()?;
        if args.new_owner().is_none() {
            break;
        }
    }

    Ok(())
}
