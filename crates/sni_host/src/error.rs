use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Dbus connection error: {0}")]
    DbusError(#[from] zbus::Error),
    #[error("Service path {0} was not understood")]
    DbusAddressError(String),
    #[error("No tray item with id {0}")]
    UnknownItem(String),
    #[error("Tray item {0} has no menu")]
    NoMenu(String),
}

impl From<zbus::fdo::Error> for Error {
    fn from(e: zbus::fdo::Error) -> Self {
        Error::DbusError(e.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
