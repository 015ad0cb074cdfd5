//! Presenting errors to the user, either on the terminal or as the text of an IPC response.

pub fn print_error(err: anyhow::Error) {
    match err.downcast_ref::<sni_host::Error>() {
        Some(sni_host::Error::DbusError(e)) => log::error!("{}\n  (is a DBus session bus running? {:?})", format_error(&err), e),
        _ => log::error!("{:?}", err),
    }
}

/// Format an error with its chain of causes on one line.
pub fn format_error(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_format_error_includes_causes() {
        let err: anyhow::Result<()> = Err(sni_host::Error::NoMenu(":1.7/StatusNotifierItem".to_owned())).context("Failed to open menu");
        assert_eq!(
            format_error(&err.unwrap_err()),
            "Failed to open menu: Tray item :1.7/StatusNotifierItem has no menu"
        );
    }
}
