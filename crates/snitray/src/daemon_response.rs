use anyhow::{Context, Result};

/// Response that the app may send as a response to a event.
/// This is used in `DaemonCommand`s that contain a response sender.
#[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize, derive_more::Display)]
pub enum DaemonResponse {
    Success(String),
    Failure(String),
}

#[derive(Debug)]
pub struct DaemonResponseSender(tokio::sync::mpsc::UnboundedSender<DaemonResponse>);

pub fn create_pair() -> (DaemonResponseSender, tokio::sync::mpsc::UnboundedReceiver<DaemonResponse>) {
    let (sender, recv) = tokio::sync::mpsc::unbounded_channel();
    (DaemonResponseSender(sender), recv)
}

impl DaemonResponseSender {
    pub fn send_success(&self, s: String) -> Result<()> {
        self.0.send(DaemonResponse::Success(s)).context("Failed to send success response from application thread")
    }

    pub fn send_failure(&self, s: String) -> Result<()> {
        self.0.send(DaemonResponse::Failure(s)).context("Failed to send failure response from application thread")
    }

    /// Send a success response with the given text, or a failure with the formatted error.
    pub fn respond_with_result<E: Into<anyhow::Error>>(&self, result: std::result::Result<String, E>) -> Result<()> {
        match result {
            Ok(s) => self.send_success(s),
            Err(e) => self.send_failure(crate::error_handling_ctx::format_error(&e.into())),
        }
    }
}

pub type DaemonResponseReceiver = tokio::sync::mpsc::UnboundedReceiver<DaemonResponse>;

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_respond_with_result() {
        let (sender, mut recv) = create_pair();
        sender.respond_with_result::<anyhow::Error>(Ok("pong".to_owned())).unwrap();
        sender.respond_with_result(Err(sni_host::Error::UnknownItem(":1.5/x".to_owned()))).unwrap();
        assert_eq!(recv.try_recv().unwrap(), DaemonResponse::Success("pong".to_owned()));
        assert_eq!(recv.try_recv().unwrap(), DaemonResponse::Failure("No tray item with id :1.5/x".to_owned()));
    }
}
