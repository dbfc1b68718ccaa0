use tokio::sync::mpsc;

/// Outbound chat bridge (e.g. a Discord channel). Fire-and-forget: delivery
/// failures stay inside the relay.
pub trait ChatRelay: Send + Sync {
    fn relay(&self, message: String);
}

/// Relay that hands messages to a task owning the real client.
#[derive(Debug, Clone)]
pub struct QueueRelay {
    tx: mpsc::UnboundedSender<String>,
}

impl QueueRelay {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ChatRelay for QueueRelay {
    fn relay(&self, message: String) {
        if self.tx.send(message).is_err() {
            tracing::debug!("[channel] [relay_closed]");
        }
    }
}

pub fn format_relay_message(char_name: &str, content: &str) -> String {
    format!("**{}**: {}", char_name, content)
}
