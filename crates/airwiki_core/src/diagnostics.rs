use log::warn;
use serde::Serialize;

/// Non-fatal problems noticed while rendering. Each distinct message is logged once.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    messages: Vec<String>,
}

impl Diagnostics {
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.messages.contains(&message) {
            return;
        }
        warn!("{message}");
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<String> {
        self.messages
    }
}
