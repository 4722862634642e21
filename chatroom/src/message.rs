use std::fmt;

use chrono::{DateTime, Utc};

const STAMP_FORMAT: &str = "%H:%M:%S%.9f";
const DELIVERY_FORMAT: &str = "%H:%M:%S";

/// One chat line as stored by the server.
///
/// `(author, timestamp)` identifies a message; the store never hands out the
/// same timestamp twice, so no two stored messages share that key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    author: String,
    timestamp: DateTime<Utc>,
    text: String,
}

impl Message {
    pub fn new(
        author: impl Into<String>,
        timestamp: DateTime<Utc>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            author: author.into(),
            timestamp,
            text: text.into(),
        }
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn key(&self) -> (&str, DateTime<Utc>) {
        (&self.author, self.timestamp)
    }

    pub fn is_authored_by(&self, author: &str) -> bool {
        self.author == author
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}: {}",
            self.author,
            self.timestamp.format(STAMP_FORMAT),
            self.text
        )
    }
}

/// Reply to a successful handshake.
pub fn greeting(name: &str) -> String {
    format!("Greetings, {name}!")
}

/// Line pushed to `recipient` when `message` is delivered at `delivered_at`.
pub fn notification(recipient: &str, message: &Message, delivered_at: DateTime<Utc>) -> String {
    format!(
        "{recipient} received message from {message} on {}",
        delivered_at.format(DELIVERY_FORMAT)
    )
}
