//! Append-only message log shared by every session of one server.
//!
//! Each session keeps its own [`Cursor`] and asks for everything after it.
//! Entries are stamped under the write lock with strictly increasing
//! timestamps, so append order, timestamp order and cursor order agree and two
//! messages never collapse into one.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, TimeDelta, Utc};

use crate::message::Message;

/// Position in the log: every entry before it has been seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(usize);

#[derive(Debug, Default)]
pub struct MessageStore {
    entries: RwLock<Vec<Arc<Message>>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps `text` with the current time and appends it.
    ///
    /// Two appends landing on the same clock reading are pushed 1ns apart.
    pub fn append(&self, author: &str, text: &str) -> Arc<Message> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let timestamp = next_stamp(entries.last().map(|last| last.timestamp()));
        let message = Arc::new(Message::new(author, timestamp, text));
        entries.push(Arc::clone(&message));
        message
    }

    /// Cursor just past the newest entry.
    pub fn head(&self) -> Cursor {
        Cursor(self.len())
    }

    /// Everything stored at or after `cursor`, optionally without the
    /// messages of `exclude_author`.
    ///
    /// The scan covers the entries present when it starts. Later appends are
    /// left for the next scan, so nothing is yielded twice or skipped.
    pub fn after(&self, cursor: Cursor, exclude_author: Option<&str>) -> Scan {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let start = cursor.0.min(entries.len());
        Scan {
            next: start,
            snapshot: entries[start..].to_vec().into_iter(),
            exclude_author: exclude_author.map(str::to_owned),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn next_stamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(previous) if now <= previous => previous + TimeDelta::nanoseconds(1),
        _ => now,
    }
}

/// Lazy walk over one snapshot of the log, see [`MessageStore::after`].
#[derive(Debug)]
pub struct Scan {
    next: usize,
    snapshot: std::vec::IntoIter<Arc<Message>>,
    exclude_author: Option<String>,
}

impl Scan {
    /// Cursor past every entry of the snapshot, skipped ones included.
    pub fn end(&self) -> Cursor {
        Cursor(self.next + self.snapshot.len())
    }
}

impl Iterator for Scan {
    /// The message and the cursor just past it.
    type Item = (Cursor, Arc<Message>);

    fn next(&mut self) -> Option<Self::Item> {
        for message in self.snapshot.by_ref() {
            self.next += 1;
            let excluded = self
                .exclude_author
                .as_deref()
                .is_some_and(|author| message.is_authored_by(author));
            if !excluded {
                return Some((Cursor(self.next), message));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, thread};

    use super::*;

    #[test]
    fn scan_skips_the_callers_own_messages() {
        let store = MessageStore::new();
        store.append("alice", "hi");
        store.append("bob", "hey");
        store.append("alice", "how are you?");

        let texts: Vec<_> = store
            .after(Cursor::default(), Some("alice"))
            .map(|(_, message)| message.text().to_string())
            .collect();
        assert_eq!(texts, vec!["hey"]);

        let everything = store.after(Cursor::default(), None).count();
        assert_eq!(everything, 3);
    }

    #[test]
    fn cursor_advances_past_delivered_and_skipped_entries() {
        let store = MessageStore::new();
        let start = store.head();
        store.append("bob", "one");
        store.append("alice", "mine");

        let mut scan = store.after(start, Some("alice"));
        let (after_one, message) = scan.next().expect("bob's message");
        assert_eq!(message.text(), "one");
        assert!(after_one > start);
        assert!(scan.next().is_none());
        assert_eq!(scan.end(), store.head());

        assert_eq!(store.after(scan.end(), Some("alice")).count(), 0);
    }

    #[test]
    fn scan_ignores_appends_made_after_it_started() {
        let store = MessageStore::new();
        store.append("bob", "before");

        let scan = store.after(Cursor::default(), None);
        store.append("bob", "during");

        let end = scan.end();
        assert_eq!(scan.count(), 1);

        let later: Vec<_> = store.after(end, None).collect();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].1.text(), "during");
    }

    #[test]
    fn timestamps_strictly_increase() {
        let store = MessageStore::new();
        let stamps: Vec<_> = (0..500)
            .map(|n| store.append("alice", &n.to_string()).timestamp())
            .collect();

        assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn concurrent_writers_and_readers_neither_lose_nor_duplicate() {
        const WRITERS: usize = 8;
        const PER_WRITER: usize = 250;

        let store = MessageStore::new();

        let received: Vec<Vec<Arc<Message>>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..WRITERS)
                .map(|writer| {
                    let store = &store;
                    scope.spawn(move || {
                        let author = format!("writer-{writer}");
                        let mut cursor = Cursor::default();
                        let mut seen = Vec::new();
                        for n in 0..PER_WRITER {
                            store.append(&author, &format!("{author} #{n}"));
                            let mut scan = store.after(cursor, Some(&author));
                            for (next, message) in scan.by_ref() {
                                assert!(next > cursor);
                                cursor = next;
                                seen.push(message);
                            }
                            cursor = cursor.max(scan.end());
                        }
                        (author, cursor, seen)
                    })
                })
                .collect();

            let finished: Vec<_> = handles
                .into_iter()
                .map(|handle| handle.join().expect("writer thread"))
                .collect();

            finished
                .into_iter()
                .map(|(author, cursor, mut seen)| {
                    // Catch up with whatever other writers appended last.
                    seen.extend(store.after(cursor, Some(&author)).map(|(_, m)| m));
                    assert!(seen.iter().all(|message| !message.is_authored_by(&author)));
                    seen
                })
                .collect()
        });

        assert_eq!(store.len(), WRITERS * PER_WRITER);

        let all: Vec<_> = store.after(Cursor::default(), None).map(|(_, m)| m).collect();
        let keys: HashSet<_> = all
            .iter()
            .map(|message| (message.author().to_string(), message.timestamp()))
            .collect();
        assert_eq!(keys.len(), WRITERS * PER_WRITER);
        assert!(all.windows(2).all(|pair| pair[0].timestamp() < pair[1].timestamp()));

        for seen in received {
            let distinct: HashSet<_> = seen.iter().map(|message| message.key()).collect();
            assert_eq!(distinct.len(), seen.len(), "a message was delivered twice");
            assert_eq!(seen.len(), (WRITERS - 1) * PER_WRITER);
        }
    }
}
