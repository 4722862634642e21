//! Server side of one client connection.
//!
//! ```text
//! Handshaking --name--> Broadcasting --cancel / peer gone / io error--> Closed
//!      |
//!      +--no name / blank name--> Failed
//! ```

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    select,
};
use tracing::{debug, info};

use crate::{
    error::{ChatError, Result},
    line::{LineReader, LineWriter},
    message::{greeting, notification},
    store::{Cursor, MessageStore},
    task::Worker,
};

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Broadcasting,
    Closed,
    Failed,
}

pub struct Session<R, W> {
    id: SessionId,
    reader: LineReader<R>,
    writer: LineWriter<W>,
    store: Arc<MessageStore>,
    worker: Worker,
    poll_interval: Duration,
    state: SessionState,
    author: String,
    cursor: Cursor,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        id: SessionId,
        reader: LineReader<R>,
        writer: LineWriter<W>,
        store: Arc<MessageStore>,
        worker: Worker,
        poll_interval: Duration,
    ) -> Self {
        // Only messages stored after the client connected are delivered.
        let cursor = store.head();
        Self {
            id,
            reader,
            writer,
            store,
            worker,
            poll_interval,
            state: SessionState::Handshaking,
            author: String::new(),
            cursor,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the handshake and then broadcast cycles until cancelled or the
    /// peer disconnects. The connection is shut down on every exit path.
    pub async fn run(self) -> Result<()> {
        self.finish().await.1
    }

    /// Like [`Session::run`], also reporting the state the session ended in:
    /// [`SessionState::Failed`] when the handshake broke down, otherwise
    /// [`SessionState::Closed`].
    pub async fn finish(mut self) -> (SessionState, Result<()>) {
        let outcome = self.drive().await;

        self.state = match (&outcome, self.state) {
            (Err(_), SessionState::Handshaking) => SessionState::Failed,
            _ => SessionState::Closed,
        };
        if let Err(err) = self.writer.shutdown().await {
            debug!(session = self.id, error = ?err, "failed to shut down session writer");
        }
        debug!(session = self.id, state = ?self.state, "session finished");

        (self.state, outcome)
    }

    async fn drive(&mut self) -> Result<()> {
        if !self.handshake().await? {
            return Ok(());
        }

        info!(session = self.id, author = %self.author, "client joined");
        while !self.worker.is_cancelled() {
            if !self.cycle().await? {
                info!(session = self.id, author = %self.author, "client disconnected");
                break;
            }

            select! {
                _ = self.worker.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        Ok(())
    }

    /// Returns `false` when cancelled before the client named itself.
    async fn handshake(&mut self) -> Result<bool> {
        let name = select! {
            biased;
            _ = self.worker.cancelled() => return Ok(false),
            name = self.reader.receive_one() => name?,
        };

        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::BlankName);
        }

        self.author = name.to_string();
        self.writer.send(&greeting(&self.author)).await?;
        self.state = SessionState::Broadcasting;
        Ok(true)
    }

    /// One broadcast cycle. Returns `false` once the peer has gone away.
    async fn cycle(&mut self) -> Result<bool> {
        self.store_inbound()?;
        if self.reader.is_closed() {
            return Ok(false);
        }
        self.deliver_unseen().await?;
        Ok(true)
    }

    fn store_inbound(&mut self) -> Result<()> {
        for text in self.reader.receive_available()? {
            let message = self.store.append(&self.author, &text);
            debug!(session = self.id, %message, "stored message");
        }
        Ok(())
    }

    async fn deliver_unseen(&mut self) -> Result<()> {
        let mut scan = self.store.after(self.cursor, Some(&self.author));
        for (next, message) in scan.by_ref() {
            let line = notification(&self.author, &message, Utc::now());
            self.writer.send(&line).await?;
            self.cursor = next;
        }
        // Own messages were skipped, not delivered; move past them as well.
        self.cursor = self.cursor.max(scan.end());
        Ok(())
    }
}
