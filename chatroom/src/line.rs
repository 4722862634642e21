//! Newline-delimited text framing.
//!
//! Two receive disciplines exist. The handshake must get a name, so
//! [`LineReader::receive_at_least`] waits and fails if the stream ends early.
//! The broadcast cycle must never stall on a quiet client, so
//! [`LineReader::receive_available`] only takes what is already readable.

use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    config::Charset,
    error::{ChatError, Result},
};

const READ_CHUNK: usize = 1024;

// A peer that keeps the socket readable must not hold a session in one drain
// forever; whatever is left is picked up on the next cycle.
const MAX_READS_PER_DRAIN: usize = 64;

pub struct LineReader<R> {
    reader: R,
    charset: Charset,
    pending: Vec<u8>,
    eof: bool,
}

impl<R> LineReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, charset: Charset) -> Self {
        Self {
            reader,
            charset,
            pending: Vec::new(),
            eof: false,
        }
    }

    /// Whole lines readable right now, in arrival order. Never waits.
    ///
    /// End of stream is not an error here: it only means nothing new will
    /// arrive, see [`Self::is_closed`].
    pub fn receive_available(&mut self) -> Result<Vec<String>> {
        let mut chunk = [0u8; READ_CHUNK];
        for _ in 0..MAX_READS_PER_DRAIN {
            if self.eof {
                break;
            }
            // `read` is cancel safe: when it is not ready nothing was consumed.
            match self.reader.read(&mut chunk).now_or_never() {
                None => break,
                Some(Ok(0)) => self.eof = true,
                Some(Ok(read)) => self.pending.extend_from_slice(&chunk[..read]),
                Some(Err(err)) => return Err(err.into()),
            }
        }

        Ok(std::iter::from_fn(|| self.take_line()).collect())
    }

    /// Waits until exactly `count` lines are read; extra input stays buffered.
    pub async fn receive_at_least(&mut self, count: usize) -> Result<Vec<String>> {
        let mut lines = Vec::with_capacity(count);
        while lines.len() < count {
            if let Some(line) = self.take_line() {
                lines.push(line);
                continue;
            }
            if self.eof {
                return Err(ChatError::ProtocolViolation {
                    expected: count,
                    received: lines.len(),
                });
            }
            self.fill().await?;
        }
        Ok(lines)
    }

    pub async fn receive_one(&mut self) -> Result<String> {
        let mut lines = self.receive_at_least(1).await?;
        Ok(lines.remove(0))
    }

    /// The peer closed its side and every buffered line was handed out.
    pub fn is_closed(&self) -> bool {
        self.eof && self.pending.is_empty()
    }

    async fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let read = self.reader.read(&mut chunk).await?;
        if read == 0 {
            self.eof = true;
        } else {
            self.pending.extend_from_slice(&chunk[..read]);
        }
        Ok(())
    }

    fn take_line(&mut self) -> Option<String> {
        let raw: Vec<u8> = match self.pending.iter().position(|byte| *byte == b'\n') {
            Some(newline) => {
                let mut raw: Vec<u8> = self.pending.drain(..=newline).collect();
                raw.pop();
                raw
            }
            // A last line without terminator still counts once the peer is gone.
            None if self.eof && !self.pending.is_empty() => std::mem::take(&mut self.pending),
            None => return None,
        };

        let line = raw.strip_suffix(b"\r").unwrap_or(&raw[..]);
        Some(self.charset.decode(line))
    }
}

pub struct LineWriter<W> {
    writer: W,
    charset: Charset,
}

impl<W> LineWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W, charset: Charset) -> Self {
        Self { writer, charset }
    }

    /// Writes one line and flushes so the peer sees it immediately.
    pub async fn send(&mut self, line: &str) -> Result<()> {
        let mut encoded = self.charset.encode(line);
        encoded.push(b'\n');
        self.writer.write_all(&encoded).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
