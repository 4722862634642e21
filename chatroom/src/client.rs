//! A line client that chats on its own: it states its name, then keeps
//! sending a stimulus line every interval while draining whatever the server
//! pushed since the last round.

use std::collections::VecDeque;

use chrono::Utc;
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    config::ClientConfig,
    error::{ChatError, Result},
    line::{LineReader, LineWriter},
    task::{TaskHandle, Worker},
};

pub struct Client {
    config: ClientConfig,
    worker: Worker,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let worker = Worker::new(config.join);
        Self { config, worker }
    }

    pub fn worker(&self) -> Worker {
        self.worker.clone()
    }

    pub fn spawn(self) -> TaskHandle<Result<ClientReport>> {
        TaskHandle::spawn(self.worker(), self.run())
    }

    pub async fn run_until_ctrl_c(self) -> Result<ClientReport> {
        let worker = self.worker();
        tokio::spawn(async move {
            select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(error) = signal {
                        warn!(?error, "ctrl-c handler failed");
                    }
                    worker.cancel();
                }
                _ = worker.cancelled() => {}
            }
        });
        let worker = self.worker();
        let outcome = self.run().await;
        // Releases the ctrl-c watcher.
        worker.cancel();
        outcome
    }

    /// Runs until cancelled or until the server closes the connection.
    pub async fn run(self) -> Result<ClientReport> {
        let (mut reader, mut writer) = establish_connection(&self.config).await?;
        let mut report = ClientReport::default();

        let name = &self.config.name;
        let handshake = send_handshake(&self.worker, &mut reader, &mut writer, name).await?;
        let Some(greeting) = handshake else {
            shutdown_connection(&mut writer).await;
            return Ok(report);
        };
        info!(client = %self.config.name, %greeting, "joined chat");

        run_client_loop(&self, &mut reader, &mut writer, &mut report).await?;
        shutdown_connection(&mut writer).await;

        info!(
            client = %self.config.name,
            sent = report.sent,
            received = report.received,
            "client finished"
        );
        Ok(report)
    }
}

/// Lines kept in [`ClientReport::recent`]; older ones are only counted.
pub const RECENT_LINES: usize = 64;

/// What one client sent and heard, returned when it stops.
#[derive(Debug, Default, Clone)]
pub struct ClientReport {
    pub sent: usize,
    pub received: usize,
    /// The last [`RECENT_LINES`] lines heard, oldest first.
    pub recent: VecDeque<String>,
}

impl ClientReport {
    fn record(&mut self, line: String) {
        self.received += 1;
        if self.recent.len() == RECENT_LINES {
            self.recent.pop_front();
        }
        self.recent.push_back(line);
    }
}

async fn establish_connection(
    config: &ClientConfig,
) -> Result<(LineReader<OwnedReadHalf>, LineWriter<OwnedWriteHalf>)> {
    let stream = TcpStream::connect(config.server)
        .await
        .map_err(|source| ChatError::Connect {
            addr: config.server,
            source,
        })?;

    info!(client = %config.name, server = %config.server, "connected");

    let (reader, writer) = stream.into_split();
    Ok((
        LineReader::new(reader, config.charset),
        LineWriter::new(writer, config.charset),
    ))
}

/// Sends the name and waits for the greeting; `None` if cancelled meanwhile.
async fn send_handshake(
    worker: &Worker,
    reader: &mut LineReader<OwnedReadHalf>,
    writer: &mut LineWriter<OwnedWriteHalf>,
    name: &str,
) -> Result<Option<String>> {
    writer.send(name).await?;
    select! {
        biased;
        _ = worker.cancelled() => Ok(None),
        greeting = reader.receive_one() => greeting.map(Some),
    }
}

async fn run_client_loop(
    client: &Client,
    reader: &mut LineReader<OwnedReadHalf>,
    writer: &mut LineWriter<OwnedWriteHalf>,
    report: &mut ClientReport,
) -> Result<()> {
    let config = &client.config;
    while !client.worker.is_cancelled() {
        let stimulus = format!(
            "{} ({}): {}",
            config.name,
            Utc::now().format("%H:%M:%S%.3f"),
            config.text
        );
        writer.send(&stimulus).await?;
        report.sent += 1;

        for line in reader.receive_available()? {
            info!(client = %config.name, "{line}");
            report.record(line);
        }
        if reader.is_closed() {
            warn!(client = %config.name, "server closed the connection");
            break;
        }

        select! {
            _ = client.worker.cancelled() => break,
            _ = tokio::time::sleep(config.interval) => {}
        }
    }
    Ok(())
}

async fn shutdown_connection(writer: &mut LineWriter<OwnedWriteHalf>) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}
