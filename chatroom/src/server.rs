use std::{net::SocketAddr, sync::Arc};

use tokio::{
    net::{TcpListener, TcpStream},
    select,
    task::JoinSet,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    config::ServerConfig,
    error::{ChatError, Result},
    line::{LineReader, LineWriter},
    session::{Session, SessionId},
    store::MessageStore,
    task::{TaskHandle, Worker},
};

pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    store: Arc<MessageStore>,
    worker: Worker,
}

impl Server {
    /// Binds the configured address. An unavailable port is reported here and
    /// never retried.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ChatError::Bind { addr, source })?;
        let worker = Worker::new(config.join);

        Ok(Self {
            listener,
            config,
            store: Arc::new(MessageStore::new()),
            worker,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn store(&self) -> Arc<MessageStore> {
        Arc::clone(&self.store)
    }

    /// Cancelling this worker stops the accept loop and every session.
    pub fn worker(&self) -> Worker {
        self.worker.clone()
    }

    /// Runs the accept loop on its own task.
    pub fn spawn(self) -> TaskHandle<Result<()>> {
        TaskHandle::spawn(self.worker(), self.run())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        let worker = self.worker();
        tokio::spawn(async move {
            select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(err) = signal {
                        warn!(error = ?err, "failed to install ctrl-c handler");
                    }
                    worker.cancel();
                }
                _ = worker.cancelled() => {}
            }
        });
        self.run().await
    }

    /// Accepts connections until the worker is cancelled.
    ///
    /// Each accept waits at most `accept_wait`; an expired wait only makes the
    /// loop look at the cancellation flag again. Any other accept failure is
    /// fatal to this server.
    pub async fn run(self) -> Result<()> {
        let Server {
            listener,
            config,
            store,
            worker,
        } = self;
        let mut sessions = JoinSet::new();
        let mut next_id: SessionId = 0;

        let outcome = loop {
            if worker.is_cancelled() {
                break Ok(());
            }
            reap_sessions(&mut sessions);

            select! {
                biased;
                _ = worker.cancelled() => break Ok(()),
                accepted = timeout(config.accept_wait, listener.accept()) => match accepted {
                    Err(_elapsed) => continue,
                    Ok(Ok((stream, peer))) => {
                        next_id += 1;
                        spawn_session(
                            &mut sessions, stream, peer, next_id, &config, &store, &worker,
                        );
                    }
                    Ok(Err(_)) if worker.is_cancelled() => break Ok(()),
                    Ok(Err(err)) => break Err(ChatError::Accept(err)),
                },
            }
        };

        let addr = listener.local_addr().ok();
        drop(listener);
        info!(?addr, "listener closed");

        match outcome {
            Ok(()) => {
                handle_shutdown(&worker, sessions).await;
                Ok(())
            }
            Err(err) => {
                warn!(?addr, error = ?err, "server stopped on listener failure");
                // Connected clients keep their sessions until the owner cancels.
                sessions.detach_all();
                Err(err)
            }
        }
    }
}

fn spawn_session(
    sessions: &mut JoinSet<()>,
    stream: TcpStream,
    peer: SocketAddr,
    id: SessionId,
    config: &ServerConfig,
    store: &Arc<MessageStore>,
    worker: &Worker,
) {
    debug!(%peer, session = id, "accepted connection");
    let (reader, writer) = stream.into_split();
    let session = Session::new(
        id,
        LineReader::new(reader, config.charset),
        LineWriter::new(writer, config.charset),
        Arc::clone(store),
        worker.child(),
        config.poll_interval,
    );

    sessions.spawn(async move {
        match session.run().await {
            Ok(()) => {}
            Err(err) if err.is_protocol_violation() => {
                info!(%peer, session = id, error = %err, "dropping client after failed handshake");
            }
            Err(err) => warn!(%peer, session = id, error = ?err, "session closed with error"),
        }
    });
}

fn reap_sessions(sessions: &mut JoinSet<()>) {
    while let Some(finished) = sessions.try_join_next() {
        if let Err(err) = finished {
            warn!(error = ?err, "session task panicked");
        }
    }
}

async fn handle_shutdown(worker: &Worker, mut sessions: JoinSet<()>) {
    info!(sessions = sessions.len(), "server shutting down");
    worker.cancel();

    let window = worker.join_policy().window();
    let drained = timeout(window, async {
        while let Some(finished) = sessions.join_next().await {
            if let Err(err) = finished {
                warn!(error = ?err, "session task panicked");
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            remaining = sessions.len(),
            "sessions still running after join window, aborting"
        );
        sessions.shutdown().await;
    }
}
