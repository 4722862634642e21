use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use chatroom::{
    config::{Charset, ServerConfig},
    line::{LineReader, LineWriter},
    server::Server,
    task::JoinPolicy,
};
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::{Instant, timeout},
};

const WAIT: Duration = Duration::from_secs(2);

struct TestClient {
    reader: LineReader<OwnedReadHalf>,
    writer: LineWriter<OwnedWriteHalf>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: LineReader::new(reader, Charset::Utf8),
            writer: LineWriter::new(writer, Charset::Utf8),
        })
    }

    async fn join(addr: SocketAddr, name: &str) -> Result<Self> {
        let mut client = Self::connect(addr).await?;
        client.writer.send(name).await?;
        let greeting = client.line().await.context("waiting for greeting")?;
        assert_eq!(greeting, format!("Greetings, {name}!"));
        Ok(client)
    }

    async fn line(&mut self) -> Result<String> {
        Ok(timeout(WAIT, self.reader.receive_one()).await??)
    }
}

#[tokio::test]
async fn broadcasts_reach_everyone_but_the_author() -> Result<()> {
    let server = Server::bind(ServerConfig::ephemeral()).await?;
    let addr = server.local_addr()?;
    let store = server.store();
    let handle = server.spawn();

    let mut alice = TestClient::join(addr, "alice").await?;
    let mut bob = TestClient::join(addr, "bob").await?;
    let mut carol = TestClient::join(addr, "carol").await?;

    alice.writer.send("hi").await?;

    for (name, client) in [("bob", &mut bob), ("carol", &mut carol)] {
        let line = client.line().await.with_context(|| format!("{name} waiting for hi"))?;
        assert!(
            line.starts_with(&format!("{name} received message from alice: ")),
            "{line}"
        );
        assert!(line.contains(": hi on "), "{line}");
    }

    let echo = timeout(Duration::from_millis(300), alice.reader.receive_one()).await;
    assert!(echo.is_err(), "alice heard her own message: {echo:?}");

    bob.writer.send("hello alice").await?;
    let reply = alice.line().await?;
    assert!(reply.starts_with("alice received message from bob: "), "{reply}");
    let carol_copy = carol.line().await?;
    assert!(carol_copy.contains(": hello alice on "), "{carol_copy}");

    assert_eq!(store.len(), 2);

    handle.cancel();
    assert!(handle.await_completion().await);
    handle.join().await??;
    Ok(())
}

#[tokio::test]
async fn each_message_is_delivered_once_and_in_order() -> Result<()> {
    let server = Server::bind(ServerConfig::ephemeral()).await?;
    let addr = server.local_addr()?;
    let handle = server.spawn();

    let mut alice = TestClient::join(addr, "alice").await?;
    let mut bob = TestClient::join(addr, "bob").await?;

    for n in 0..20 {
        alice.writer.send(&format!("line {n}")).await?;
    }

    for n in 0..20 {
        let line = bob.line().await?;
        assert!(line.contains(&format!(": line {n} on ")), "expected line {n}, got {line}");
    }
    let extra = timeout(Duration::from_millis(300), bob.reader.receive_one()).await;
    assert!(extra.is_err(), "bob got a duplicate: {extra:?}");

    handle.cancel();
    handle.join().await??;
    Ok(())
}

#[tokio::test]
async fn failed_handshake_drops_only_that_client() -> Result<()> {
    let server = Server::bind(ServerConfig::ephemeral()).await?;
    let addr = server.local_addr()?;
    let store = server.store();
    let handle = server.spawn();

    let mut alice = TestClient::join(addr, "alice").await?;

    let mut silent = TestClient::connect(addr).await?;
    silent.writer.shutdown().await?;
    let closed = timeout(WAIT, silent.reader.receive_one()).await?;
    assert!(closed.is_err(), "server must close a nameless connection");

    let mut bob = TestClient::join(addr, "bob").await?;
    bob.writer.send("still here").await?;
    let line = alice.line().await?;
    assert!(line.contains(": still here on "), "{line}");
    assert_eq!(store.len(), 1);

    handle.cancel();
    handle.join().await??;
    Ok(())
}

#[tokio::test]
async fn cancel_closes_listener_and_sessions() -> Result<()> {
    let server = Server::bind(ServerConfig::ephemeral()).await?;
    let addr = server.local_addr()?;
    let handle = server.spawn();

    let mut alice = TestClient::join(addr, "alice").await?;

    handle.cancel();
    assert!(handle.is_done());
    assert!(handle.await_completion().await);
    handle.join().await??;

    let refused = TcpStream::connect(addr).await;
    assert!(refused.is_err(), "listener still accepting after cancel");

    let closed = timeout(WAIT, alice.reader.receive_one()).await?;
    assert!(closed.is_err(), "session should have closed alice's connection");
    Ok(())
}

#[tokio::test]
async fn cancel_unblocks_a_pending_handshake() -> Result<()> {
    let server = Server::bind(ServerConfig::ephemeral()).await?;
    let addr = server.local_addr()?;
    let handle = server.spawn();

    // Connected but never states a name.
    let mut mute = TestClient::connect(addr).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    handle.cancel();
    timeout(WAIT, handle.join()).await???;

    let closed = timeout(WAIT, mute.reader.receive_one()).await?;
    assert!(closed.is_err());
    Ok(())
}

#[tokio::test]
async fn stuck_session_is_aborted_after_join_window() -> Result<()> {
    const LINES: usize = 4000;

    let join = JoinPolicy {
        interval: Duration::from_millis(100),
        attempts: 5,
    };
    let config = ServerConfig {
        poll_interval: Duration::from_millis(1),
        join,
        ..ServerConfig::ephemeral()
    };
    let server = Server::bind(config).await?;
    let addr = server.local_addr()?;
    let store = server.store();
    let handle = server.spawn();

    // Named, then never reads: its session ends up blocked writing to it.
    let mut deaf = TestClient::join(addr, "deaf").await?;
    let mut flood = TestClient::join(addr, "flood").await?;

    let payload = "x".repeat(4096);
    for _ in 0..LINES {
        flood.writer.send(&payload).await?;
    }
    timeout(Duration::from_secs(20), async {
        while store.len() < LINES {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("flood never fully stored")?;

    let started = Instant::now();
    handle.cancel();
    timeout(join.window() + Duration::from_millis(1500), handle.join())
        .await
        .context("server outlived its join window")???;
    assert!(started.elapsed() >= join.window(), "deaf session exited on its own");

    drop(flood);
    let closed = timeout(Duration::from_secs(10), async {
        while deaf.reader.receive_one().await.is_ok() {}
    })
    .await;
    assert!(closed.is_ok(), "aborted session left the connection open");
    Ok(())
}
