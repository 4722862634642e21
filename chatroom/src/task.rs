//! Cooperative cancellation shared by servers, sessions and clients.
//!
//! A [`Worker`] starts active. [`Worker::cancel`] flips it to inactive for
//! good; loops check the flag at the top of every iteration and race their
//! waits against [`Worker::cancelled`]. Nothing is ever preempted.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// How long [`Worker::await_completion`] keeps polling before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinPolicy {
    pub interval: Duration,
    pub attempts: u32,
}

impl JoinPolicy {
    /// Upper bound of one bounded wait.
    pub fn window(&self) -> Duration {
        self.interval * self.attempts
    }
}

impl Default for JoinPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            attempts: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Worker {
    token: CancellationToken,
    finished: Arc<AtomicBool>,
    join: JoinPolicy,
}

impl Worker {
    pub fn new(join: JoinPolicy) -> Self {
        Self {
            token: CancellationToken::new(),
            finished: Arc::new(AtomicBool::new(false)),
            join,
        }
    }

    /// A worker that is cancelled together with `self` but can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            finished: Arc::new(AtomicBool::new(false)),
            join: self.join,
        }
    }

    /// Idempotent; there is no way back to the active state.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Inactive: either cancelled or the task body already returned.
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.finished.load(Ordering::Acquire)
    }

    /// Resolves once the worker is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    pub fn join_policy(&self) -> JoinPolicy {
        self.join
    }

    /// Polls [`Self::is_done`] up to `attempts` times, `interval` apart.
    ///
    /// Returns whether the worker became inactive. This does not prove the
    /// underlying task has exited; use [`TaskHandle::join`] for that.
    pub async fn await_completion(&self) -> bool {
        for _ in 0..self.join.attempts {
            if self.is_done() {
                return true;
            }
            tokio::time::sleep(self.join.interval).await;
        }
        self.is_done()
    }

    fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

/// A spawned task together with the worker that governs it.
#[derive(Debug)]
pub struct TaskHandle<T> {
    worker: Worker,
    join: JoinHandle<T>,
}

impl<T: Send + 'static> TaskHandle<T> {
    pub fn spawn<F>(worker: Worker, body: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        let guard = worker.clone();
        let join = tokio::spawn(async move {
            let output = body.await;
            guard.mark_finished();
            output
        });
        Self { worker, join }
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    pub fn cancel(&self) {
        self.worker.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.worker.is_done()
    }

    pub async fn await_completion(&self) -> bool {
        self.worker.await_completion().await
    }

    /// Waits for the task itself to exit.
    pub async fn join(self) -> Result<T> {
        Ok(self.join.await?)
    }
}
