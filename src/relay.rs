// src/relay.rs
//
// Cross-context relay: the host spawns a worker task, the worker answers a
// one-shot handshake with its own mailbox address, and from then on forwards
// every message it receives to the host's inbox unchanged. The inbox holds
// only the newest message: a host that polls slowly skips the ones between.

use std::collections::VecDeque;
use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{PipelineError, Result};
use crate::waveform::Waveform;

/// Everything that travels over the relay.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    /// The worker's mailbox, sent once during the handshake.
    Address(RelayAddress),
    Snapshot(Arc<Waveform>),
}

/// Per-send failures. The live preview logs these and moves on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("relay handshake pending and backlog full")]
    Backlogged,
    #[error("relay worker is gone")]
    Disconnected,
}

/// Sending half of the worker's mailbox.
#[derive(Debug, Clone)]
pub struct RelayAddress {
    tx: mpsc::UnboundedSender<RelayMessage>,
}

impl RelayAddress {
    /// The worker's only operation. Fire-and-forget and never rejected while
    /// the worker lives; the worker drains its mailbox as fast as it fills.
    pub fn relay(&self, message: RelayMessage) -> Result<(), RelayError> {
        self.tx.send(message).map_err(|_| RelayError::Disconnected)
    }
}

enum Link {
    Pending {
        handshake: oneshot::Receiver<RelayMessage>,
        backlog: VecDeque<RelayMessage>,
    },
    Ready(RelayAddress),
    Closed,
}

/// Host side of the relay. Lives on the sampling/UI context and never
/// blocks: sends never wait, reads take whatever arrived last.
pub struct RelayHost {
    link: Link,
    inbox: watch::Receiver<Option<RelayMessage>>,
    worker: JoinHandle<()>,
    capacity: usize,
}

impl RelayHost {
    /// Spawns the worker onto the current tokio runtime. Fails with
    /// `WorkerSpawnFailure` when called outside one.
    pub fn spawn(capacity: usize) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| PipelineError::WorkerSpawnFailure(e.to_string()))?;
        Ok(Self::spawn_on(&handle, capacity))
    }

    /// `capacity` bounds the queue of snapshots sent before the handshake.
    pub fn spawn_on(handle: &Handle, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (host_tx, inbox) = watch::channel(None);
        let (reply_tx, handshake) = oneshot::channel();
        let worker = handle.spawn(run_worker(reply_tx, host_tx));
        log::debug!("Relay worker spawned (capacity {capacity})");

        Self {
            link: Link::Pending {
                handshake,
                backlog: VecDeque::new(),
            },
            inbox,
            worker,
            capacity,
        }
    }

    /// Waits for the worker's address.
    pub async fn handshake(&mut self) -> Result<()> {
        if let Link::Pending { handshake, .. } = &mut self.link {
            let reply = handshake.await;
            self.complete(reply.ok());
        }
        match self.link {
            Link::Ready(_) => Ok(()),
            _ => Err(PipelineError::WorkerSpawnFailure(
                "relay worker exited before the handshake".into(),
            )),
        }
    }

    /// Non-blocking handshake check; returns whether the link is ready.
    pub fn poll_handshake(&mut self) -> bool {
        if let Link::Pending { handshake, .. } = &mut self.link {
            match handshake.try_recv() {
                Ok(reply) => self.complete(Some(reply)),
                Err(oneshot::error::TryRecvError::Empty) => return false,
                Err(oneshot::error::TryRecvError::Closed) => self.complete(None),
            }
        }
        self.is_connected()
    }

    fn complete(&mut self, reply: Option<RelayMessage>) {
        let backlog = match std::mem::replace(&mut self.link, Link::Closed) {
            Link::Pending { backlog, .. } => backlog,
            other => {
                self.link = other;
                return;
            }
        };
        match reply {
            Some(RelayMessage::Address(address)) => {
                log::debug!("Relay handshake complete, flushing {} queued", backlog.len());
                for message in backlog {
                    if address.relay(message).is_err() {
                        log::warn!("Relay worker vanished while flushing backlog");
                        return;
                    }
                }
                self.link = Link::Ready(address);
            }
            Some(RelayMessage::Snapshot(_)) => {
                log::error!("Relay worker answered the handshake with a snapshot");
            }
            None => log::warn!("Relay worker exited before the handshake"),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.link, Link::Ready(_))
    }

    pub fn address(&self) -> Option<&RelayAddress> {
        match &self.link {
            Link::Ready(address) => Some(address),
            _ => None,
        }
    }

    /// Sends a snapshot towards the host's inbox via the worker. Before the
    /// handshake completes snapshots are queued (up to the mailbox capacity)
    /// and flushed in order once it does.
    pub fn send(&mut self, snapshot: Waveform) -> Result<(), RelayError> {
        self.poll_handshake();
        let message = RelayMessage::Snapshot(Arc::new(snapshot));
        match &mut self.link {
            Link::Ready(address) => {
                let result = address.relay(message);
                if result.is_err() {
                    self.link = Link::Closed;
                }
                result
            }
            Link::Pending { backlog, .. } => {
                if backlog.len() >= self.capacity {
                    return Err(RelayError::Backlogged);
                }
                backlog.push_back(message);
                Ok(())
            }
            Link::Closed => Err(RelayError::Disconnected),
        }
    }

    /// The newest snapshot forwarded since the last read, if any.
    pub fn latest(&mut self) -> Option<Arc<Waveform>> {
        self.poll_handshake();
        if !self.inbox.has_changed().unwrap_or(false) {
            return None;
        }
        Self::snapshot_of(self.inbox.borrow_and_update().clone())
    }

    /// Waits until the worker forwards something new and returns the newest
    /// snapshot at that point.
    pub async fn recv(&mut self) -> Option<Arc<Waveform>> {
        loop {
            self.inbox.changed().await.ok()?;
            let message = self.inbox.borrow_and_update().clone();
            if let Some(wf) = Self::snapshot_of(message) {
                return Some(wf);
            }
        }
    }

    fn snapshot_of(message: Option<RelayMessage>) -> Option<Arc<Waveform>> {
        match message? {
            RelayMessage::Snapshot(wf) => Some(wf),
            RelayMessage::Address(_) => {
                log::warn!("Unexpected address on relay inbox");
                None
            }
        }
    }

    /// Stops the worker without draining it; snapshots are self-contained.
    pub fn shutdown(self) {}
}

impl Drop for RelayHost {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker(reply: oneshot::Sender<RelayMessage>, host: watch::Sender<Option<RelayMessage>>) {
    let (tx, mut mailbox) = mpsc::unbounded_channel();
    if reply.send(RelayMessage::Address(RelayAddress { tx })).is_err() {
        log::debug!("Relay host gone before the handshake");
        return;
    }
    // Each message replaces the previous one in the host's inbox.
    while let Some(message) = mailbox.recv().await {
        if host.send(Some(message)).is_err() {
            break;
        }
    }
    log::debug!("Relay worker stopped");
}
