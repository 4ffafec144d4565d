//! Signal Writer - single in-process owner of store mutations
//!
//! Callers send requests over a channel and await a oneshot reply. The task
//! handles one request at a time, so mutations from concurrent callers in the
//! same process never interleave. Cross-process exclusion is the store's file
//! lock.

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::signal::{Signal, SignalDraft, SignalStatus, SignalUpdate};
use super::store::SignalStore;

const QUEUE_DEPTH: usize = 64;

enum WriteRequest {
    Append(SignalDraft, oneshot::Sender<Result<Signal>>),
    Update(String, SignalUpdate, oneshot::Sender<Result<Option<Signal>>>),
    Archive(u32, Option<SignalStatus>, oneshot::Sender<Result<usize>>),
    Promote {
        id: String,
        target: String,
        content: String,
        reply: oneshot::Sender<Result<Option<Signal>>>,
    },
}

/// Cloneable handle to the writer task
#[derive(Clone)]
pub struct SignalWriter {
    tx: mpsc::Sender<WriteRequest>,
}

impl SignalWriter {
    /// Start the writer task; it exits once every handle is dropped
    pub fn spawn(store: SignalStore) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<WriteRequest>(QUEUE_DEPTH);

        let handle = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let store = store.clone();
                // File I/O and lock waits block, keep them off the async workers
                let outcome = tokio::task::spawn_blocking(move || handle_request(&store, request)).await;
                if let Err(e) = outcome {
                    warn!("Signal writer request panicked: {}", e);
                }
            }
            debug!("Signal writer stopped");
        });

        (Self { tx }, handle)
    }

    pub async fn append(&self, draft: SignalDraft) -> Result<Signal> {
        let (reply, rx) = oneshot::channel();
        self.send(WriteRequest::Append(draft, reply)).await?;
        rx.await.map_err(|_| anyhow!("Signal writer dropped the request"))?
    }

    pub async fn update(&self, id: &str, update: SignalUpdate) -> Result<Option<Signal>> {
        let (reply, rx) = oneshot::channel();
        self.send(WriteRequest::Update(id.to_string(), update, reply)).await?;
        rx.await.map_err(|_| anyhow!("Signal writer dropped the request"))?
    }

    pub async fn archive(&self, days: u32, status_filter: Option<SignalStatus>) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(WriteRequest::Archive(days, status_filter, reply)).await?;
        rx.await.map_err(|_| anyhow!("Signal writer dropped the request"))?
    }

    pub async fn promote(&self, id: &str, target: &str, content: &str) -> Result<Option<Signal>> {
        let (reply, rx) = oneshot::channel();
        self.send(WriteRequest::Promote {
            id: id.to_string(),
            target: target.to_string(),
            content: content.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| anyhow!("Signal writer dropped the request"))?
    }

    async fn send(&self, request: WriteRequest) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| anyhow!("Signal writer is not running"))
    }
}

fn handle_request(store: &SignalStore, request: WriteRequest) {
    // A closed reply channel only means the caller stopped waiting
    match request {
        WriteRequest::Append(draft, reply) => {
            let _ = reply.send(store.append(draft));
        }
        WriteRequest::Update(id, update, reply) => {
            let _ = reply.send(store.update(&id, update));
        }
        WriteRequest::Archive(days, status_filter, reply) => {
            let _ = reply.send(store.archive(days, status_filter));
        }
        WriteRequest::Promote {
            id,
            target,
            content,
            reply,
        } => {
            let _ = reply.send(store.promote(&id, &target, &content));
        }
    }
}
