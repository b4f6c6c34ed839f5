//! Single-writer sync queue.
//!
//! All remote writes go through one worker task fed by an unbounded
//! channel, so at most one write is in flight and writes apply in
//! submission order. Sync requests are coalesced with a pending flag: while
//! a sync is queued but not yet started, further requests are no-ops.
//!
//! The worker clears the flag and takes the membership snapshot only when a
//! sync actually starts, so a write always carries every mutation made
//! before it began.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::EngineError;
use crate::membership::MembershipStore;
use crate::sheet::{RosterSheet, SheetTransport};

/// Operations processed by the sync worker.
enum WriterOp {
    /// Overwrite the remote rows with the current membership.
    Sync,
    /// Acknowledge once every earlier op has finished.
    Flush { response: oneshot::Sender<()> },
    /// Stop the worker.
    Shutdown,
}

/// Outcome counters for executed syncs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct SyncCounters {
    completed: AtomicU64,
    failed: AtomicU64,
}

/// The sync worker. Owns the only path to the remote store.
pub struct SyncWriter<T> {
    store: Arc<MembershipStore>,
    sheet: Arc<RosterSheet<T>>,
    op_rx: mpsc::UnboundedReceiver<WriterOp>,
    pending: Arc<AtomicBool>,
    counters: Arc<SyncCounters>,
}

impl<T: SheetTransport + 'static> SyncWriter<T> {
    /// Create a writer and the handle used to feed it.
    pub fn new(store: Arc<MembershipStore>, sheet: Arc<RosterSheet<T>>) -> (Self, SyncHandle) {
        let (op_tx, op_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(SyncCounters::default());

        let writer = Self {
            store,
            sheet,
            op_rx,
            pending: Arc::clone(&pending),
            counters: Arc::clone(&counters),
        };
        let handle = SyncHandle {
            op_tx,
            pending,
            counters,
        };
        (writer, handle)
    }

    /// Spawn the writer as a background task.
    pub fn spawn(store: Arc<MembershipStore>, sheet: Arc<RosterSheet<T>>) -> SyncHandle {
        let (writer, handle) = Self::new(store, sheet);
        tokio::spawn(async move {
            writer.run().await;
        });
        handle
    }

    /// Process ops until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        debug!("sync writer started");

        while let Some(op) = self.op_rx.recv().await {
            match op {
                WriterOp::Sync => self.execute_sync().await,
                WriterOp::Flush { response } => {
                    trace!("processing flush op");
                    let _ = response.send(());
                }
                WriterOp::Shutdown => {
                    debug!("sync writer received shutdown");
                    break;
                }
            }
        }

        debug!("sync writer stopped");
    }

    async fn execute_sync(&self) {
        // Clear before reading so any mutation after this point re-arms a sync.
        self.pending.store(false, Ordering::SeqCst);
        let labels = self.store.snapshot();

        match self.sheet.overwrite_all(&labels).await {
            Ok(rows) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                info!(rows, "roster synced");
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, members = labels.len(), "roster sync failed");
            }
        }
    }
}

/// Cloneable handle for requesting syncs.
#[derive(Clone)]
pub struct SyncHandle {
    op_tx: mpsc::UnboundedSender<WriterOp>,
    pending: Arc<AtomicBool>,
    counters: Arc<SyncCounters>,
}

impl SyncHandle {
    /// Request that the remote roster be brought up to date.
    ///
    /// Returns `true` if a new sync was queued, `false` if the request was
    /// coalesced into one that has not started yet (or the writer is gone).
    pub fn request_sync(&self) -> bool {
        if self.pending.swap(true, Ordering::SeqCst) {
            trace!("sync already pending, coalesced");
            return false;
        }

        if self.op_tx.send(WriterOp::Sync).is_err() {
            warn!("sync writer stopped, dropping sync request");
            self.pending.store(false, Ordering::SeqCst);
            return false;
        }

        debug!("sync queued");
        true
    }

    /// Whether a sync is queued and has not started.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until every op queued before this call has finished.
    pub async fn flush(&self) -> Result<(), EngineError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.op_tx
            .send(WriterOp::Flush {
                response: response_tx,
            })
            .map_err(|_| EngineError::WriterClosed("writer channel closed".to_string()))?;

        response_rx
            .await
            .map_err(|_| EngineError::WriterClosed("flush response dropped".to_string()))
    }

    /// Stop the writer after it finishes every op queued before this call.
    pub fn shutdown(&self) {
        if self.op_tx.send(WriterOp::Shutdown).is_err() {
            warn!("sync writer already stopped");
        }
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}
