//! ## The WMS actor
//!
//! The inventory and the three job queues are owned by exactly one task.
//! Every other component holds a [WmsHandle] and talks to the store over an
//! mpsc channel with oneshot replies, so there is no locking and no way to
//! observe a half-applied mutation. The actor also persists the ledgers and
//! feeds location updates to the display peer after each change.

use crate::config::LocationId;
use crate::network::message::DisplayMsg;
use crate::print;
use crate::wms::{ledger, Inventory, JobKind, JobQueue, PendingMark, TransferError};
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

enum WmsRequest {
    Snapshot {
        reply: oneshot::Sender<Inventory>,
    },
    Transfer {
        from: LocationId,
        to: LocationId,
        reply: oneshot::Sender<Result<(), TransferError>>,
    },
    SetContents {
        loc: LocationId,
        name: Option<String>,
        reply: oneshot::Sender<bool>,
    },
    SetPending {
        loc: LocationId,
        mark: PendingMark,
        reply: oneshot::Sender<bool>,
    },
    QueuePush {
        kind: JobKind,
        loc: LocationId,
        reply: oneshot::Sender<bool>,
    },
    QueueCancel {
        kind: JobKind,
        loc: LocationId,
        reply: oneshot::Sender<bool>,
    },
    QueueFront {
        kind: JobKind,
        reply: oneshot::Sender<Option<LocationId>>,
    },
    OldestFloorPallet {
        reply: oneshot::Sender<Option<LocationId>>,
    },
}

/// A clonable handle to the WMS actor.
#[derive(Clone, Debug)]
pub struct WmsHandle {
    tx: mpsc::UnboundedSender<WmsRequest>,
}

impl WmsHandle {
    async fn request<R>(&self, req: WmsRequest, rx: oneshot::Receiver<R>) -> Option<R> {
        if self.tx.send(req).is_err() {
            print::cosmic_err("The WMS actor is gone".to_string());
            return None;
        }
        rx.await.ok()
    }

    /// A clone of the full inventory at one consistent instant.
    pub async fn snapshot(&self) -> Inventory {
        let (tx, rx) = oneshot::channel();
        self.request(WmsRequest::Snapshot { reply: tx }, rx)
            .await
            .unwrap_or_else(|| Inventory::new(0))
    }

    /// Moves a pallet from `from` to `to` (strict hand-off, persisted).
    pub async fn transfer(&self, from: LocationId, to: LocationId) -> Result<(), TransferError> {
        let (tx, rx) = oneshot::channel();
        self.request(WmsRequest::Transfer { from, to, reply: tx }, rx)
            .await
            .unwrap_or(Err(TransferError::SourceEmpty))
    }

    /// Overwrites a location's contents (operator correction).
    pub async fn set_contents(&self, loc: LocationId, name: Option<String>) -> bool {
        let (tx, rx) = oneshot::channel();
        self.request(WmsRequest::SetContents { loc, name, reply: tx }, rx)
            .await
            .unwrap_or(false)
    }

    /// Sets the pending mark on a location.
    pub async fn set_pending(&self, loc: LocationId, mark: PendingMark) -> bool {
        let (tx, rx) = oneshot::channel();
        self.request(WmsRequest::SetPending { loc, mark, reply: tx }, rx)
            .await
            .unwrap_or(false)
    }

    /// Queues `loc` for service. Idempotent.
    pub async fn queue_push(&self, kind: JobKind, loc: LocationId) -> bool {
        let (tx, rx) = oneshot::channel();
        self.request(WmsRequest::QueuePush { kind, loc, reply: tx }, rx)
            .await
            .unwrap_or(false)
    }

    /// Removes `loc` from a queue. Idempotent.
    pub async fn queue_cancel(&self, kind: JobKind, loc: LocationId) -> bool {
        let (tx, rx) = oneshot::channel();
        self.request(WmsRequest::QueueCancel { kind, loc, reply: tx }, rx)
            .await
            .unwrap_or(false)
    }

    /// The oldest queued entry without removing it.
    pub async fn queue_front(&self, kind: JobKind) -> Option<LocationId> {
        let (tx, rx) = oneshot::channel();
        self.request(WmsRequest::QueueFront { kind, reply: tx }, rx)
            .await
            .flatten()
    }

    /// The occupied floor stage whose pallet has sat the longest.
    pub async fn oldest_floor_pallet(&self) -> Option<LocationId> {
        let (tx, rx) = oneshot::channel();
        self.request(WmsRequest::OldestFloorPallet { reply: tx }, rx)
            .await
            .flatten()
    }
}

struct WmsActor {
    inv: Inventory,
    store_q: JobQueue,
    retrieve_q: JobQueue,
    takeout_q: JobQueue,
    data_dir: Option<PathBuf>,
    display_tx: Option<mpsc::UnboundedSender<DisplayMsg>>,
    started: Instant,
}

impl WmsActor {
    fn queue(&mut self, kind: JobKind) -> &mut JobQueue {
        match kind {
            JobKind::Store => &mut self.store_q,
            JobKind::Retrieve => &mut self.retrieve_q,
            JobKind::FloorTakeout => &mut self.takeout_q,
        }
    }

    fn persist(&self) {
        if let Some(dir) = &self.data_dir {
            if let Err(e) = ledger::save(dir, &self.inv) {
                print::err(format!("Failed to persist the ledgers: {}", e));
            }
        }
    }

    fn notify(&self, msg: DisplayMsg) {
        if let Some(tx) = &self.display_tx {
            let _ = tx.send(msg);
        }
    }

    fn handle(&mut self, req: WmsRequest) {
        match req {
            WmsRequest::Snapshot { reply } => {
                let _ = reply.send(self.inv.clone());
            }
            WmsRequest::Transfer { from, to, reply } => {
                let now = self.started.elapsed().as_secs();
                let res = self.inv.transfer(from, to, now);
                if res.is_ok() {
                    self.persist();
                    self.notify(DisplayMsg::Transfer { from, to });
                }
                let _ = reply.send(res);
            }
            WmsRequest::SetContents { loc, name, reply } => {
                let changed = self.inv.set_contents(loc, name.clone());
                if changed {
                    self.persist();
                    self.notify(DisplayMsg::WmsUpdate { loc, name });
                }
                let _ = reply.send(changed);
            }
            WmsRequest::SetPending { loc, mark, reply } => {
                let _ = reply.send(self.inv.set_pending(loc, mark));
            }
            WmsRequest::QueuePush { kind, loc, reply } => {
                let _ = reply.send(self.queue(kind).push(loc));
            }
            WmsRequest::QueueCancel { kind, loc, reply } => {
                let _ = reply.send(self.queue(kind).cancel(loc));
            }
            WmsRequest::QueueFront { kind, reply } => {
                let _ = reply.send(self.queue(kind).front());
            }
            WmsRequest::OldestFloorPallet { reply } => {
                let _ = reply.send(self.inv.oldest_floor_pallet());
            }
        }
    }
}

/// Spawns the WMS actor task and returns the handle everyone shares.
///
/// `data_dir = None` disables persistence (tests); `display_tx = None`
/// disables display notifications.
pub fn spawn_wms(
    inv: Inventory,
    data_dir: Option<PathBuf>,
    display_tx: Option<mpsc::UnboundedSender<DisplayMsg>>,
) -> WmsHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut actor = WmsActor {
        inv,
        store_q: JobQueue::default(),
        retrieve_q: JobQueue::default(),
        takeout_q: JobQueue::default(),
        data_dir,
        display_tx,
        started: Instant::now(),
    };
    tokio::spawn(async move {
        while let Some(req) = rx.recv().await {
            actor.handle(req);
        }
    });
    WmsHandle { tx }
}
