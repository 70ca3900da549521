//! ## Peer proxies
//!
//! One [PeerProxy] per machine subsystem wraps the pair of mailboxes to that
//! peer: an outbound command slot drained from a FIFO at a bounded cadence,
//! and an inbound status slot consumed by the reconciliation loop. The proxy
//! also carries the in-flight [MoveIntent] so reconciliation can map a bare
//! `PickedUp`/`DroppedOff` edge back to the locations it refers to.

use crate::config::{self, LocationId};
use crate::estop::EstopState;
use crate::network::mailbox::{LatestValueChannel, MailboxReader};
use crate::network::message::{Command, Peer, PeerStatus};
use crate::print;
use crate::wms::JobKind;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

/// The locations an in-flight job touches, recorded at dispatch time.
///
/// `pickup` is `None` for jobs without a pickup phase (startup recovery:
/// the pallet is already on the carrier). `job` names the queue entry this
/// job serves, if any; the entry stays queued until the dropoff is
/// reconciled, so an abandoned job leaves the request in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveIntent {
    /// Applied when the peer reports `PickedUp`: (from, to).
    pub pickup: Option<(LocationId, LocationId)>,
    /// Applied when the peer reports `DroppedOff`: (from, to).
    pub dropoff: (LocationId, LocationId),
    /// The queue entry satisfied when the dropoff lands.
    pub job: Option<(JobKind, LocationId)>,
}

/// A clonable proxy for one machine peer.
#[derive(Clone, Debug)]
pub struct PeerProxy {
    /// Which subsystem this proxy talks to.
    pub id: Peer,
    cmd_mailbox: LatestValueChannel<Command>,
    status_mailbox: LatestValueChannel<PeerStatus>,
    fifo_tx: mpsc::UnboundedSender<Command>,
    status_tx: Arc<watch::Sender<PeerStatus>>,
    intent: Arc<Mutex<Option<MoveIntent>>>,
}

impl PeerProxy {
    /// Creates the proxy and spawns its dispatch-queue drain task.
    ///
    /// The reported status starts as `Homing`: nothing is dispatched to a
    /// peer that has not yet announced itself.
    pub fn spawn(id: Peer, estop_rx: watch::Receiver<EstopState>) -> PeerProxy {
        let (fifo_tx, fifo_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(PeerStatus::Homing);
        let proxy = PeerProxy {
            id,
            cmd_mailbox: LatestValueChannel::new(),
            status_mailbox: LatestValueChannel::new(),
            fifo_tx,
            status_tx: Arc::new(status_tx),
            intent: Arc::new(Mutex::new(None)),
        };
        {
            let proxy = proxy.clone();
            tokio::spawn(async move {
                drain_loop(proxy, fifo_rx, estop_rx).await;
            });
        }
        proxy
    }

    /// Appends a command to this peer's dispatch queue.
    pub fn enqueue(&self, cmd: Command) {
        if self.fifo_tx.send(cmd).is_err() {
            print::cosmic_err(format!("Dispatch queue for {:?} is gone", self.id));
        }
    }

    /// Writes straight into the outbound mailbox, bypassing the FIFO and
    /// its gates. Only the emergency-stop broadcasts use this.
    pub fn priority_send(&self, cmd: Command) {
        self.cmd_mailbox.send(cmd);
    }

    /// A reader on the outbound command slot (the wire writer, and tests).
    pub fn command_reader(&self) -> MailboxReader<Command> {
        self.cmd_mailbox.reader()
    }

    /// Writes an inbound status into the lossy status slot (the wire reader).
    pub fn push_status(&self, status: PeerStatus) {
        self.status_mailbox.send(status);
    }

    /// A reader on the inbound status slot (the reconciliation loop).
    pub fn status_reader(&self) -> MailboxReader<PeerStatus> {
        self.status_mailbox.reader()
    }

    /// The last reconciled status.
    pub fn status(&self) -> PeerStatus {
        *self.status_tx.borrow()
    }

    /// Updates the reconciled status. Called by the reconciliation loop only.
    pub fn set_status(&self, status: PeerStatus) {
        self.status_tx.send_replace(status);
    }

    /// Waitable view of the reconciled status.
    pub fn status_watch(&self) -> watch::Receiver<PeerStatus> {
        self.status_tx.subscribe()
    }

    /// Records the locations the next `PickedUp`/`DroppedOff` edges refer to.
    pub fn set_intent(&self, intent: MoveIntent) {
        if let Ok(mut slot) = self.intent.lock() {
            *slot = Some(intent);
        }
    }

    /// The current in-flight intent, if any.
    pub fn intent(&self) -> Option<MoveIntent> {
        self.intent.lock().ok().and_then(|slot| *slot)
    }

    /// Clears the in-flight intent (job finished or abandoned).
    pub fn clear_intent(&self) {
        if let Ok(mut slot) = self.intent.lock() {
            *slot = None;
        }
    }

    /// Whether a job is in flight on this peer.
    pub fn busy(&self) -> bool {
        self.intent().is_some()
    }
}

/// Drains one peer's FIFO into its outbound mailbox.
///
/// Every command waits for the gates (estop clear, peer neither homing nor
/// faulted), is preceded by a neutral sentinel when it equals the previous
/// send (the mailbox only wakes readers on *changed* values), and is
/// followed by the settle time so the peer's poll loop has certainly
/// observed it before the next send overwrites the slot.
async fn drain_loop(
    proxy: PeerProxy,
    mut fifo_rx: mpsc::UnboundedReceiver<Command>,
    estop_rx: watch::Receiver<EstopState>,
) {
    let mut last_sent: Option<Command> = None;
    while let Some(cmd) = fifo_rx.recv().await {
        loop {
            let clear = *estop_rx.borrow() == EstopState::Clear;
            let blocked = matches!(
                proxy.status(),
                PeerStatus::Homing | PeerStatus::Fault(_)
            );
            if clear && !blocked {
                break;
            }
            sleep(config::GATE_BACKOFF).await;
        }

        if last_sent.as_ref() == Some(&cmd) && cmd != Command::Reset {
            proxy.cmd_mailbox.send(Command::Reset);
            sleep(config::DISPATCH_SETTLE).await;
        }
        proxy.cmd_mailbox.send(cmd.clone());
        last_sent = Some(cmd);
        sleep(config::DISPATCH_SETTLE).await;
    }
}
