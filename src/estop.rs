//! ## Emergency-stop coordination
//!
//! One global state gates all dispatch: `Clear -> Triggered -> PendingClear
//! -> Clear`. The broadcast to the peers happens exactly once per edge and
//! bypasses the dispatch queues, which stop draining while the state is not
//! `Clear`. A reset is refused while any peer is homing, and `PendingClear`
//! only becomes `Clear` once every peer has finished re-homing after the
//! reset broadcast.

use crate::config;
use crate::network::message::{Command, DisplayMsg, PeerStatus};
use crate::network::peer::PeerProxy;
use crate::print;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

/// The global emergency-stop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstopState {
    /// Normal operation, dispatch allowed.
    Clear,
    /// Stopped. Nothing is dispatched, queues back up.
    Triggered,
    /// Reset broadcast sent, waiting for the peers to finish re-homing.
    PendingClear,
}

/// Handle to the emergency-stop state, shared by every component.
#[derive(Clone, Debug)]
pub struct Estop {
    tx: Arc<watch::Sender<EstopState>>,
    peers: Arc<Mutex<Vec<PeerProxy>>>,
    display_tx: Option<mpsc::UnboundedSender<DisplayMsg>>,
}

impl Estop {
    /// Creates the coordinator. The system starts stopped: the operator must
    /// reset once at startup, which doubles as the "everything homed and
    /// announced itself" confirmation.
    ///
    /// The machine peers are [registered](Estop::register) after their
    /// proxies are spawned, since each proxy needs this coordinator's state
    /// receiver first.
    pub fn new(display_tx: Option<mpsc::UnboundedSender<DisplayMsg>>) -> Estop {
        let (tx, _) = watch::channel(EstopState::Triggered);
        Estop {
            tx: Arc::new(tx),
            peers: Arc::new(Mutex::new(Vec::new())),
            display_tx,
        }
    }

    /// Adds a machine peer to the broadcast set.
    pub fn register(&self, peer: PeerProxy) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.push(peer);
        }
    }

    fn peers(&self) -> Vec<PeerProxy> {
        self.peers.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// The current state.
    pub fn state(&self) -> EstopState {
        *self.tx.borrow()
    }

    /// A waitable view of the state, handed to every drain and dispatch loop.
    pub fn subscribe(&self) -> watch::Receiver<EstopState> {
        self.tx.subscribe()
    }

    /// Trips the emergency stop. Idempotent per edge: the broadcast goes out
    /// once, repeated pushes while already triggered do nothing.
    pub fn trigger(&self) {
        if self.state() == EstopState::Triggered {
            return;
        }
        self.tx.send_replace(EstopState::Triggered);
        print::warn("Emergency stop pushed, halting all dispatch".to_string());
        for peer in self.peers() {
            peer.priority_send(Command::EmergencyStopPushed);
        }
        self.notify(DisplayMsg::Estop(true));
    }

    /// Requests a reset. Refused (returns false) unless the state is
    /// `Triggered` and no peer is homing. On success the reset broadcast
    /// goes out once and a background wait promotes `PendingClear` to
    /// `Clear` when every peer has finished re-homing.
    pub fn request_reset(&self) -> bool {
        if self.state() != EstopState::Triggered {
            return false;
        }
        let peers = self.peers();
        if let Some(peer) = peers.iter().find(|p| p.status() == PeerStatus::Homing) {
            print::warn(format!(
                "Emergency-stop reset refused: {:?} is still homing",
                peer.id
            ));
            return false;
        }

        self.tx.send_replace(EstopState::PendingClear);
        for peer in &peers {
            peer.priority_send(Command::EmergencyStopReset);
        }

        let this = self.clone();
        tokio::spawn(async move {
            // Give the peers one settle period to *start* re-homing before
            // we begin waiting for them to finish.
            sleep(config::DISPATCH_SETTLE).await;
            loop {
                if this.state() != EstopState::PendingClear {
                    // A new trigger won the race.
                    return;
                }
                if this.peers().iter().all(|p| p.status() != PeerStatus::Homing) {
                    break;
                }
                sleep(config::GATE_BACKOFF).await;
            }
            this.tx.send_replace(EstopState::Clear);
            print::ok("Emergency stop cleared, dispatch resumed".to_string());
            this.notify(DisplayMsg::Estop(false));
        });
        true
    }

    fn notify(&self, msg: DisplayMsg) {
        if let Some(tx) = &self.display_tx {
            let _ = tx.send(msg);
        }
    }
}
