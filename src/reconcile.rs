//! ## Inbound reconciliation
//!
//! One loop per machine peer consumes distinct status values from the lossy
//! inbound slot and maps them, together with the in-flight [MoveIntent], to
//! inventory transfers. All inventory writes funnel through here (via the
//! WMS actor); the scheduler and orchestrator only record intents.
//!
//! Intermediate statuses can be overwritten before we see them. The mapping
//! therefore keys on the *meaning* of each edge, not on having observed the
//! full sequence: a `DroppedOff` with an intent still holding a pickup pair
//! means the `PickedUp` edge was lost, and both halves are applied.

use crate::network::message::{FaultKind, Peer, PeerStatus};
use crate::network::peer::PeerProxy;
use crate::print;
use crate::wms::WmsHandle;
use tokio::sync::mpsc;

/// Spawns the reconciliation loop for one peer. Fault edges are forwarded
/// to the operator task, which owns the fault log.
pub fn spawn_reconcile(
    proxy: PeerProxy,
    wms: WmsHandle,
    fault_tx: mpsc::UnboundedSender<(Peer, FaultKind)>,
) {
    tokio::spawn(async move {
        let mut reader = proxy.status_reader();
        loop {
            let status = reader.wait_for_change().await;
            apply(&proxy, &wms, &fault_tx, status).await;
        }
    });
}

async fn apply(
    proxy: &PeerProxy,
    wms: &WmsHandle,
    fault_tx: &mpsc::UnboundedSender<(Peer, FaultKind)>,
    status: PeerStatus,
) {
    proxy.set_status(status);
    match status {
        PeerStatus::Homing => {
            print::info(format!("{:?} is homing", proxy.id));
        }
        PeerStatus::Ready => {}
        PeerStatus::PickedUp => {
            let Some(intent) = proxy.intent() else {
                print::warn(format!("{:?} reported PickedUp with no job in flight", proxy.id));
                return;
            };
            if let Some((from, to)) = intent.pickup {
                if let Err(e) = wms.transfer(from, to).await {
                    print::warn(format!(
                        "Pickup by {:?} did not match the inventory ({:?}), dropping the job",
                        proxy.id, e
                    ));
                    proxy.clear_intent();
                }
            }
        }
        PeerStatus::DroppedOff => {
            let Some(intent) = proxy.intent() else {
                print::warn(format!("{:?} reported DroppedOff with no job in flight", proxy.id));
                return;
            };
            // A lost PickedUp edge leaves the pickup half unapplied; catch
            // up before the dropoff half.
            if let Some((from, to)) = intent.pickup {
                if !wms.snapshot().await.is_occupied(intent.dropoff.0) {
                    if let Err(e) = wms.transfer(from, to).await {
                        print::warn(format!(
                            "Catch-up pickup for {:?} failed ({:?})",
                            proxy.id, e
                        ));
                    }
                }
            }
            let (from, to) = intent.dropoff;
            if let Err(e) = wms.transfer(from, to).await {
                print::warn(format!(
                    "Dropoff by {:?} did not match the inventory ({:?})",
                    proxy.id, e
                ));
            } else {
                print::ok(format!("{:?} finished its job ({} -> {})", proxy.id, from, to));
            }
            // The request is satisfied only now; until here it stayed
            // queued, so an abandoned job never loses it.
            if let Some((kind, loc)) = intent.job {
                wms.queue_cancel(kind, loc).await;
            }
            proxy.clear_intent();
        }
        PeerStatus::Fault(kind) => {
            print::err(format!("{:?} fault: {}", proxy.id, kind.description()));
            let _ = fault_tx.send((proxy.id, kind));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::estop::EstopState;
    use crate::network::peer::MoveIntent;
    use crate::wms::{spawn_wms, Inventory, JobKind};
    use tokio::sync::watch;
    use tokio::time::{sleep, Duration};

    fn crane() -> PeerProxy {
        let (_, erx) = watch::channel(EstopState::Clear);
        PeerProxy::spawn(Peer::Crane, erx)
    }

    async fn settle() {
        sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn retrieve_cycle_moves_the_pallet_through_the_carrier() {
        let mut inv = Inventory::new(60);
        inv.set_contents(10, Some("GearA".to_string()));
        let wms = spawn_wms(inv, None, None);
        let proxy = crane();
        let (ftx, _frx) = mpsc::unbounded_channel();
        spawn_reconcile(proxy.clone(), wms.clone(), ftx);

        proxy.set_intent(MoveIntent {
            pickup: Some((10, config::CRANE_CARRIER)),
            dropoff: (config::CRANE_CARRIER, config::CHAIN_OUT),
            job: None,
        });

        proxy.push_status(PeerStatus::PickedUp);
        settle().await;
        let snap = wms.snapshot().await;
        assert!(!snap.is_occupied(10));
        assert_eq!(
            snap.location(config::CRANE_CARRIER).unwrap().name.as_deref(),
            Some("GearA")
        );

        proxy.push_status(PeerStatus::DroppedOff);
        settle().await;
        let snap = wms.snapshot().await;
        assert!(!snap.is_occupied(config::CRANE_CARRIER));
        assert_eq!(
            snap.location(config::CHAIN_OUT).unwrap().name.as_deref(),
            Some("GearA")
        );
        assert!(!proxy.busy());
    }

    #[tokio::test]
    async fn lost_pickup_edge_is_caught_up_on_dropoff() {
        let mut inv = Inventory::new(60);
        inv.set_contents(10, Some("GearA".to_string()));
        let wms = spawn_wms(inv, None, None);
        let proxy = crane();
        let (ftx, _frx) = mpsc::unbounded_channel();
        spawn_reconcile(proxy.clone(), wms.clone(), ftx);

        proxy.set_intent(MoveIntent {
            pickup: Some((10, config::CRANE_CARRIER)),
            dropoff: (config::CRANE_CARRIER, config::CHAIN_OUT),
            job: None,
        });

        // The PickedUp edge is overwritten before anyone reads it.
        proxy.push_status(PeerStatus::DroppedOff);
        settle().await;

        let snap = wms.snapshot().await;
        assert!(!snap.is_occupied(10));
        assert!(!snap.is_occupied(config::CRANE_CARRIER));
        assert_eq!(
            snap.location(config::CHAIN_OUT).unwrap().name.as_deref(),
            Some("GearA")
        );
    }

    #[tokio::test]
    async fn fault_edges_reach_the_fault_channel() {
        let wms = spawn_wms(Inventory::new(10), None, None);
        let proxy = crane();
        let (ftx, mut frx) = mpsc::unbounded_channel();
        spawn_reconcile(proxy.clone(), wms, ftx);

        proxy.push_status(PeerStatus::Fault(FaultKind::CraneSensorStuck));
        assert_eq!(
            frx.recv().await,
            Some((Peer::Crane, FaultKind::CraneSensorStuck))
        );
        assert_eq!(
            proxy.status(),
            PeerStatus::Fault(FaultKind::CraneSensorStuck)
        );
    }

    #[tokio::test]
    async fn queue_entry_is_removed_when_the_dropoff_lands() {
        let mut inv = Inventory::new(60);
        inv.set_contents(10, Some("GearA".to_string()));
        let wms = spawn_wms(inv, None, None);
        let proxy = crane();
        let (ftx, _frx) = mpsc::unbounded_channel();
        spawn_reconcile(proxy.clone(), wms.clone(), ftx);

        wms.queue_push(JobKind::Retrieve, 10).await;
        proxy.set_intent(MoveIntent {
            pickup: Some((10, config::CRANE_CARRIER)),
            dropoff: (config::CRANE_CARRIER, config::CHAIN_OUT),
            job: Some((JobKind::Retrieve, 10)),
        });

        // In flight: the request is still queued.
        proxy.push_status(PeerStatus::PickedUp);
        settle().await;
        assert_eq!(wms.queue_front(JobKind::Retrieve).await, Some(10));

        proxy.push_status(PeerStatus::DroppedOff);
        settle().await;
        assert_eq!(wms.queue_front(JobKind::Retrieve).await, None);
        assert!(!proxy.busy());
    }

    #[tokio::test]
    async fn abandoned_job_keeps_its_queue_entry() {
        // Slot 10 turns out to be empty, so the pickup fails and the job is
        // abandoned. The request must survive for the next decision round
        // instead of vanishing with the job.
        let wms = spawn_wms(Inventory::new(60), None, None);
        let proxy = crane();
        let (ftx, _frx) = mpsc::unbounded_channel();
        spawn_reconcile(proxy.clone(), wms.clone(), ftx);

        wms.queue_push(JobKind::Retrieve, 10).await;
        proxy.set_intent(MoveIntent {
            pickup: Some((10, config::CRANE_CARRIER)),
            dropoff: (config::CRANE_CARRIER, config::CHAIN_OUT),
            job: Some((JobKind::Retrieve, 10)),
        });
        proxy.push_status(PeerStatus::PickedUp);
        settle().await;

        assert!(!proxy.busy());
        assert_eq!(wms.queue_front(JobKind::Retrieve).await, Some(10));
    }

    #[tokio::test]
    async fn stale_pickup_drops_the_job_silently() {
        // Slot 10 is empty although the intent assumed it was not.
        let wms = spawn_wms(Inventory::new(60), None, None);
        let proxy = crane();
        let (ftx, _frx) = mpsc::unbounded_channel();
        spawn_reconcile(proxy.clone(), wms.clone(), ftx);

        proxy.set_intent(MoveIntent {
            pickup: Some((10, config::CRANE_CARRIER)),
            dropoff: (config::CRANE_CARRIER, config::CHAIN_OUT),
            job: None,
        });
        proxy.push_status(PeerStatus::PickedUp);
        settle().await;

        assert!(!proxy.busy());
        assert!(!wms.snapshot().await.is_occupied(config::CRANE_CARRIER));
    }
}
