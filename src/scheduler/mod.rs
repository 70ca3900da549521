//! ## Job scheduling
//!
//! Decides the next unit of work for the crane and for the transfer arm.
//! The decision logic is pure (inventory snapshot in, decision out) so it
//! can be tested without any task machinery; thin poll loops around it do
//! the dispatching. Job state lives in the peers' intents: a job is
//! `PickupInFlight` while the intent still holds its pickup pair and
//! `DropoffInFlight` after, driven only by reconciled status edges.

use crate::config::{self, LocationId};
use crate::estop::EstopState;
use crate::network::message::Command;
use crate::network::peer::{MoveIntent, PeerProxy};
use crate::print;
use crate::wms::{Inventory, JobKind, PendingMark, WmsHandle};
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::sleep;

pub mod conveyor;

/// Operating mode of one subsystem.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// No dispatch at all.
    Off,
    /// The scheduler picks targets itself when no manual request is queued.
    Automatic,
    /// Only operator-queued requests are served.
    Manual,
}

/// The subsystems an operator can set a mode for.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    /// Crane store direction (input chain -> rack).
    CraneInput,
    /// Crane retrieve direction (rack -> output chain).
    CraneOutput,
    /// The conveyor orchestrator.
    Conveyors,
    /// The transfer arm. Has no Manual mode.
    Arm,
}

/// All subsystem modes. Everything starts `Off`; the operator enables what
/// should run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modes {
    /// Crane store direction.
    pub crane_input: Mode,
    /// Crane retrieve direction.
    pub crane_output: Mode,
    /// Conveyor orchestrator.
    pub conveyors: Mode,
    /// Transfer arm.
    pub arm: Mode,
}

impl Default for Modes {
    fn default() -> Self {
        Modes {
            crane_input: Mode::Off,
            crane_output: Mode::Off,
            conveyors: Mode::Off,
            arm: Mode::Off,
        }
    }
}

impl Modes {
    /// Sets one subsystem's mode.
    pub fn set(&mut self, subsystem: Subsystem, mode: Mode) {
        match subsystem {
            Subsystem::CraneInput => self.crane_input = mode,
            Subsystem::CraneOutput => self.crane_output = mode,
            Subsystem::Conveyors => self.conveyors = mode,
            Subsystem::Arm => self.arm = mode,
        }
    }
}

/// Outcome of one decision round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Dispatch this command with this intent. When the intent carries a
    /// `job`, the queue entry stays in place until the dropoff reconciles,
    /// so a job that gets abandoned mid-flight leaves the request queued.
    Dispatch {
        /// The command to enqueue on the peer.
        command: Command,
        /// The locations the job's status edges refer to.
        intent: MoveIntent,
    },
    /// This queue entry no longer matches the inventory; remove it and
    /// re-evaluate next round.
    DropStale(JobKind, LocationId),
    /// Nothing to do.
    Idle,
}

/// Whether pallets arriving on the input chain should be diverted to the
/// lift table for the arm instead of being stored by the crane.
pub fn divert_to_lift(inv: &Inventory, modes: Modes, lift_outbound: bool) -> bool {
    modes.arm == Mode::Automatic
        && !lift_outbound
        && inv.floor_occupancy() < config::FLOOR_CAPACITY
}

/// Picks the crane's next job, if any.
///
/// Precedence: a pallet stranded on the carrier is always stored first (it
/// is physically in the way and must not be lost track of); then retrieves,
/// then stores, manual requests before automatic selection in both.
pub fn decide_crane(
    inv: &Inventory,
    store_front: Option<LocationId>,
    retrieve_front: Option<LocationId>,
    modes: Modes,
    divert: bool,
    rng: &mut impl Rng,
) -> Decision {
    // Startup recovery: a pallet left on the carrier from a prior run.
    if inv.is_occupied(config::CRANE_CARRIER) {
        let empty = inv.empty_rack_slots();
        return match empty.choose(rng) {
            Some(slot) => Decision::Dispatch {
                command: Command::StoreCarried(*slot),
                intent: MoveIntent {
                    pickup: None,
                    dropoff: (config::CRANE_CARRIER, *slot),
                    job: None,
                },
            },
            None => Decision::Idle,
        };
    }

    // Retrieve: rack -> output chain, needs the output stage free.
    if modes.crane_output != Mode::Off && !inv.is_occupied(config::CHAIN_OUT) {
        if let Some(slot) = retrieve_front {
            if inv.is_occupied(slot) {
                return Decision::Dispatch {
                    command: Command::RetrieveAt(slot),
                    intent: MoveIntent {
                        pickup: Some((slot, config::CRANE_CARRIER)),
                        dropoff: (config::CRANE_CARRIER, config::CHAIN_OUT),
                        job: Some((JobKind::Retrieve, slot)),
                    },
                };
            }
            return Decision::DropStale(JobKind::Retrieve, slot);
        }
        if modes.crane_output == Mode::Automatic {
            if let Some(slot) = inv.occupied_rack_slots().choose(rng) {
                return Decision::Dispatch {
                    command: Command::RetrieveAt(*slot),
                    intent: MoveIntent {
                        pickup: Some((*slot, config::CRANE_CARRIER)),
                        dropoff: (config::CRANE_CARRIER, config::CHAIN_OUT),
                        job: None,
                    },
                };
            }
        }
    }

    // Store: input chain -> rack, needs a pallet waiting on the input stage
    // that the conveyors are not about to divert to the arm.
    if modes.crane_input != Mode::Off && inv.is_occupied(config::CHAIN_IN) && !divert {
        if let Some(slot) = store_front {
            if !inv.is_occupied(slot) {
                return Decision::Dispatch {
                    command: Command::StoreAt(slot),
                    intent: MoveIntent {
                        pickup: Some((config::CHAIN_IN, config::CRANE_CARRIER)),
                        dropoff: (config::CRANE_CARRIER, slot),
                        job: Some((JobKind::Store, slot)),
                    },
                };
            }
            return Decision::DropStale(JobKind::Store, slot);
        }
        if modes.crane_input == Mode::Automatic {
            if let Some(slot) = inv.empty_rack_slots().choose(rng) {
                return Decision::Dispatch {
                    command: Command::StoreAt(*slot),
                    intent: MoveIntent {
                        pickup: Some((config::CHAIN_IN, config::CRANE_CARRIER)),
                        dropoff: (config::CRANE_CARRIER, *slot),
                        job: None,
                    },
                };
            }
        }
    }

    Decision::Idle
}

/// Picks the transfer arm's next job, if any.
///
/// Inbound (lift -> floor) runs while the floor has room; outbound
/// (floor -> lift) only once nothing is waiting inbound. The alternation
/// keeps the single arm from weaving between a fixture it is reaching for
/// and one it just placed. This is a policy choice, not a measured safety
/// envelope.
pub fn decide_arm(
    inv: &Inventory,
    takeout_front: Option<LocationId>,
    modes: Modes,
    lift_outbound: bool,
) -> Decision {
    if modes.arm != Mode::Automatic {
        return Decision::Idle;
    }

    // Inbound: a pallet is waiting on the lift table.
    if inv.is_occupied(config::LIFT_TABLE) && !lift_outbound {
        if inv.floor_occupancy() >= config::FLOOR_CAPACITY {
            return Decision::Idle;
        }
        let free = config::floor_ids().find(|id| !inv.is_occupied(*id));
        if let Some(floor) = free {
            return Decision::Dispatch {
                command: Command::MoveBetween(config::LIFT_TABLE, floor),
                intent: MoveIntent {
                    pickup: Some((config::LIFT_TABLE, config::ARM_GRIPPER)),
                    dropoff: (config::ARM_GRIPPER, floor),
                    job: None,
                },
            };
        }
        return Decision::Idle;
    }

    // Outbound: a requested takeout, only with the lift free and inbound
    // drained.
    if let Some(floor) = takeout_front {
        if inv.is_occupied(config::LIFT_TABLE) || lift_outbound {
            return Decision::Idle;
        }
        if inv.is_occupied(floor) {
            return Decision::Dispatch {
                command: Command::MoveBetween(floor, config::LIFT_TABLE),
                intent: MoveIntent {
                    pickup: Some((floor, config::ARM_GRIPPER)),
                    dropoff: (config::ARM_GRIPPER, config::LIFT_TABLE),
                    job: Some((JobKind::FloorTakeout, floor)),
                },
            };
        }
        return Decision::DropStale(JobKind::FloorTakeout, floor);
    }

    Decision::Idle
}

/// Everything the dispatch loops share.
#[derive(Clone)]
pub struct SchedulerCtx {
    /// Handle to the inventory and queues.
    pub wms: WmsHandle,
    /// The crane proxy.
    pub crane: PeerProxy,
    /// The arm proxy.
    pub arm: PeerProxy,
    /// The conveyor proxy.
    pub conveyor: PeerProxy,
    /// Emergency-stop state.
    pub estop: watch::Receiver<EstopState>,
    /// Subsystem modes.
    pub modes: watch::Receiver<Modes>,
    /// Set while an outbound pallet is on (or headed to) the lift table.
    pub lift_outbound: Arc<AtomicBool>,
}

fn gates_open(ctx: &SchedulerCtx, peer: &PeerProxy) -> bool {
    if *ctx.estop.borrow() != EstopState::Clear {
        return false;
    }
    if peer.busy() {
        return false;
    }
    use crate::network::message::PeerStatus::*;
    matches!(peer.status(), Ready | DroppedOff)
}

/// Spawns the crane dispatch loop.
pub fn spawn_crane_loop(ctx: SchedulerCtx) {
    tokio::spawn(async move {
        loop {
            sleep(config::POLL_PERIOD).await;
            if !gates_open(&ctx, &ctx.crane) {
                sleep(config::GATE_BACKOFF).await;
                continue;
            }
            let modes = *ctx.modes.borrow();
            let inv = ctx.wms.snapshot().await;
            let store_front = ctx.wms.queue_front(JobKind::Store).await;
            let retrieve_front = ctx.wms.queue_front(JobKind::Retrieve).await;
            let divert = divert_to_lift(&inv, modes, ctx.lift_outbound.load(Ordering::SeqCst));

            let decision = {
                let mut rng = rand::rng();
                decide_crane(&inv, store_front, retrieve_front, modes, divert, &mut rng)
            };
            match decision {
                Decision::Dispatch { command, intent } => {
                    if let Some((_, loc)) = intent.job {
                        ctx.wms.set_pending(loc, PendingMark::Locked).await;
                    }
                    ctx.crane.set_intent(intent);
                    print::info(format!("Crane job: {:?}", command));
                    ctx.crane.enqueue(command);
                }
                Decision::DropStale(kind, loc) => {
                    ctx.wms.queue_cancel(kind, loc).await;
                    ctx.wms.set_pending(loc, PendingMark::None).await;
                    print::warn(format!("Dropping stale {:?} request for {}", kind, loc));
                }
                Decision::Idle => {}
            }
        }
    });
}

/// Spawns the transfer-arm dispatch loop.
pub fn spawn_arm_loop(ctx: SchedulerCtx) {
    tokio::spawn(async move {
        loop {
            sleep(config::POLL_PERIOD).await;

            // An outbound job can be abandoned mid-flight (stale pickup,
            // unacknowledged fault retry). If the gate is set but no pallet
            // ever reached the lift and nothing is moving, release it, or
            // the arm and the divert would stay blocked for good.
            if ctx.lift_outbound.load(Ordering::SeqCst)
                && !ctx.arm.busy()
                && !ctx.conveyor.busy()
                && !ctx.wms.snapshot().await.is_occupied(config::LIFT_TABLE)
            {
                ctx.lift_outbound.store(false, Ordering::SeqCst);
            }

            if !gates_open(&ctx, &ctx.arm) {
                sleep(config::GATE_BACKOFF).await;
                continue;
            }
            let modes = *ctx.modes.borrow();
            let inv = ctx.wms.snapshot().await;
            let takeout_front = ctx.wms.queue_front(JobKind::FloorTakeout).await;
            let lift_outbound = ctx.lift_outbound.load(Ordering::SeqCst);

            match decide_arm(&inv, takeout_front, modes, lift_outbound) {
                Decision::Dispatch { command, intent } => {
                    if let Some((_, loc)) = intent.job {
                        ctx.wms.set_pending(loc, PendingMark::Locked).await;
                    }
                    if intent.dropoff.1 == config::LIFT_TABLE {
                        ctx.lift_outbound.store(true, Ordering::SeqCst);
                    }
                    ctx.arm.set_intent(intent);
                    print::info(format!("Arm job: {:?}", command));
                    ctx.arm.enqueue(command);
                }
                Decision::DropStale(kind, loc) => {
                    ctx.wms.queue_cancel(kind, loc).await;
                    ctx.wms.set_pending(loc, PendingMark::None).await;
                    print::warn(format!("Dropping stale {:?} request for {}", kind, loc));
                }
                Decision::Idle => {}
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::{Peer, PeerStatus};
    use crate::reconcile::spawn_reconcile;
    use crate::wms::spawn_wms;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Duration};

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn auto_modes() -> Modes {
        Modes {
            crane_input: Mode::Automatic,
            crane_output: Mode::Automatic,
            conveyors: Mode::Automatic,
            arm: Mode::Off,
        }
    }

    #[test]
    fn manual_retrieve_beats_automatic_selection() {
        let mut inv = Inventory::new(60);
        for slot in [5, 10, 20] {
            inv.set_contents(slot, Some(format!("P{}", slot)));
        }
        let d = decide_crane(&inv, None, Some(10), auto_modes(), false, &mut rng());
        match d {
            Decision::Dispatch { command, intent } => {
                assert_eq!(command, Command::RetrieveAt(10));
                assert_eq!(intent.job, Some((JobKind::Retrieve, 10)));
            }
            other => panic!("expected a dispatch, got {:?}", other),
        }
    }

    #[test]
    fn manual_stores_are_served_in_submission_order() {
        let mut inv = Inventory::new(60);
        inv.set_contents(config::CHAIN_IN, Some("A".to_string()));
        // Output chain occupied, so the retrieve branch cannot interfere.
        inv.set_contents(config::CHAIN_OUT, Some("X".to_string()));

        // Front of the store queue is 3; 7 waits behind it.
        let d = decide_crane(&inv, Some(3), None, auto_modes(), false, &mut rng());
        match d {
            Decision::Dispatch { command, intent } => {
                assert_eq!(command, Command::StoreAt(3));
                assert_eq!(intent.job, Some((JobKind::Store, 3)));
            }
            other => panic!("expected a dispatch, got {:?}", other),
        }

        // After 3 is stored, 7 moves to the front and is served next,
        // never preempted by a random pick.
        inv.set_contents(3, Some("A".to_string()));
        let d = decide_crane(&inv, Some(7), None, auto_modes(), false, &mut rng());
        match d {
            Decision::Dispatch { command, .. } => assert_eq!(command, Command::StoreAt(7)),
            other => panic!("expected a dispatch, got {:?}", other),
        }
    }

    #[test]
    fn stranded_carrier_pallet_is_stored_before_anything_else() {
        let mut inv = Inventory::new(60);
        inv.set_contents(config::CRANE_CARRIER, Some("Leftover".to_string()));
        inv.set_contents(10, Some("GearA".to_string()));

        let d = decide_crane(&inv, None, Some(10), auto_modes(), false, &mut rng());
        match d {
            Decision::Dispatch { command, intent } => {
                assert!(matches!(command, Command::StoreCarried(_)));
                assert_eq!(intent.pickup, None);
                assert_eq!(intent.dropoff.0, config::CRANE_CARRIER);
                assert_eq!(intent.job, None);
            }
            other => panic!("expected a dispatch, got {:?}", other),
        }
    }

    #[test]
    fn stale_retrieve_entry_is_dropped_not_dispatched() {
        let inv = Inventory::new(60);
        // Slot 10 is empty although it sits at the front of the queue.
        let d = decide_crane(&inv, None, Some(10), auto_modes(), false, &mut rng());
        assert_eq!(d, Decision::DropStale(JobKind::Retrieve, 10));
    }

    #[test]
    fn full_floor_blocks_inbound_arm_jobs() {
        let mut inv = Inventory::new(60);
        inv.set_contents(config::LIFT_TABLE, Some("Waiting".to_string()));
        for id in config::floor_ids() {
            inv.set_contents(id, Some(format!("F{}", id)));
        }
        let mut modes = auto_modes();
        modes.arm = Mode::Automatic;

        assert_eq!(decide_arm(&inv, None, modes, false), Decision::Idle);
    }

    #[test]
    fn outbound_waits_until_inbound_is_drained() {
        let mut inv = Inventory::new(60);
        inv.set_contents(config::LIFT_TABLE, Some("Inbound".to_string()));
        inv.set_contents(config::FLOOR_FIRST, Some("Wanted".to_string()));
        let mut modes = auto_modes();
        modes.arm = Mode::Automatic;

        // With a pallet on the lift, the takeout request must not win.
        let d = decide_arm(&inv, Some(config::FLOOR_FIRST), modes, false);
        match d {
            Decision::Dispatch { command, .. } => {
                assert!(matches!(command, Command::MoveBetween(l, _) if l == config::LIFT_TABLE));
            }
            other => panic!("expected the inbound dispatch, got {:?}", other),
        }

        // Lift drained: now the takeout goes out.
        inv.set_contents(config::LIFT_TABLE, None);
        let d = decide_arm(&inv, Some(config::FLOOR_FIRST), modes, false);
        match d {
            Decision::Dispatch { command, intent } => {
                assert_eq!(
                    command,
                    Command::MoveBetween(config::FLOOR_FIRST, config::LIFT_TABLE)
                );
                assert_eq!(
                    intent.job,
                    Some((JobKind::FloorTakeout, config::FLOOR_FIRST))
                );
            }
            other => panic!("expected the outbound dispatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn manual_pickup_runs_end_to_end() {
        let mut inv = Inventory::new(60);
        inv.set_contents(10, Some("GearA".to_string()));
        let wms = spawn_wms(inv, None, None);

        let (_etx, erx) = watch::channel(EstopState::Clear);
        let crane = PeerProxy::spawn(Peer::Crane, erx.clone());
        let arm = PeerProxy::spawn(Peer::Arm, erx.clone());
        let conveyor = PeerProxy::spawn(Peer::Conveyor, erx.clone());
        crane.set_status(PeerStatus::Ready);

        let (ftx, _frx) = mpsc::unbounded_channel();
        spawn_reconcile(crane.clone(), wms.clone(), ftx);

        let modes = Modes {
            crane_output: Mode::Manual,
            ..Modes::default()
        };
        let (_mtx, mrx) = watch::channel(modes);
        spawn_crane_loop(SchedulerCtx {
            wms: wms.clone(),
            crane: crane.clone(),
            arm,
            conveyor,
            estop: erx,
            modes: mrx,
            lift_outbound: Arc::new(AtomicBool::new(false)),
        });

        let mut wire = crane.command_reader();
        wms.queue_push(JobKind::Retrieve, 10).await;

        let cmd = timeout(Duration::from_secs(3), wire.wait_for_change())
            .await
            .expect("the crane never got its command");
        assert_eq!(cmd, Command::RetrieveAt(10));
        // The request stays queued while the job is in flight.
        assert_eq!(wms.queue_front(JobKind::Retrieve).await, Some(10));

        crane.push_status(PeerStatus::PickedUp);
        sleep(Duration::from_millis(100)).await;
        crane.push_status(PeerStatus::DroppedOff);
        sleep(Duration::from_millis(100)).await;

        let snap = wms.snapshot().await;
        assert!(!snap.is_occupied(10));
        assert_eq!(
            snap.location(config::CHAIN_OUT).unwrap().name.as_deref(),
            Some("GearA")
        );
        assert_eq!(wms.queue_front(JobKind::Retrieve).await, None);
        assert!(!crane.busy());
    }

    #[tokio::test]
    async fn stuck_lift_outbound_gate_is_released() {
        // An outbound job was abandoned: the gate is set, but the lift is
        // empty and nothing is moving. The arm loop must release the gate
        // and then serve the waiting takeout.
        let mut inv = Inventory::new(60);
        inv.set_contents(config::FLOOR_FIRST, Some("Wanted".to_string()));
        let wms = spawn_wms(inv, None, None);

        let (_etx, erx) = watch::channel(EstopState::Clear);
        let crane = PeerProxy::spawn(Peer::Crane, erx.clone());
        let arm = PeerProxy::spawn(Peer::Arm, erx.clone());
        let conveyor = PeerProxy::spawn(Peer::Conveyor, erx.clone());
        arm.set_status(PeerStatus::Ready);

        let modes = Modes {
            arm: Mode::Automatic,
            ..Modes::default()
        };
        let (_mtx, mrx) = watch::channel(modes);
        let lift_outbound = Arc::new(AtomicBool::new(true));
        spawn_arm_loop(SchedulerCtx {
            wms: wms.clone(),
            crane,
            arm: arm.clone(),
            conveyor,
            estop: erx,
            modes: mrx,
            lift_outbound: lift_outbound.clone(),
        });

        let mut wire = arm.command_reader();
        wms.queue_push(JobKind::FloorTakeout, config::FLOOR_FIRST).await;

        let cmd = timeout(Duration::from_secs(3), wire.wait_for_change())
            .await
            .expect("the arm never got its command");
        assert_eq!(
            cmd,
            Command::MoveBetween(config::FLOOR_FIRST, config::LIFT_TABLE)
        );
        // The gate was re-armed for the new outbound job.
        assert!(lift_outbound.load(Ordering::SeqCst));
    }
}
