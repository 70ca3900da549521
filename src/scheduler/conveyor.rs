//! ## Conveyor orchestration
//!
//! A purely local rule walks pallets along the conveyor stages: stage
//! occupied, next stage free, conveyors in Automatic, estop clear -> move.
//! One move is in flight at a time. The only global inputs are the two lift
//! gates: inbound pallets are diverted onto the lift table while the arm
//! accepts them, and an outbound pallet the arm placed on the lift returns
//! to the input chain before anything else runs.

use crate::config::{self, LocationId};
use crate::estop::EstopState;
use crate::network::message::{Command, PeerStatus};
use crate::network::peer::MoveIntent;
use crate::print;
use crate::scheduler::{divert_to_lift, Mode, SchedulerCtx};
use crate::wms::Inventory;
use std::sync::atomic::Ordering;
use tokio::time::sleep;

/// The plain downstream pairs, checked downstream-first so the front pallet
/// advances before the one behind it.
const CHAIN: [(LocationId, LocationId); 4] = [
    (config::ROLL_IN, config::CHAIN_IN),
    (config::ROLL_MID, config::ROLL_IN),
    (config::ROLL_OUT, config::ROLL_MID),
    (config::CHAIN_OUT, config::ROLL_OUT),
];

/// Picks the next single conveyor move, if any.
pub fn next_move(inv: &Inventory, divert: bool, lift_outbound: bool) -> Option<(LocationId, LocationId)> {
    // An outbound pallet on the lift blocks the lift for everyone else;
    // bring it back first.
    if lift_outbound
        && inv.is_occupied(config::LIFT_TABLE)
        && !inv.is_occupied(config::CHAIN_IN)
    {
        return Some((config::LIFT_TABLE, config::CHAIN_IN));
    }

    if divert && inv.is_occupied(config::CHAIN_IN) && !inv.is_occupied(config::LIFT_TABLE) {
        return Some((config::CHAIN_IN, config::LIFT_TABLE));
    }

    CHAIN
        .iter()
        .find(|(a, b)| inv.is_occupied(*a) && !inv.is_occupied(*b))
        .copied()
}

/// Spawns the orchestrator loop.
pub fn spawn_orchestrator(ctx: SchedulerCtx) {
    tokio::spawn(async move {
        // Set while a lift -> input-chain return move is in flight, so the
        // lift-outbound gate is released exactly when the lift is clear.
        let mut return_in_flight = false;
        loop {
            sleep(config::POLL_PERIOD).await;

            if return_in_flight && !ctx.conveyor.busy() {
                ctx.lift_outbound.store(false, Ordering::SeqCst);
                return_in_flight = false;
            }

            if *ctx.estop.borrow() != EstopState::Clear {
                sleep(config::GATE_BACKOFF).await;
                continue;
            }
            let modes = *ctx.modes.borrow();
            if modes.conveyors != Mode::Automatic {
                sleep(config::GATE_BACKOFF).await;
                continue;
            }
            if ctx.conveyor.busy()
                || !matches!(ctx.conveyor.status(), PeerStatus::Ready | PeerStatus::DroppedOff)
            {
                continue;
            }

            let inv = ctx.wms.snapshot().await;
            let lift_outbound = ctx.lift_outbound.load(Ordering::SeqCst);
            let divert = divert_to_lift(&inv, modes, lift_outbound);

            if let Some((from, to)) = next_move(&inv, divert, lift_outbound) {
                if from == config::LIFT_TABLE {
                    return_in_flight = true;
                }
                ctx.conveyor.set_intent(MoveIntent {
                    pickup: None,
                    dropoff: (from, to),
                    job: None,
                });
                print::info(format!("Conveyor move: {} -> {}", from, to));
                ctx.conveyor.enqueue(Command::MoveBetween(from, to));
            }
        }
    });
}
