//! ## Operator interface
//!
//! One task owns the fault log and serves every operator request, whether it
//! came from the touchscreen peer (JSON over its link) or from the local
//! stdin console. Requests mutate the queues and modes; the task never
//! touches the inventory except through the WMS handle.

use crate::config::{self, LocationId};
use crate::estop::Estop;
use crate::network::message::{Command, DisplayMsg, FaultKind, Peer};
use crate::network::peer::PeerProxy;
use crate::print;
use crate::scheduler::{Mode, Modes, Subsystem};
use crate::wms::{JobKind, PendingMark, WmsHandle};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

/// A request from the operator, from the touchscreen or the console.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum OperatorRequest {
    /// Change one subsystem's operating mode.
    SetMode {
        /// The subsystem.
        subsystem: Subsystem,
        /// The new mode.
        mode: Mode,
    },
    /// Retrieve the pallet at a rack slot (or take out a floor pallet).
    RequestPickup(LocationId),
    /// Store the next inbound pallet into this rack slot.
    RequestDropoff(LocationId),
    /// Withdraw any queued request for this location.
    Cancel(LocationId),
    /// Take out whichever floor pallet has been sitting the longest.
    RequestOldestFloorPickup,
    /// Register a pallet the coordinator did not know about.
    AddToWms {
        /// The location.
        loc: LocationId,
        /// The pallet's name.
        name: String,
    },
    /// Unregister a pallet (physically removed by hand).
    RemoveFromWms(LocationId),
    /// Clear a fault-log entry, optionally retrying the failed check.
    AcknowledgeFault {
        /// The fault-log id.
        id: u32,
        /// Whether to send the retry command to the faulted peer.
        retry: bool,
    },
    /// Trip the emergency stop.
    PushEmergencyStop,
    /// Request an emergency-stop reset.
    ResetEmergencyStop,
    /// Print the inventory tables to the terminal.
    ShowInventory,
}

/// One entry in the fault log. Stays visible until acknowledged, even if
/// the underlying condition resolves itself.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultEntry {
    /// Log id, used for acknowledgement.
    pub id: u32,
    /// Which peer reported it.
    pub peer: Peer,
    /// The named fault.
    pub kind: FaultKind,
}

/// Everything the operator task needs.
pub struct OperatorCtx {
    /// Inventory and queues.
    pub wms: WmsHandle,
    /// Emergency-stop coordinator.
    pub estop: Estop,
    /// Mode store; the scheduler loops watch the receiver side.
    pub modes_tx: watch::Sender<Modes>,
    /// Crane proxy, for fault retries and manual adjustments.
    pub crane: PeerProxy,
    /// Conveyor proxy, for fault retries and manual adjustments.
    pub conveyor: PeerProxy,
    /// Arm proxy, for fault retries.
    pub arm: PeerProxy,
    /// Outbound display updates.
    pub display_tx: mpsc::UnboundedSender<DisplayMsg>,
}

/// Spawns the operator task, serving requests and collecting fault edges.
pub fn spawn_operator(
    ctx: OperatorCtx,
    mut req_rx: mpsc::UnboundedReceiver<OperatorRequest>,
    mut fault_rx: mpsc::UnboundedReceiver<(Peer, FaultKind)>,
) {
    tokio::spawn(async move {
        let mut faults: Vec<FaultEntry> = Vec::new();
        let mut next_fault_id: u32 = 1;
        loop {
            tokio::select! {
                req = req_rx.recv() => {
                    let Some(req) = req else { return };
                    handle_request(&ctx, &mut faults, req).await;
                }
                fault = fault_rx.recv() => {
                    let Some((peer, kind)) = fault else { return };
                    let id = next_fault_id;
                    next_fault_id += 1;
                    faults.push(FaultEntry { id, peer, kind });
                    print::err(format!(
                        "Fault #{} on {:?}: {}",
                        id, peer, kind.description()
                    ));
                    let _ = ctx.display_tx.send(DisplayMsg::Fault { id, kind, active: true });
                }
            }
        }
    });
}

fn peer_proxy<'a>(ctx: &'a OperatorCtx, peer: Peer) -> Option<&'a PeerProxy> {
    match peer {
        Peer::Crane => Some(&ctx.crane),
        Peer::Conveyor => Some(&ctx.conveyor),
        Peer::Arm => Some(&ctx.arm),
        Peer::Display => None,
    }
}

async fn handle_request(ctx: &OperatorCtx, faults: &mut Vec<FaultEntry>, req: OperatorRequest) {
    match req {
        OperatorRequest::SetMode { subsystem, mode } => {
            if subsystem == Subsystem::Arm && mode == Mode::Manual {
                print::warn("The arm has no manual mode".to_string());
                return;
            }
            ctx.modes_tx.send_modify(|m| m.set(subsystem, mode));
            print::ok(format!("{:?} mode set to {:?}", subsystem, mode));
        }
        OperatorRequest::RequestPickup(loc) => {
            if config::floor_ids().any(|id| id == loc) {
                if ctx.wms.queue_push(JobKind::FloorTakeout, loc).await {
                    ctx.wms.set_pending(loc, PendingMark::PickupRequested).await;
                }
            } else if ctx.wms.queue_push(JobKind::Retrieve, loc).await {
                ctx.wms.set_pending(loc, PendingMark::PickupRequested).await;
            }
        }
        OperatorRequest::RequestDropoff(loc) => {
            if ctx.wms.queue_push(JobKind::Store, loc).await {
                ctx.wms.set_pending(loc, PendingMark::DropoffRequested).await;
            }
        }
        OperatorRequest::Cancel(loc) => {
            ctx.wms.queue_cancel(JobKind::Store, loc).await;
            ctx.wms.queue_cancel(JobKind::Retrieve, loc).await;
            ctx.wms.queue_cancel(JobKind::FloorTakeout, loc).await;
            ctx.wms.set_pending(loc, PendingMark::None).await;
        }
        OperatorRequest::RequestOldestFloorPickup => {
            match ctx.wms.oldest_floor_pallet().await {
                Some(loc) => {
                    ctx.wms.queue_push(JobKind::FloorTakeout, loc).await;
                    print::info(format!("Taking out the oldest floor pallet, at {}", loc));
                }
                None => print::warn("No pallet on the floor".to_string()),
            }
        }
        OperatorRequest::AddToWms { loc, name } => {
            ctx.wms.set_contents(loc, Some(name)).await;
        }
        OperatorRequest::RemoveFromWms(loc) => {
            ctx.wms.set_contents(loc, None).await;
        }
        OperatorRequest::AcknowledgeFault { id, retry } => {
            let Some(pos) = faults.iter().position(|f| f.id == id) else {
                print::warn(format!("No fault #{} in the log", id));
                return;
            };
            let entry = faults.remove(pos);
            let _ = ctx.display_tx.send(DisplayMsg::Fault {
                id: entry.id,
                kind: entry.kind,
                active: false,
            });
            if retry {
                if let (Some(proxy), Some(cmd)) =
                    (peer_proxy(ctx, entry.peer), entry.kind.retry_command())
                {
                    print::info(format!("Retrying after fault #{} on {:?}", id, entry.peer));
                    proxy.priority_send(cmd);
                }
            }
        }
        OperatorRequest::PushEmergencyStop => ctx.estop.trigger(),
        OperatorRequest::ResetEmergencyStop => {
            if !ctx.estop.request_reset() {
                print::warn("Emergency-stop reset refused".to_string());
            }
        }
        OperatorRequest::ShowInventory => {
            let snap = ctx.wms.snapshot().await;
            print::inventory(&snap);
        }
    }
}

/// Parses one console line into a request.
///
/// Syntax: `pickup <loc>` | `dropoff <loc>` | `cancel <loc>` | `oldest` |
/// `add <loc> <name>` | `remove <loc>` | `mode <crane_in|crane_out|conveyors|arm> <off|auto|manual>` |
/// `ack <id> [retry]` | `estop` | `reset` | `inv` |
/// `height <crane|conveyor> <delta>` | `speed <crane|conveyor> <percent>`.
pub fn parse_console(line: &str) -> Option<ConsoleAction> {
    let mut words = line.split_whitespace();
    let verb = words.next()?;
    let req = match verb {
        "pickup" => OperatorRequest::RequestPickup(words.next()?.parse().ok()?),
        "dropoff" => OperatorRequest::RequestDropoff(words.next()?.parse().ok()?),
        "cancel" => OperatorRequest::Cancel(words.next()?.parse().ok()?),
        "oldest" => OperatorRequest::RequestOldestFloorPickup,
        "add" => OperatorRequest::AddToWms {
            loc: words.next()?.parse().ok()?,
            name: words.next()?.to_string(),
        },
        "remove" => OperatorRequest::RemoveFromWms(words.next()?.parse().ok()?),
        "mode" => {
            let subsystem = match words.next()? {
                "crane_in" => Subsystem::CraneInput,
                "crane_out" => Subsystem::CraneOutput,
                "conveyors" => Subsystem::Conveyors,
                "arm" => Subsystem::Arm,
                _ => return None,
            };
            let mode = match words.next()? {
                "off" => Mode::Off,
                "auto" => Mode::Automatic,
                "manual" => Mode::Manual,
                _ => return None,
            };
            OperatorRequest::SetMode { subsystem, mode }
        }
        "ack" => OperatorRequest::AcknowledgeFault {
            id: words.next()?.parse().ok()?,
            retry: words.next() == Some("retry"),
        },
        "estop" => OperatorRequest::PushEmergencyStop,
        "reset" => OperatorRequest::ResetEmergencyStop,
        "inv" => OperatorRequest::ShowInventory,
        "height" | "speed" => {
            let peer = match words.next()? {
                "crane" => Peer::Crane,
                "conveyor" => Peer::Conveyor,
                _ => return None,
            };
            let value = words.next()?;
            let cmd = if verb == "height" {
                Command::HeightAdjust(value.parse().ok()?)
            } else {
                Command::SpeedAdjust(value.parse().ok()?)
            };
            return Some(ConsoleAction::Adjust(peer, cmd));
        }
        _ => return None,
    };
    Some(ConsoleAction::Request(req))
}

/// What one console line asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleAction {
    /// A regular operator request.
    Request(OperatorRequest),
    /// A manual adjustment passed straight to one peer's dispatch queue.
    Adjust(Peer, Command),
}

/// Spawns the stdin console: a blocking reader thread bridged over a
/// crossbeam channel into an async pump, so the runtime never blocks on
/// stdin.
pub fn spawn_console(
    req_tx: mpsc::UnboundedSender<OperatorRequest>,
    crane: PeerProxy,
    conveyor: PeerProxy,
) {
    let (line_tx, line_rx) = crossbeam_channel::unbounded::<String>();
    std::thread::Builder::new()
        .name("console_reader".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if line_tx.send(line).is_err() {
                            return;
                        }
                    }
                    Err(_) => return,
                }
            }
        })
        .ok();

    tokio::spawn(async move {
        loop {
            sleep(config::CONSOLE_POLL).await;
            while let Ok(line) = line_rx.try_recv() {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_console(&line) {
                    Some(ConsoleAction::Request(req)) => {
                        let _ = req_tx.send(req);
                    }
                    Some(ConsoleAction::Adjust(peer, cmd)) => match peer {
                        Peer::Crane => crane.enqueue(cmd),
                        Peer::Conveyor => conveyor.enqueue(cmd),
                        _ => {}
                    },
                    None => print::warn(format!("Unknown console command: {}", line)),
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estop::EstopState;
    use crate::wms::{spawn_wms, Inventory};

    #[test]
    fn console_lines_parse_into_requests() {
        assert_eq!(
            parse_console("pickup 10"),
            Some(ConsoleAction::Request(OperatorRequest::RequestPickup(10)))
        );
        assert_eq!(
            parse_console("add 5 GearA"),
            Some(ConsoleAction::Request(OperatorRequest::AddToWms {
                loc: 5,
                name: "GearA".to_string()
            }))
        );
        assert_eq!(
            parse_console("mode crane_out auto"),
            Some(ConsoleAction::Request(OperatorRequest::SetMode {
                subsystem: Subsystem::CraneOutput,
                mode: Mode::Automatic
            }))
        );
        assert_eq!(
            parse_console("ack 3 retry"),
            Some(ConsoleAction::Request(OperatorRequest::AcknowledgeFault {
                id: 3,
                retry: true
            }))
        );
        assert_eq!(
            parse_console("height crane -4"),
            Some(ConsoleAction::Adjust(Peer::Crane, Command::HeightAdjust(-4)))
        );
        assert_eq!(parse_console("frobnicate"), None);
        assert_eq!(parse_console("pickup many"), None);
    }

    fn rig() -> (mpsc::UnboundedSender<OperatorRequest>,
                 mpsc::UnboundedSender<(Peer, FaultKind)>,
                 mpsc::UnboundedReceiver<DisplayMsg>, WmsHandle, Estop) {
        let wms = spawn_wms(Inventory::new(60), None, None);
        let estop = Estop::new(None);
        let crane = PeerProxy::spawn(Peer::Crane, estop.subscribe());
        let conveyor = PeerProxy::spawn(Peer::Conveyor, estop.subscribe());
        let arm = PeerProxy::spawn(Peer::Arm, estop.subscribe());
        estop.register(crane.clone());
        estop.register(conveyor.clone());
        estop.register(arm.clone());
        let (modes_tx, _) = watch::channel(Modes::default());
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let (display_tx, display_rx) = mpsc::unbounded_channel();
        let ctx = OperatorCtx {
            wms: wms.clone(),
            estop: estop.clone(),
            modes_tx,
            crane,
            conveyor,
            arm,
            display_tx,
        };
        spawn_operator(ctx, req_rx, fault_rx);
        (req_tx, fault_tx, display_rx, wms, estop)
    }

    #[tokio::test]
    async fn pickup_requests_land_in_the_retrieve_queue() {
        let (req_tx, _ftx, _drx, wms, _estop) = rig();

        req_tx.send(OperatorRequest::RequestPickup(10)).unwrap();
        req_tx.send(OperatorRequest::RequestPickup(10)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert_eq!(wms.queue_front(JobKind::Retrieve).await, Some(10));
        let snap = wms.snapshot().await;
        assert_eq!(snap.location(10).unwrap().pending, PendingMark::PickupRequested);

        req_tx.send(OperatorRequest::Cancel(10)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(wms.queue_front(JobKind::Retrieve).await, None);
    }

    #[tokio::test]
    async fn faults_are_logged_until_acknowledged() {
        let (req_tx, fault_tx, mut display_rx, _wms, _estop) = rig();

        fault_tx.send((Peer::Crane, FaultKind::CraneSensorStuck)).unwrap();
        assert_eq!(
            display_rx.recv().await,
            Some(DisplayMsg::Fault {
                id: 1,
                kind: FaultKind::CraneSensorStuck,
                active: true
            })
        );

        req_tx
            .send(OperatorRequest::AcknowledgeFault { id: 1, retry: false })
            .unwrap();
        assert_eq!(
            display_rx.recv().await,
            Some(DisplayMsg::Fault {
                id: 1,
                kind: FaultKind::CraneSensorStuck,
                active: false
            })
        );
    }

    #[tokio::test]
    async fn estop_requests_reach_the_coordinator() {
        let (req_tx, _ftx, _drx, _wms, estop) = rig();
        // Starts Triggered; a reset with every peer still Homing is refused.
        req_tx.send(OperatorRequest::ResetEmergencyStop).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(estop.state(), EstopState::Triggered);
    }
}
