//! ## Wire vocabulary
//!
//! Typed commands and statuses exchanged with the peer bricks. The old rig
//! spoke format strings with substring matching; here everything is a tagged
//! enum, serialized as one JSON object per line and parsed exactly once at
//! the transport boundary.

use crate::config::LocationId;
use serde::{Deserialize, Serialize};

/// Identity of a subsystem reachable over its own mailbox pair.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Peer {
    /// The rail-bound stacker crane.
    Crane,
    /// The chain/roller conveyor brick, including the lift table.
    Conveyor,
    /// The 6-axis transfer arm.
    Arm,
    /// The operator touchscreen.
    Display,
}

/// A command the coordinator sends to a machine peer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Pick up from the input chain conveyor, store into this rack slot.
    StoreAt(LocationId),
    /// Pick up from this rack slot, drop off on the output chain conveyor.
    RetrieveAt(LocationId),
    /// A pallet is already on the carrier (startup leftover); store it
    /// into this rack slot without a pickup phase.
    StoreCarried(LocationId),
    /// Move a pallet from one location to another (conveyor stages, or the
    /// arm between lift table, gripper and floor).
    MoveBetween(LocationId, LocationId),
    /// Neutral sentinel. Peers ignore it; it exists so a repeated command
    /// registers as a change on the mailbox (see [super::mailbox]).
    Reset,
    /// The operator pushed the emergency stop.
    EmergencyStopPushed,
    /// The emergency stop was reset; peers re-announce their status.
    EmergencyStopReset,
    /// Manual height trim for the crane basket / lift table (-10..=10).
    HeightAdjust(i8),
    /// Manual speed cap in percent (20..=100).
    SpeedAdjust(u8),
}

/// A named mechanical fault reported by a peer.
///
/// Faults carry a human-readable description and, where the rig supports a
/// retry, the command that re-attempts the failed check.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// The crane's telescopic fork did not center during homing.
    HomingForkError,
    /// The crane's homing touch sensor remains pushed.
    CraneSensorStuck,
    /// The crane did not reach its driving position correctly.
    CranePositioningError,
    /// The input chain conveyor should have held a pallet, but does not.
    InputChainNotFull,
    /// The input chain conveyor should have been empty, but is not.
    InputChainNotEmpty,
    /// The output chain conveyor should have held a pallet, but does not.
    OutputChainNotFull,
    /// The output chain conveyor should have been empty, but is not.
    OutputChainNotEmpty,
}

impl FaultKind {
    /// Human-readable description shown on the display until acknowledged.
    pub fn description(&self) -> &'static str {
        match self {
            FaultKind::HomingForkError => {
                "The fork has not centered correctly, move it near the center position and clear the error"
            }
            FaultKind::CraneSensorStuck => {
                "The homing touch sensor remains pushed, check the basket lifting string or rail end buffer"
            }
            FaultKind::CranePositioningError => {
                "The stacker crane did not reach its driving position correctly"
            }
            FaultKind::InputChainNotFull => {
                "The input chain conveyor should have been full, but it is not"
            }
            FaultKind::InputChainNotEmpty => {
                "The input chain conveyor should have been empty, but it is not"
            }
            FaultKind::OutputChainNotFull => {
                "The output chain conveyor should have been full, but it is not"
            }
            FaultKind::OutputChainNotEmpty => {
                "The output chain conveyor should have been empty, but it is not"
            }
        }
    }

    /// The command that retries the failed check, if the rig supports one.
    /// All current fault kinds are retryable; the Option stays because
    /// display-only conditions had none on the original rig.
    pub fn retry_command(&self) -> Option<Command> {
        Some(Command::Reset)
    }
}

/// Status reported by a machine peer. Only *changes* are observable: the
/// mailbox may overwrite intermediate values, so consumers must tolerate
/// skipped states and only rely on consecutive distinct values arriving in
/// order.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    /// Motors are finding their home positions; commands are unsafe.
    Homing,
    /// Idle and ready for a job.
    Ready,
    /// The pallet of the current job left its source location.
    PickedUp,
    /// The pallet of the current job arrived at its destination.
    DroppedOff,
    /// A named mechanical fault; the subsystem halts until acknowledged.
    Fault(FaultKind),
}

/// First line a connecting peer sends to identify itself.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Hello {
    /// Which subsystem this connection belongs to.
    pub peer: Peer,
}

/// Update pushed to the operator display. Same mailbox/pacing rules as the
/// machine peers, but content is informational only.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum DisplayMsg {
    /// A pallet moved between two locations (names travel separately).
    Transfer {
        /// Source location.
        from: LocationId,
        /// Destination location.
        to: LocationId,
    },
    /// A location's contents changed (None clears it).
    WmsUpdate {
        /// The location.
        loc: LocationId,
        /// New contents, None for the empty sentinel.
        name: Option<String>,
    },
    /// A fault entered or left the fault log.
    Fault {
        /// Fault-log id, used for acknowledgement.
        id: u32,
        /// The named fault.
        kind: FaultKind,
        /// true when raised, false when acknowledged away.
        active: bool,
    },
    /// The emergency-stop state changed.
    Estop(bool),
}
