//! # config.rs – Centralized Parameter Store
//!
//! This module holds all static program parameters used throughout the system.
//! Keeping configuration in one place makes tuning, experimentation, and testing easier.

use std::sync::Mutex;
use std::time::Duration;
use once_cell::sync::Lazy;

/// A location identifier. Rack slots are `0..rack_size`, everything outside
/// the racks lives at 100 and up (see the id map below).
pub type LocationId = u16;

//
// ──────────────────────────────────────────────────────────────
//   1. RACK & FLOOR GEOMETRY
// ──────────────────────────────────────────────────────────────
//

/// Amount of racks on 1 side (length)
pub const RACK_ROWS: usize = 5;

/// Amount of levels on 1 side (height)
pub const RACK_LEVELS: usize = 6;

/// Total storage positions in the highbay (two sides)
pub const DEFAULT_RACK_SIZE: usize = RACK_ROWS * RACK_LEVELS * 2;

/// Amount of staging positions on the floor near the transfer arm
pub const FLOOR_CAPACITY: usize = 5;

//
// ──────────────────────────────────────────────────────────────
//   2. LOCATION ID MAP (everything outside the racks)
// ──────────────────────────────────────────────────────────────
//

/// The stacker crane's carrier fork
pub const CRANE_CARRIER: LocationId = 100;

/// Output chain conveyor (crane drop-off side)
pub const CHAIN_OUT: LocationId = 101;

/// Output roller conveyor
pub const ROLL_OUT: LocationId = 102;

/// Middle roller conveyor
pub const ROLL_MID: LocationId = 103;

/// Input roller conveyor
pub const ROLL_IN: LocationId = 104;

/// Input chain conveyor (crane pick-up side)
pub const CHAIN_IN: LocationId = 105;

/// The lift table between the conveyors and the transfer arm
pub const LIFT_TABLE: LocationId = 106;

/// The transfer arm's gripper
pub const ARM_GRIPPER: LocationId = 107;

/// First floor staging position; the others follow contiguously
pub const FLOOR_FIRST: LocationId = 110;

/// All floor staging position ids
pub fn floor_ids() -> impl Iterator<Item = LocationId> {
    FLOOR_FIRST..FLOOR_FIRST + FLOOR_CAPACITY as LocationId
}

//
// ──────────────────────────────────────────────────────────────
//   3. TIMING & PACING
// ──────────────────────────────────────────────────────────────
//

/// Settle time after each mailbox send, so the receiver's poll loop has
/// certainly observed the value before the next send overwrites it
pub const DISPATCH_SETTLE: Duration = Duration::from_millis(300);

/// General polling frequency for the scheduler evaluation loops
pub const POLL_PERIOD: Duration = Duration::from_millis(10);

/// Sleep used when a gate (mode/estop/fault) blocks a loop
pub const GATE_BACKOFF: Duration = Duration::from_millis(50);

/// Pacing for the operator-console channel pump
pub const CONSOLE_POLL: Duration = Duration::from_millis(25);

//
// ──────────────────────────────────────────────────────────────
//   4. NETWORK & PERSISTENCE
// ──────────────────────────────────────────────────────────────
//

/// Port the peer bricks connect to
pub const PEER_PORT: u16 = 34571;

/// Listen address for the peer wire
pub const LISTEN_ADDR: &str = "0.0.0.0";

/// File name of the rack ledger inside the data directory
pub const RACK_LEDGER_FILE: &str = "wms_rack.json";

/// File name of the outside-location ledger inside the data directory
pub const OUTSIDE_LEDGER_FILE: &str = "wms_outside.json";

//
// ──────────────────────────────────────────────────────────────
//   5. LOGGING CONFIGURATION
// ──────────────────────────────────────────────────────────────
//

/// Enable/disable printing of errors
pub static PRINT_ERR_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of warnings
pub static PRINT_WARN_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of success messages
pub static PRINT_OK_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of general info
pub static PRINT_INFO_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable miscellaneous debug prints
pub static PRINT_ELSE_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));
