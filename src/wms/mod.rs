//! ## Warehouse Management System
//!
//! The authoritative map from location id to occupancy and contents, plus the
//! three job queues. Everything in here is plain data and pure mutation
//! logic; concurrency and persistence live in [actor] and [ledger]. Only the
//! actor task ever mutates an [Inventory] at runtime, every other component
//! issues requests through a [WmsHandle].

use crate::config::{self, LocationId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub mod actor;
pub mod ledger;

pub use actor::{spawn_wms, WmsHandle};

/// What kind of physical place a location is.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    /// A slot in the highbay rack.
    RackSlot,
    /// A conveyor stage (chains, rolls, lift table).
    ConveyorStage,
    /// A staging position on the floor near the transfer arm.
    FloorStage,
    /// A gripper that can hold exactly one pallet mid-move.
    GripperSlot,
}

/// Pending operator mark on a location.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingMark {
    /// Nothing requested.
    None,
    /// An operator asked for this pallet to be retrieved.
    PickupRequested,
    /// An operator asked for a pallet to be stored here.
    DropoffRequested,
    /// Reserved by an in-flight job, not eligible for new requests.
    Locked,
}

/// One physical place a pallet can be.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Location {
    /// The location id (see the id map in [crate::config]).
    pub id: LocationId,
    /// What kind of place this is.
    pub kind: LocationKind,
    /// Whether a pallet is physically here.
    pub occupied: bool,
    /// The pallet's name, if known. `None` with `occupied` means an
    /// unregistered pallet (possible after manual interference).
    pub name: Option<String>,
    /// Pending operator mark.
    pub pending: PendingMark,
    /// Floor stages only: seconds since coordinator start when the pallet
    /// was dropped here. Used for oldest-pallet priority pickup.
    pub dropped_at: Option<u64>,
}

impl Location {
    fn empty(id: LocationId, kind: LocationKind) -> Self {
        Location {
            id,
            kind,
            occupied: false,
            name: None,
            pending: PendingMark::None,
            dropped_at: None,
        }
    }
}

/// Why a transfer was refused. The scheduler treats any refusal as a stale
/// assumption and silently re-evaluates, so this mostly feeds log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    /// The source location does not exist or is empty.
    SourceEmpty,
    /// The destination location does not exist or already holds a pallet.
    DestinationFull,
}

/// The full location map: rack slots `0..rack_size` plus the fixed set of
/// outside locations (conveyor stages, lift table, floor, grippers).
#[derive(Debug, Clone, PartialEq)]
pub struct Inventory {
    rack: Vec<Location>,
    outside: Vec<Location>,
}

impl Inventory {
    /// Creates an empty inventory with `rack_size` rack slots and the
    /// standard outside-location map.
    pub fn new(rack_size: usize) -> Self {
        let rack = (0..rack_size)
            .map(|i| Location::empty(i as LocationId, LocationKind::RackSlot))
            .collect();

        let mut outside = vec![
            Location::empty(config::CRANE_CARRIER, LocationKind::GripperSlot),
            Location::empty(config::CHAIN_OUT, LocationKind::ConveyorStage),
            Location::empty(config::ROLL_OUT, LocationKind::ConveyorStage),
            Location::empty(config::ROLL_MID, LocationKind::ConveyorStage),
            Location::empty(config::ROLL_IN, LocationKind::ConveyorStage),
            Location::empty(config::CHAIN_IN, LocationKind::ConveyorStage),
            Location::empty(config::LIFT_TABLE, LocationKind::ConveyorStage),
            Location::empty(config::ARM_GRIPPER, LocationKind::GripperSlot),
        ];
        for id in config::floor_ids() {
            outside.push(Location::empty(id, LocationKind::FloorStage));
        }

        Inventory { rack, outside }
    }

    /// Number of rack slots.
    pub fn rack_size(&self) -> usize {
        self.rack.len()
    }

    /// Looks up a location by id.
    pub fn location(&self, id: LocationId) -> Option<&Location> {
        if (id as usize) < self.rack.len() {
            self.rack.get(id as usize)
        } else {
            self.outside.iter().find(|l| l.id == id)
        }
    }

    fn location_mut(&mut self, id: LocationId) -> Option<&mut Location> {
        if (id as usize) < self.rack.len() {
            self.rack.get_mut(id as usize)
        } else {
            self.outside.iter_mut().find(|l| l.id == id)
        }
    }

    /// All locations outside the rack, in id order.
    pub fn outside_locations(&self) -> impl Iterator<Item = &Location> {
        self.outside.iter()
    }

    /// Whether the location exists and holds a pallet.
    pub fn is_occupied(&self, id: LocationId) -> bool {
        self.location(id).map(|l| l.occupied).unwrap_or(false)
    }

    /// Ids of all occupied rack slots.
    pub fn occupied_rack_slots(&self) -> Vec<LocationId> {
        self.rack
            .iter()
            .filter(|l| l.occupied)
            .map(|l| l.id)
            .collect()
    }

    /// Ids of all empty rack slots.
    pub fn empty_rack_slots(&self) -> Vec<LocationId> {
        self.rack
            .iter()
            .filter(|l| !l.occupied)
            .map(|l| l.id)
            .collect()
    }

    /// The occupied floor stage whose pallet has been sitting the longest.
    pub fn oldest_floor_pallet(&self) -> Option<LocationId> {
        self.outside
            .iter()
            .filter(|l| l.kind == LocationKind::FloorStage && l.occupied)
            .min_by_key(|l| l.dropped_at.unwrap_or(0))
            .map(|l| l.id)
    }

    /// Number of occupied floor stages.
    pub fn floor_occupancy(&self) -> usize {
        self.outside
            .iter()
            .filter(|l| l.kind == LocationKind::FloorStage && l.occupied)
            .count()
    }

    /// Overwrites a location's contents directly (operator corrections and
    /// ledger loading). Setting a name marks the location occupied; clearing
    /// with `None` empties it.
    pub fn set_contents(&mut self, id: LocationId, name: Option<String>) -> bool {
        match self.location_mut(id) {
            Some(loc) => {
                loc.occupied = name.is_some();
                loc.name = name;
                if !loc.occupied {
                    loc.dropped_at = None;
                }
                true
            }
            None => false,
        }
    }

    /// Restores a location from a ledger record, allowing the
    /// occupied-but-unnamed state that `set_contents` cannot express.
    pub(crate) fn restore(&mut self, id: LocationId, occupied: bool, name: Option<String>) {
        if let Some(loc) = self.location_mut(id) {
            loc.occupied = occupied;
            loc.name = if occupied { name } else { None };
        }
    }

    /// Sets the pending mark on a location.
    pub fn set_pending(&mut self, id: LocationId, mark: PendingMark) -> bool {
        match self.location_mut(id) {
            Some(loc) => {
                loc.pending = mark;
                true
            }
            None => false,
        }
    }

    /// Moves a pallet from `from` to `to` as a strict hand-off: the source
    /// is cleared before the destination is set, so a concurrent reader can
    /// observe the pallet in transit but never in two places.
    ///
    /// `now_secs` stamps `dropped_at` when the destination is a floor stage.
    pub fn transfer(
        &mut self,
        from: LocationId,
        to: LocationId,
        now_secs: u64,
    ) -> Result<(), TransferError> {
        let name = match self.location(from) {
            Some(l) if l.occupied => l.name.clone(),
            _ => return Err(TransferError::SourceEmpty),
        };
        match self.location(to) {
            Some(l) if !l.occupied => {}
            _ => return Err(TransferError::DestinationFull),
        }

        // Infallible from here: both ends were just checked.
        if let Some(src) = self.location_mut(from) {
            src.occupied = false;
            src.name = None;
            src.pending = PendingMark::None;
            src.dropped_at = None;
        }
        if let Some(dst) = self.location_mut(to) {
            dst.occupied = true;
            dst.name = name;
            dst.pending = PendingMark::None;
            if dst.kind == LocationKind::FloorStage {
                dst.dropped_at = Some(now_secs);
            }
        }
        Ok(())
    }
}

/// Which job queue an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Store a pallet from the input chain into a rack slot.
    Store,
    /// Retrieve a pallet from a rack slot onto the output chain.
    Retrieve,
    /// Take a pallet out from a floor stage back onto the lift table.
    FloorTakeout,
}

/// An ordered queue of locations awaiting service. Entries are unique;
/// add and cancel are idempotent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobQueue {
    entries: VecDeque<LocationId>,
}

impl JobQueue {
    /// Appends `loc` unless it is already queued. Returns whether the queue
    /// changed.
    pub fn push(&mut self, loc: LocationId) -> bool {
        if self.entries.contains(&loc) {
            return false;
        }
        self.entries.push_back(loc);
        true
    }

    /// Removes `loc` wherever it sits. Returns whether it was present.
    pub fn cancel(&mut self, loc: LocationId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| *e != loc);
        before != self.entries.len()
    }

    /// The oldest entry, without removing it.
    pub fn front(&self) -> Option<LocationId> {
        self.entries.front().copied()
    }

    /// Removes and returns the oldest entry.
    pub fn pop(&mut self) -> Option<LocationId> {
        self.entries.pop_front()
    }

    /// Whether `loc` is queued.
    pub fn contains(&self, loc: LocationId) -> bool {
        self.entries.contains(&loc)
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    #[test]
    fn transfer_is_a_strict_handoff() {
        let mut inv = Inventory::new(60);
        inv.set_contents(10, Some("GearA".to_string()));

        inv.transfer(10, config::CHAIN_OUT, 0).unwrap();

        assert!(!inv.is_occupied(10));
        assert_eq!(inv.location(10).unwrap().name, None);
        let out = inv.location(config::CHAIN_OUT).unwrap();
        assert!(out.occupied);
        assert_eq!(out.name.as_deref(), Some("GearA"));

        // The pallet exists exactly once.
        let copies = (0..60)
            .chain(inv.outside_locations().map(|l| l.id))
            .filter(|id| inv.location(*id).and_then(|l| l.name.as_deref()) == Some("GearA"))
            .count();
        assert_eq!(copies, 1);
    }

    #[test]
    fn transfer_refuses_empty_source_and_full_destination() {
        let mut inv = Inventory::new(60);
        assert_eq!(inv.transfer(5, config::CHAIN_OUT, 0), Err(TransferError::SourceEmpty));

        inv.set_contents(5, Some("A".to_string()));
        inv.set_contents(config::CHAIN_OUT, Some("B".to_string()));
        assert_eq!(
            inv.transfer(5, config::CHAIN_OUT, 0),
            Err(TransferError::DestinationFull)
        );
        // Refusal must not have touched either end.
        assert!(inv.is_occupied(5));
        assert_eq!(inv.location(config::CHAIN_OUT).unwrap().name.as_deref(), Some("B"));
    }

    #[test]
    fn transfer_to_floor_stamps_dropped_at() {
        let mut inv = Inventory::new(60);
        inv.set_contents(config::ARM_GRIPPER, Some("Box".to_string()));
        inv.transfer(config::ARM_GRIPPER, config::FLOOR_FIRST, 42).unwrap();
        assert_eq!(inv.location(config::FLOOR_FIRST).unwrap().dropped_at, Some(42));
    }

    #[test]
    fn oldest_floor_pallet_prefers_earliest_drop() {
        let mut inv = Inventory::new(60);
        inv.set_contents(config::ARM_GRIPPER, Some("First".to_string()));
        inv.transfer(config::ARM_GRIPPER, config::FLOOR_FIRST + 2, 10).unwrap();
        inv.set_contents(config::ARM_GRIPPER, Some("Second".to_string()));
        inv.transfer(config::ARM_GRIPPER, config::FLOOR_FIRST, 20).unwrap();

        assert_eq!(inv.oldest_floor_pallet(), Some(config::FLOOR_FIRST + 2));
    }

    #[test]
    fn queue_entries_are_unique() {
        let mut q = JobQueue::default();
        assert!(q.push(10));
        assert!(!q.push(10));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn double_request_then_cancel_leaves_entry_absent() {
        let mut q = JobQueue::default();
        q.push(10);
        q.push(10);
        assert!(q.cancel(10));
        assert!(!q.contains(10));
        assert!(!q.cancel(10));
        assert!(q.is_empty());
    }

    #[test]
    fn queue_preserves_submission_order() {
        let mut q = JobQueue::default();
        q.push(3);
        q.push(7);
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), Some(7));
        assert_eq!(q.pop(), None);
    }
}
