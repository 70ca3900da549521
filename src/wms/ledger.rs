//! ## Durable ledgers
//!
//! The inventory survives a restart through two JSON files in the data
//! directory: one for the rack slots, one for the outside locations. Both
//! are keyed by location id (never by row order) and rewritten in full on
//! every mutation. On load the rack map is padded or truncated to the
//! configured rack size, so resizing the rack between runs is safe.

use crate::config::{self, LocationId};
use crate::print;
use crate::wms::Inventory;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// One persisted location.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LedgerRecord {
    /// Whether a pallet is here.
    pub occupied: bool,
    /// The pallet's name if registered.
    pub name: Option<String>,
}

type LedgerMap = BTreeMap<LocationId, LedgerRecord>;

fn save_map(dir: &Path, file: &str, map: &LedgerMap) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(map)?;
    let path = dir.join(file);
    fs::write(&path, json).with_context(|| format!("writing ledger {:?}", path))?;
    Ok(())
}

fn load_map(dir: &Path, file: &str) -> anyhow::Result<LedgerMap> {
    let path = dir.join(file);
    if !path.exists() {
        return Ok(LedgerMap::new());
    }
    let json = fs::read_to_string(&path).with_context(|| format!("reading ledger {:?}", path))?;
    let map = serde_json::from_str(&json).with_context(|| format!("parsing ledger {:?}", path))?;
    Ok(map)
}

/// Writes both ledgers from the current inventory. The whole store is
/// rewritten on every call (write-through, not append-only).
pub fn save(dir: &Path, inv: &Inventory) -> anyhow::Result<()> {
    let mut rack = LedgerMap::new();
    for id in 0..inv.rack_size() as LocationId {
        if let Some(loc) = inv.location(id) {
            rack.insert(
                id,
                LedgerRecord {
                    occupied: loc.occupied,
                    name: loc.name.clone(),
                },
            );
        }
    }
    save_map(dir, config::RACK_LEDGER_FILE, &rack)?;

    let mut outside = LedgerMap::new();
    for loc in inv.outside_locations() {
        outside.insert(
            loc.id,
            LedgerRecord {
                occupied: loc.occupied,
                name: loc.name.clone(),
            },
        );
    }
    save_map(dir, config::OUTSIDE_LEDGER_FILE, &outside)?;
    Ok(())
}

/// Builds an inventory of `rack_size` slots from the ledgers in `dir`.
///
/// Missing files yield an empty store. Rack records beyond the configured
/// size are dropped with a warning; missing ids stay empty. The arm gripper
/// record is ignored: a pallet cannot survive the arm's homing sweep, so a
/// persisted gripper entry is stale by definition.
pub fn load(dir: &Path, rack_size: usize) -> anyhow::Result<Inventory> {
    let mut inv = Inventory::new(rack_size);

    let rack = load_map(dir, config::RACK_LEDGER_FILE)?;
    for (id, rec) in rack {
        if (id as usize) >= rack_size {
            print::warn(format!(
                "Ledger slot {} is outside the configured rack size {}, dropping it",
                id, rack_size
            ));
            continue;
        }
        inv.restore(id, rec.occupied, rec.name);
    }

    let outside = load_map(dir, config::OUTSIDE_LEDGER_FILE)?;
    for (id, rec) in outside {
        if id == config::ARM_GRIPPER {
            continue;
        }
        if inv.location(id).is_none() {
            print::warn(format!("Ledger holds unknown outside location {}, dropping it", id));
            continue;
        }
        inv.restore(id, rec.occupied, rec.name);
    }

    Ok(inv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("wms_ledger_{}_{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn save_then_load_yields_identical_store() {
        let dir = scratch_dir("roundtrip");
        let mut inv = Inventory::new(60);
        inv.set_contents(10, Some("GearA".to_string()));
        inv.set_contents(59, Some("GearB".to_string()));
        inv.set_contents(config::CHAIN_IN, Some("Inbound".to_string()));

        save(&dir, &inv).unwrap();
        let back = load(&dir, 60).unwrap();

        assert_eq!(back.location(10).unwrap().name.as_deref(), Some("GearA"));
        assert_eq!(back.location(59).unwrap().name.as_deref(), Some("GearB"));
        assert_eq!(
            back.location(config::CHAIN_IN).unwrap().name.as_deref(),
            Some("Inbound")
        );
        assert_eq!(back.occupied_rack_slots(), inv.occupied_rack_slots());
    }

    #[test]
    fn load_truncates_to_the_configured_rack_size() {
        let dir = scratch_dir("truncate");
        let mut inv = Inventory::new(60);
        inv.set_contents(45, Some("TooHigh".to_string()));
        save(&dir, &inv).unwrap();

        let back = load(&dir, 30).unwrap();
        assert_eq!(back.rack_size(), 30);
        assert!(back.occupied_rack_slots().is_empty());
    }

    #[test]
    fn load_pads_missing_slots_as_empty() {
        let dir = scratch_dir("pad");
        let inv = Inventory::new(10);
        save(&dir, &inv).unwrap();

        let back = load(&dir, 60).unwrap();
        assert_eq!(back.rack_size(), 60);
        assert!(!back.is_occupied(42));
    }

    #[test]
    fn gripper_record_is_ignored_on_load() {
        let dir = scratch_dir("gripper");
        let mut inv = Inventory::new(10);
        inv.set_contents(config::ARM_GRIPPER, Some("Ghost".to_string()));
        save(&dir, &inv).unwrap();

        let back = load(&dir, 10).unwrap();
        assert!(!back.is_occupied(config::ARM_GRIPPER));
    }

    #[test]
    fn missing_files_yield_an_empty_store() {
        let dir = scratch_dir("fresh");
        let back = load(&dir, 60).unwrap();
        assert!(back.occupied_rack_slots().is_empty());
    }
}
