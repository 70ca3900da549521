//! ## Initialize Module
//!
//! Command-line parsing and the startup sequence: loading the ledgers into
//! the inventory and announcing the loaded state to the display peer.

use crate::config;
use crate::network::message::DisplayMsg;
use crate::print;
use crate::wms::{ledger, Inventory};
use anyhow::Context;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Startup settings, from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Directory holding the ledger files.
    pub data_dir: PathBuf,
    /// Number of rack slots.
    pub rack_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_dir: PathBuf::from("data"),
            rack_size: config::DEFAULT_RACK_SIZE,
        }
    }
}

/// Parses the process arguments.
///
/// Supported: `--dir <path>` (ledger directory), `--rack-size <n>`,
/// `--quiet` (suppress info-level prints). Unknown arguments are warned
/// about and skipped.
pub fn parse_args() -> Settings {
    settings_from(std::env::args().skip(1))
}

fn settings_from(mut args: impl Iterator<Item = String>) -> Settings {
    let mut settings = Settings::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dir" => {
                if let Some(path) = args.next() {
                    settings.data_dir = PathBuf::from(path);
                } else {
                    print::warn("--dir needs a path".to_string());
                }
            }
            "--rack-size" => {
                // Rack slots are ids 0..rack_size; everything from the
                // carrier up is a fixed location id and must stay out of
                // the rack's range.
                match args.next().and_then(|n| n.parse().ok()) {
                    Some(n) if n < config::CRANE_CARRIER as usize => settings.rack_size = n,
                    Some(n) => print::warn(format!(
                        "--rack-size {} collides with the fixed location ids (max {}), keeping {}",
                        n,
                        config::CRANE_CARRIER - 1,
                        settings.rack_size
                    )),
                    None => print::warn("--rack-size needs a number".to_string()),
                }
            }
            "--quiet" => {
                if let Ok(mut on) = config::PRINT_INFO_ON.lock() {
                    *on = false;
                }
                if let Ok(mut on) = config::PRINT_ELSE_ON.lock() {
                    *on = false;
                }
            }
            other => print::warn(format!("Unknown argument: {}", other)),
        }
    }
    settings
}

/// Creates the data directory if needed and loads the inventory from the
/// ledgers.
pub fn load_inventory(settings: &Settings) -> anyhow::Result<Inventory> {
    std::fs::create_dir_all(&settings.data_dir)
        .with_context(|| format!("creating the data directory {:?}", settings.data_dir))?;
    let inv = ledger::load(&settings.data_dir, settings.rack_size)?;
    print::ok(format!(
        "Loaded {} occupied rack slots from {:?}",
        inv.occupied_rack_slots().len(),
        settings.data_dir
    ));
    Ok(inv)
}

/// Pushes every occupied location to the display peer, so a freshly
/// connected touchscreen starts from the loaded state instead of an empty
/// one.
pub fn announce_inventory(inv: &Inventory, display_tx: &mpsc::UnboundedSender<DisplayMsg>) {
    let rack_ids = (0..inv.rack_size()).map(|i| i as config::LocationId);
    let outside_ids: Vec<_> = inv.outside_locations().map(|l| l.id).collect();
    for id in rack_ids.chain(outside_ids) {
        if let Some(loc) = inv.location(id) {
            if loc.occupied {
                let _ = display_tx.send(DisplayMsg::WmsUpdate {
                    loc: id,
                    name: loc.name.clone(),
                });
            }
        }
    }
}
