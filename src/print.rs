//! ## Printing Module
//!
//! This module is only here to make logging in the terminal easier to read.
//! It allows to print in appropriate colors depending on the situation.
//! It also provides a nice print-format for the inventory overview.

use crate::config;
use crate::wms::{Inventory, Location};
use ansi_term::Colour::{self, Blue, Green, Red, Yellow};
use prettytable::{row, Table};

/// Prints a message in a specified color to the terminal.
///
/// If `PRINT_ELSE_ON` is `false`, the message will not be printed.
///
/// ## Parameters
/// - `msg`: The message to print.
/// - `color`: The color to use for the text output.
pub fn color(msg: String, color: Colour) {
    let print_stat = *config::PRINT_ELSE_ON.lock().unwrap();

    if print_stat {
        println!("{}{}\n", color.paint("[CUSTOM]:  "), color.paint(msg));
    }
}

/// Prints an error message in red to the terminal.
///
/// If `PRINT_ERR_ON` is `false`, the message will not be printed.
///
/// ## Terminal output
/// - "\[ERROR\]:   {}", msg
pub fn err(msg: String) {
    let print_stat = *config::PRINT_ERR_ON.lock().unwrap();

    if print_stat {
        println!("{}{}\n", Red.paint("[ERROR]:   "), Red.paint(msg));
    }
}

/// Prints a warning message in yellow to the terminal.
///
/// If `PRINT_WARN_ON` is `false`, the message will not be printed.
///
/// ## Terminal output
/// - "\[WARNING\]: {}", msg
pub fn warn(msg: String) {
    let print_stat = *config::PRINT_WARN_ON.lock().unwrap();

    if print_stat {
        println!("{}{}\n", Yellow.paint("[WARNING]: "), Yellow.paint(msg));
    }
}

/// Prints a success message in green to the terminal.
///
/// If `PRINT_OK_ON` is `false`, the message will not be printed.
///
/// ## Terminal output
/// - "\[OK\]:      {}", msg
pub fn ok(msg: String) {
    let print_stat = *config::PRINT_OK_ON.lock().unwrap();

    if print_stat {
        println!("{}{}\n", Green.paint("[OK]:      "), Green.paint(msg));
    }
}

/// Prints an info message in blue to the terminal.
///
/// If `PRINT_INFO_ON` is `false`, the message will not be printed.
///
/// ## Terminal output
/// - "\[INFO\]:    {}", msg
pub fn info(msg: String) {
    let print_stat = *config::PRINT_INFO_ON.lock().unwrap();

    if print_stat {
        println!("{}{}\n", Blue.paint("[INFO]:    "), Blue.paint(msg));
    }
}

/// Prints an unrecoverable-weirdness message. Used when an inbound value is
/// outside the declared vocabulary; the coordinator logs it and carries on.
pub fn cosmic_err(msg: String) {
    println!(
        "{}{}\n",
        Red.bold().paint("[COSMIC]:  "),
        Red.bold().paint(msg)
    );
}

fn occupancy_cell(loc: &Location) -> String {
    match (&loc.name, loc.occupied) {
        (Some(name), _) => name.clone(),
        (None, true) => "?".to_string(),
        (None, false) => "-".to_string(),
    }
}

/// Prints the current inventory as two tables: the rack (rows x levels grid
/// of slot contents) and the outside locations with their pending marks.
pub fn inventory(inv: &Inventory) {
    let mut rack = Table::new();
    let levels = config::RACK_LEVELS;
    for level in (0..levels).rev() {
        let mut cells: Vec<String> = Vec::new();
        for slot in (0..inv.rack_size()).skip(level).step_by(levels) {
            if let Some(loc) = inv.location(slot as config::LocationId) {
                cells.push(occupancy_cell(loc));
            }
        }
        rack.add_row(cells.into());
    }
    rack.printstd();

    let mut outside = Table::new();
    outside.add_row(row!["id", "kind", "contents", "pending"]);
    for loc in inv.outside_locations() {
        outside.add_row(row![
            loc.id,
            format!("{:?}", loc.kind),
            occupancy_cell(loc),
            format!("{:?}", loc.pending)
        ]);
    }
    outside.printstd();
}
