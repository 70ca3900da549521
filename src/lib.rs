#![warn(missing_docs)]
//! # This projects library
//!
//! This library runs the master node of the highbay warehouse: it keeps the
//! inventory (WMS) consistent across all machine peers, schedules crane and
//! transfer-arm jobs, walks pallets over the conveyor chain and handles the
//! emergency-stop state, all over lossy single-slot mailbox links.
//!
//! ## Overview
//! - **Config**: Handles configuration settings.
//! - **Print**: Colored terminal logging and the inventory table.
//! - **Init**: System initialization and ledger loading.
//! - **Network**: Mailbox transport, peer proxies and the TCP wire.
//! - **Wms**: The inventory store, job queues and persistence.
//! - **Scheduler**: Crane/arm dispatch policy and the conveyor orchestrator.
//! - **Estop**: Emergency-stop coordination.
//! - **Operator**: Operator requests, fault log and the console.

/// Global variables
pub mod config;

/// Print functions with color coding
pub mod print;

/// Initialize functions
pub mod init;

/// Mailbox transport and peer communication.
pub mod network {
    /// Single-slot overwrite mailbox with documented loss semantics.
    pub mod mailbox;
    /// Typed command/status vocabulary shared with the peers.
    pub mod message;
    /// Peer proxies and the outbound dispatch queues.
    pub mod peer;
    /// TCP wire: peers connect here and speak line-delimited JSON.
    pub mod tcp_link;
}

/// The warehouse management system: inventory, job queues, persistence.
pub mod wms;

/// Inbound reconciliation: peer status changes applied to the WMS.
pub mod reconcile;

/// Emergency-stop coordination.
pub mod estop;

/// Dispatch policy for the crane and the transfer arm.
pub mod scheduler;

/// Operator requests, the fault log and the stdin console.
pub mod operator;
