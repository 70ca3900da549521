use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use warehousepro::estop::Estop;
use warehousepro::network::message::Peer;
use warehousepro::network::peer::PeerProxy;
use warehousepro::network::tcp_link::{self, LinkCtx};
use warehousepro::operator::{self, OperatorCtx};
use warehousepro::reconcile::spawn_reconcile;
use warehousepro::scheduler::{self, conveyor, Modes, SchedulerCtx};
use warehousepro::wms::spawn_wms;
use warehousepro::{init, print};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = init::parse_args();
    print::info("Starting the warehouse coordinator...".to_string());

    /* START ----------- Inventory and the WMS actor ---------------------- */
    let inv = init::load_inventory(&settings)?;

    let (display_tx, display_rx) = mpsc::unbounded_channel();
    let wms = spawn_wms(
        inv.clone(),
        Some(settings.data_dir.clone()),
        Some(display_tx.clone()),
    );
    // Let a freshly connected touchscreen start from the loaded state
    init::announce_inventory(&inv, &display_tx);
    /* SLUTT ----------- Inventory and the WMS actor ---------------------- */

    /* START ----------- Peer proxies and their drain tasks ---------------------- */
    // The system boots with the emergency stop engaged; the operator's first
    // reset doubles as the "all peers homed" confirmation.
    let estop = Estop::new(Some(display_tx.clone()));

    let crane = PeerProxy::spawn(Peer::Crane, estop.subscribe());
    let conveyor_peer = PeerProxy::spawn(Peer::Conveyor, estop.subscribe());
    let arm = PeerProxy::spawn(Peer::Arm, estop.subscribe());
    estop.register(crane.clone());
    estop.register(conveyor_peer.clone());
    estop.register(arm.clone());
    /* SLUTT ----------- Peer proxies and their drain tasks ---------------------- */

    /* START ----------- Inbound reconciliation ---------------------- */
    let (fault_tx, fault_rx) = mpsc::unbounded_channel();
    {
        spawn_reconcile(crane.clone(), wms.clone(), fault_tx.clone());
        spawn_reconcile(conveyor_peer.clone(), wms.clone(), fault_tx.clone());
        spawn_reconcile(arm.clone(), wms.clone(), fault_tx.clone());
    }
    /* SLUTT ----------- Inbound reconciliation ---------------------- */

    /* START ----------- Scheduler and conveyor orchestrator ---------------------- */
    let (modes_tx, modes_rx) = watch::channel(Modes::default());
    let lift_outbound = Arc::new(AtomicBool::new(false));
    {
        let ctx = SchedulerCtx {
            wms: wms.clone(),
            crane: crane.clone(),
            arm: arm.clone(),
            conveyor: conveyor_peer.clone(),
            estop: estop.subscribe(),
            modes: modes_rx,
            lift_outbound,
        };
        scheduler::spawn_crane_loop(ctx.clone());
        scheduler::spawn_arm_loop(ctx.clone());
        conveyor::spawn_orchestrator(ctx);
    }
    /* SLUTT ----------- Scheduler and conveyor orchestrator ---------------------- */

    /* START ----------- Operator task and console ---------------------- */
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    {
        operator::spawn_operator(
            OperatorCtx {
                wms: wms.clone(),
                estop: estop.clone(),
                modes_tx,
                crane: crane.clone(),
                conveyor: conveyor_peer.clone(),
                arm: arm.clone(),
                display_tx,
            },
            req_rx,
            fault_rx,
        );
        operator::spawn_console(req_tx.clone(), crane.clone(), conveyor_peer.clone());
    }
    /* SLUTT ----------- Operator task and console ---------------------- */

    /* START ----------- The peer wire ---------------------- */
    tcp_link::run_listener(LinkCtx {
        crane,
        conveyor: conveyor_peer,
        arm,
        operator_tx: req_tx,
        display_rx: Arc::new(tokio::sync::Mutex::new(Some(display_rx))),
    })
    .await
    /* SLUTT ----------- The peer wire ---------------------- */
}
