//! ## The peer wire
//!
//! Every peer brick opens one TCP connection to the coordinator and speaks
//! line-delimited JSON: first a [Hello] naming itself, then statuses inbound
//! and commands outbound. The wire tasks only move bytes; all semantics
//! (loss, pacing, edge detection) live in the mailbox layer they feed.
//!
//! Reconnection is not modeled: a dropped machine-peer connection is logged
//! and its mailboxes simply go quiet, which parks that subsystem until a
//! restart.

use crate::config;
use crate::network::message::{DisplayMsg, Hello, Peer, PeerStatus};
use crate::network::peer::PeerProxy;
use crate::operator::OperatorRequest;
use crate::print;
use anyhow::Context;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

/// Everything the listener hands to connection handlers.
#[derive(Clone)]
pub struct LinkCtx {
    /// Crane proxy.
    pub crane: PeerProxy,
    /// Conveyor proxy.
    pub conveyor: PeerProxy,
    /// Arm proxy.
    pub arm: PeerProxy,
    /// Where display-peer requests go.
    pub operator_tx: mpsc::UnboundedSender<OperatorRequest>,
    /// The display update stream, claimed by the display connection.
    pub display_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<DisplayMsg>>>>,
}

/// Accepts peer connections forever.
pub async fn run_listener(ctx: LinkCtx) -> anyhow::Result<()> {
    let listener = TcpListener::bind((config::LISTEN_ADDR, config::PEER_PORT))
        .await
        .context("binding the peer listener")?;
    print::ok(format!(
        "Listening for peers on {}:{}",
        config::LISTEN_ADDR,
        config::PEER_PORT
    ));
    loop {
        let (stream, addr) = listener.accept().await.context("accepting a peer")?;
        print::info(format!("Connection from {}", addr));
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(ctx, stream).await {
                print::err(format!("Peer connection from {} ended: {}", addr, e));
            }
        });
    }
}

async fn handle_connection(ctx: LinkCtx, stream: TcpStream) -> anyhow::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut hello_line = String::new();
    reader.read_line(&mut hello_line).await?;
    let hello: Hello = serde_json::from_str(hello_line.trim())
        .context("the first line was not a valid hello")?;
    print::ok(format!("{:?} announced itself", hello.peer));

    match hello.peer {
        Peer::Crane => machine_link(ctx.crane.clone(), reader, write_half).await,
        Peer::Conveyor => machine_link(ctx.conveyor.clone(), reader, write_half).await,
        Peer::Arm => machine_link(ctx.arm.clone(), reader, write_half).await,
        Peer::Display => display_link(ctx, reader, write_half).await,
    }
}

/// Serves one machine peer: statuses in, commands out.
async fn machine_link(
    proxy: PeerProxy,
    mut reader: BufReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
) -> anyhow::Result<()> {
    // Outbound: every distinct value in the command slot goes on the wire.
    let writer_proxy = proxy.clone();
    let writer_task = tokio::spawn(async move {
        let mut cmds = writer_proxy.command_reader();
        loop {
            let cmd = cmds.wait_for_change().await;
            let mut line = match serde_json::to_string(&cmd) {
                Ok(line) => line,
                Err(e) => {
                    print::cosmic_err(format!("Unserializable command {:?}: {}", cmd, e));
                    continue;
                }
            };
            line.push('\n');
            if writer.write_all(line.as_bytes()).await.is_err() {
                return;
            }
        }
    });

    // Inbound: each line is one status; garbage is logged and skipped.
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            writer_task.abort();
            anyhow::bail!("{:?} closed its connection", proxy.id);
        }
        match serde_json::from_str::<PeerStatus>(line.trim()) {
            Ok(status) => proxy.push_status(status),
            Err(_) => print::cosmic_err(format!(
                "{:?} sent something outside the vocabulary: {}",
                proxy.id,
                line.trim()
            )),
        }
    }
}

/// Serves the display peer: operator requests in, display updates out.
///
/// Unlike the machine links the outbound side is a real FIFO (the display
/// acknowledges at the transport level), so updates are written in order
/// and none are dropped.
async fn display_link(
    ctx: LinkCtx,
    mut reader: BufReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
) -> anyhow::Result<()> {
    let Some(mut display_rx) = ctx.display_rx.lock().await.take() else {
        anyhow::bail!("a display is already connected");
    };

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = display_rx.recv().await {
            let mut line = match serde_json::to_string(&msg) {
                Ok(line) => line,
                Err(e) => {
                    print::cosmic_err(format!("Unserializable display update: {}", e));
                    continue;
                }
            };
            line.push('\n');
            if writer.write_all(line.as_bytes()).await.is_err() {
                return;
            }
        }
    });

    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            writer_task.abort();
            anyhow::bail!("the display closed its connection");
        }
        match serde_json::from_str::<OperatorRequest>(line.trim()) {
            Ok(req) => {
                let _ = ctx.operator_tx.send(req);
            }
            Err(_) => print::cosmic_err(format!(
                "The display sent something outside the vocabulary: {}",
                line.trim()
            )),
        }
    }
}
