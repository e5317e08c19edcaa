mod downlink;
mod session;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use downlink::{DownlinkDispatcher, TimeoutTracker};
use onechan_shared::codec::{self, DecodeError};
use onechan_shared::status::parse_status;
use onechan_shared::{timing, FrameKind, ProtocolFrame, RX_BUFF_SIZE};
use session::{eviction_timeout, GatewayRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "onechan-collector")]
#[command(about = "Development collector for single channel gateways")]
struct Args {
    /// UDP address to listen on
    #[arg(short, long, default_value = "0.0.0.0:1700")]
    bind: SocketAddr,

    /// Send a downlink to every known gateway this often (seconds)
    #[arg(long)]
    downlink_every: Option<u64>,

    /// Payload of generated downlinks
    #[arg(long, default_value = "hello node")]
    downlink_payload: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let socket = Arc::new(
        UdpSocket::bind(args.bind)
            .await
            .with_context(|| format!("Failed to bind {}", args.bind))?,
    );
    info!("Collector listening on {}", socket.local_addr()?);

    let registry = Arc::new(GatewayRegistry::new());
    let dispatcher = Arc::new(DownlinkDispatcher::new(socket.clone(), registry.clone()));

    let tracker = TimeoutTracker::new(dispatcher.clone());
    tokio::spawn(async move { tracker.run().await });

    let registry_clone = registry.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(u64::from(timing::KEEPALIVE_INTERVAL_MS)));
        loop {
            ticker.tick().await;
            let evicted = registry_clone.remove_silent(Instant::now(), eviction_timeout()).await;
            if evicted.is_empty() {
                continue;
            }
            for identity in &evicted {
                warn!("Gateway {} silent for {:?}, evicted", identity, eviction_timeout());
            }
            info!("{} gateway(s) still known", registry_clone.count().await);
        }
    });

    if let Some(secs) = args.downlink_every {
        let dispatcher_clone = dispatcher.clone();
        let payload = Bytes::from(args.downlink_payload.clone().into_bytes());
        info!("Generating a downlink every {}s", secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let sent = dispatcher_clone.broadcast(payload.clone()).await;
                debug!(
                    "Queued {} downlink(s), {} awaiting acknowledgement",
                    sent.len(),
                    dispatcher_clone.pending_count().await
                );
            }
        });
    }

    let mut buf = vec![0u8; RX_BUFF_SIZE + 1];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        match codec::decode(&buf[..n]) {
            Ok(frame) => {
                if let Err(e) = handle_frame(&socket, &registry, &dispatcher, frame, from).await {
                    warn!("Failed to answer {}: {:#}", from, e);
                }
            }
            Err(DecodeError::UnknownKind { version, token, kind }) => {
                warn!(
                    "Unknown frame kind 0x{:02x} from {} (version={}, token={:04x})",
                    kind, from, version, token
                );
            }
            Err(e) => warn!("Bad datagram from {}: {}", from, e),
        }
    }
}

async fn handle_frame(
    socket: &UdpSocket,
    registry: &GatewayRegistry,
    dispatcher: &DownlinkDispatcher,
    frame: ProtocolFrame,
    from: SocketAddr,
) -> Result<()> {
    match frame.kind {
        FrameKind::PushData => {
            ack(socket, FrameKind::PushAck, frame.token, from).await?;
            let Some(identity) = frame.identity else {
                return Ok(());
            };

            let status = parse_status(&frame.payload).ok();
            match &status {
                Some(stat) => info!(
                    "[{}] STATUS time={} lati={} long={} alti={} rxnb={} rxok={} rxfw={} ackr={} dwnb={} txnb={}",
                    identity,
                    stat.time,
                    stat.lati,
                    stat.long,
                    stat.alti,
                    stat.rxnb,
                    stat.rxok,
                    stat.rxfw,
                    stat.ackr,
                    stat.dwnb,
                    stat.txnb
                ),
                None => info!(
                    "[{}] UPLINK {} bytes: {}",
                    identity,
                    frame.payload.len(),
                    String::from_utf8_lossy(&frame.payload)
                ),
            }
            if registry.record_push(identity, from, status).await {
                info!("New gateway {} pushing from {}", identity, from);
            }
        }
        FrameKind::PullData => {
            ack(socket, FrameKind::PullAck, frame.token, from).await?;
            if let Some(identity) = frame.identity {
                debug!("[{}] PULL_DATA token={:04x} from {}", identity, frame.token, from);
                if registry.record_pull(identity, from).await {
                    info!("New gateway {} pulling from {}", identity, from);
                }
            }
        }
        FrameKind::PullAck => {
            dispatcher.handle_ack(frame.token, from).await;
        }
        FrameKind::PushAck | FrameKind::PullResp => {
            warn!("Unexpected {} from {}", frame.kind, from);
        }
    }
    Ok(())
}

async fn ack(socket: &UdpSocket, kind: FrameKind, token: u16, to: SocketAddr) -> Result<()> {
    let frame = codec::encode(kind, token, None, None)?;
    socket.send_to(&frame, to).await?;
    Ok(())
}
