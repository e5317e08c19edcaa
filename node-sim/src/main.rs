use anyhow::{bail, Context, Result};
use clap::Parser;
use onechan_shared::sim;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "onechan-node-sim")]
#[command(about = "Sensor node simulator feeding a bridge's radio link")]
struct Args {
    /// Radio link address of the bridge
    #[arg(short, long, default_value = "127.0.0.1:1780")]
    radio: SocketAddr,

    /// Name included in every packet
    #[arg(long, default_value = "node-1")]
    node_id: String,

    /// Milliseconds between packets
    #[arg(long, default_value_t = 5000)]
    interval_ms: u64,

    /// Mark every Nth packet as received with a CRC error
    #[arg(long)]
    bad_every: Option<u64>,

    /// Send every Nth packet without a CRC
    #[arg(long)]
    no_crc_every: Option<u64>,
}

/// CRC flag for the packet with sequence number `seq` (starting at 1)
fn crc_flag(seq: u64, bad_every: Option<u64>, no_crc_every: Option<u64>) -> u8 {
    let hits = |every: Option<u64>| every.map_or(false, |n| n > 0 && seq % n == 0);
    if hits(bad_every) {
        sim::CRC_BAD
    } else if hits(no_crc_every) {
        sim::CRC_MISSING
    } else {
        sim::CRC_OK
    }
}

/// `[crc_flag][payload]`
fn radio_frame(flag: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.push(flag);
    frame.extend_from_slice(payload);
    frame
}

fn reading(node_id: &str, seq: u64) -> String {
    let temperature = 18.0 + rand::random::<f32>() * 8.0;
    format!("{} seq={} temp={:.1}", node_id, seq, temperature)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    if args.interval_ms == 0 {
        bail!("--interval-ms must be non-zero");
    }

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket
        .connect(args.radio)
        .await
        .with_context(|| format!("Failed to reach radio link {}", args.radio))?;
    info!("Node {} sending to {} every {}ms", args.node_id, args.radio, args.interval_ms);

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms));
    let mut buf = vec![0u8; sim::MAX_RADIO_PAYLOAD + 1];
    let mut seq: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                seq += 1;
                let text = reading(&args.node_id, seq);
                let flag = crc_flag(seq, args.bad_every, args.no_crc_every);
                if let Err(e) = socket.send(&radio_frame(flag, text.as_bytes())).await {
                    warn!("Send failed: {}", e);
                    continue;
                }
                debug!("Sent flag={} '{}'", flag, text);
            }

            result = socket.recv(&mut buf) => {
                match result {
                    Ok(n) => info!(
                        "Downlink ({} bytes): {}",
                        n,
                        String::from_utf8_lossy(&buf[..n])
                    ),
                    // The bridge not listening yet shows up as a refused receive
                    Err(e) => debug!("Receive error: {}", e),
                }
            }
        }
    }
}
