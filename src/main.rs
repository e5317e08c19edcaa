mod admin;
mod bridge;
mod clock;
mod config;
mod connection;
mod downlink;
mod radio;
mod schedule;
mod stats;
mod status;
#[cfg(test)]
mod testing;
mod transport;
mod uplink;

use admin::AdminHandle;
use anyhow::{bail, Context, Result};
use bridge::Bridge;
use clap::Parser;
use clock::MonotonicClock;
use config::{BridgeConfig, ServerTarget};
use radio::UdpRadio;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use transport::{HostLink, UdpTransport};
use uplink::ResolvedTarget;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "onechan-bridge")]
#[command(about = "Single channel gateway bridging a packet radio to UDP collectors")]
struct Args {
    /// TOML configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds between statistics log lines
    #[arg(long, default_value_t = 60)]
    stats_every: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = BridgeConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let identity = config.identity()?;

    info!("Gateway {} starting", identity);
    info!("  Keepalive every {}s, status every {}s", config.keepalive_interval_secs, config.status_interval_secs);

    let targets = resolve_targets(&config.servers).await?;
    for target in &targets {
        info!("  Collector: {}", target);
    }

    let transport = UdpTransport::bind(SocketAddr::from(([0, 0, 0, 0], config.local_port)))
        .with_context(|| format!("Failed to bind UDP port {}", config.local_port))?;
    info!("  Transport on {}", transport.local_addr()?);
    let radio = UdpRadio::bind(config.radio.listen, config.radio.max_payload)
        .with_context(|| format!("Failed to open radio link on {}", config.radio.listen))?;
    info!("  Radio link on {}", radio.local_addr()?);
    let link = HostLink::new(targets[0].addr);

    let clock = MonotonicClock::new();
    let (admin, inbox) = admin::channel();
    let mut bridge = Bridge::new(
        &config,
        identity,
        targets,
        radio,
        transport,
        link,
        clock.millis(),
    )
    .with_admin(inbox);

    tokio::spawn(log_stats(admin.clone(), Duration::from_secs(args.stats_every.max(1))));

    let idle = config.idle_sleep();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    // SIGHUP zeroes the statistics
    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    loop {
        let iteration = bridge.run_once(&clock.tick());

        // Always hand control back to the runtime between iterations
        let pause = if iteration.did_work { Duration::ZERO } else { idle };
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutdown requested");
                break;
            }
            Some(()) = hangup.recv() => {
                tokio::spawn(reset_stats(admin.clone()));
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }

    info!(
        "Stopped while {} after {} link failure episode(s)",
        bridge.link_state(),
        bridge.link_episodes()
    );
    if let Some(tokens) = bridge.tokens() {
        info!(
            "Acknowledgements: {} matched, {} unmatched, {} outstanding",
            tokens.matched(),
            tokens.unmatched(),
            tokens.outstanding()
        );
    }
    let stats = bridge.stats();
    info!(
        "Final statistics: {}",
        serde_json::to_string(&stats).context("Failed to serialize statistics")?
    );
    Ok(())
}

/// Zero the counters, logging what they held
async fn reset_stats(admin: AdminHandle) {
    match admin.reset().await {
        Ok(before) => match serde_json::to_string(&before) {
            Ok(json) => info!("[ADMIN] Statistics reset, previous values: {}", json),
            Err(e) => warn!("[ADMIN] Statistics reset, previous values unavailable: {}", e),
        },
        Err(e) => warn!("[ADMIN] Statistics reset failed: {}", e),
    }
}

/// Resolve every collector once; unresolvable ones are skipped
async fn resolve_targets(servers: &[ServerTarget]) -> Result<Vec<ResolvedTarget>> {
    let mut targets = Vec::with_capacity(servers.len());
    for server in servers {
        match tokio::net::lookup_host((server.host.as_str(), server.port)).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => targets.push(ResolvedTarget::new(server.clone(), addr)),
                None => warn!("No address found for {}", server),
            },
            Err(e) => warn!("Failed to resolve {}: {}", server, e),
        }
    }
    if targets.is_empty() {
        bail!("None of the {} configured collectors could be resolved", servers.len());
    }
    Ok(targets)
}

/// Periodic statistics line, read through the admin handle
async fn log_stats(admin: AdminHandle, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match admin.stats().await {
            Ok(stats) => info!(
                "[ADMIN] rxnb={} rxok={} rxbad={} rxnocrc={} rxfw={} pushed={} acked={} dwnb={} txnb={}",
                stats.rx_received,
                stats.rx_valid,
                stats.rx_invalid,
                stats.rx_no_crc,
                stats.forwarded,
                stats.push_sent,
                stats.push_acked,
                stats.downlink_received,
                stats.downlink_transmitted
            ),
            Err(e) => {
                warn!("[ADMIN] Statistics unavailable: {}", e);
                break;
            }
        }
    }
}
