//! The cooperative bridge loop
//!
//! `run_once` performs one bounded unit of work per component and returns;
//! the caller yields to the runtime between iterations. Order within an
//! iteration: supervisor, admin, radio, downlink, timers.

use crate::admin::AdminInbox;
use crate::clock::Tick;
use crate::config::BridgeConfig;
use crate::connection::ConnectivitySupervisor;
use crate::downlink::DownlinkReceiver;
use crate::radio::{CrcStatus, Radio, RadioPacket};
use crate::schedule::KeepaliveScheduler;
use crate::stats::{StatsCounters, StatsSnapshot};
use crate::status::StatusReporter;
use crate::transport::{DatagramTransport, LinkControl};
use crate::uplink::{ResolvedTarget, TokenTracker, UplinkForwarder};
use onechan_shared::state_machine::LinkState;
use onechan_shared::GatewayIdentity;
use tracing::{debug, warn};

/// Summary of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iteration {
    /// Something was received, sent or served
    pub did_work: bool,
    pub link: LinkState,
}

pub struct Bridge<R, T, L> {
    radio: R,
    transport: T,
    link: L,
    forwarder: UplinkForwarder,
    receiver: DownlinkReceiver,
    scheduler: KeepaliveScheduler,
    reporter: StatusReporter,
    supervisor: ConnectivitySupervisor,
    stats: StatsCounters,
    tokens: Option<TokenTracker>,
    admin: Option<AdminInbox>,
}

impl<R, T, L> Bridge<R, T, L>
where
    R: Radio,
    T: DatagramTransport,
    L: LinkControl,
{
    pub fn new(
        config: &BridgeConfig,
        identity: GatewayIdentity,
        targets: Vec<ResolvedTarget>,
        radio: R,
        transport: T,
        link: L,
        now_ms: u32,
    ) -> Self {
        Self {
            radio,
            transport,
            link,
            forwarder: UplinkForwarder::new(identity, targets),
            receiver: DownlinkReceiver::new(),
            scheduler: KeepaliveScheduler::new(
                config.keepalive_interval_ms(),
                config.status_interval_ms(),
                now_ms,
            ),
            reporter: StatusReporter::new(&config.location, config.profile.clone()),
            supervisor: ConnectivitySupervisor::new(config.reconnect.clone(), now_ms),
            stats: StatsCounters::new(),
            tokens: config.track_tokens.then(TokenTracker::default),
            admin: None,
        }
    }

    /// Serve administrative requests from this inbox
    pub fn with_admin(mut self, inbox: AdminInbox) -> Self {
        self.admin = Some(inbox);
        self
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn link_state(&self) -> LinkState {
        self.supervisor.state()
    }

    /// Connected -> Reconnecting transitions since start
    pub fn link_episodes(&self) -> u64 {
        self.supervisor.episodes()
    }

    /// Acknowledgement correlation, when enabled
    pub fn tokens(&self) -> Option<&TokenTracker> {
        self.tokens.as_ref()
    }

    /// Run one iteration; never waits on the network or the radio
    pub fn run_once(&mut self, tick: &Tick) -> Iteration {
        let now = tick.millis;
        let mut did_work = false;

        self.supervisor.tick(now, &mut self.transport, &mut self.link);

        if let Some(request) = self.admin.as_mut().and_then(AdminInbox::try_next) {
            request.serve(&mut self.stats);
            did_work = true;
        }

        if let Some(packet) = self.radio.try_receive() {
            self.handle_radio_packet(packet, now);
            did_work = true;
        }

        if self.supervisor.can_send() {
            let outcome = self.receiver.poll(
                &mut self.transport,
                &mut self.radio,
                &mut self.stats,
                self.tokens.as_mut(),
                now,
            );
            did_work |= !outcome.is_idle();
        }

        did_work |= self.run_timers(tick);

        Iteration {
            did_work,
            link: self.supervisor.state(),
        }
    }

    fn handle_radio_packet(&mut self, packet: RadioPacket, now: u32) {
        self.stats.record_received();
        match packet.crc {
            CrcStatus::Ok => self.stats.record_valid(),
            CrcStatus::Missing => self.stats.record_no_crc(),
            CrcStatus::Bad => {
                self.stats.record_invalid();
                warn!("[RADIO] CRC error, dropping {} byte packet", packet.payload.len());
                return;
            }
        }

        if !self.supervisor.can_send() {
            warn!(
                "[UPLINK] {}: dropping {} byte packet",
                self.supervisor.state(),
                packet.payload.len()
            );
            return;
        }

        let report = self.forwarder.forward(
            &mut self.transport,
            &mut self.stats,
            self.tokens.as_mut(),
            now,
            &packet.payload,
        );
        self.supervisor.on_send_report(&report, now);
    }

    /// Timers always rearm; frames only go out while connected
    fn run_timers(&mut self, tick: &Tick) -> bool {
        let now = tick.millis;
        let due = self.scheduler.tick(now);
        if !due.any() {
            return false;
        }
        if !self.supervisor.can_send() {
            debug!("[SCHED] {}: skipping due status/keepalive", self.supervisor.state());
            return false;
        }

        if due.status {
            let rendered = self.reporter.build_status(&tick.wall, &self.stats.snapshot());
            let report = self.forwarder.send_status(
                &mut self.transport,
                &mut self.stats,
                self.tokens.as_mut(),
                now,
                &rendered.payload,
            );
            debug!("[SCHED] Status sent to {}/{} targets", report.delivered, report.attempted);
            self.supervisor.on_send_report(&report, now);
        }

        if due.keepalive && self.supervisor.can_send() {
            let report = self
                .forwarder
                .send_keepalive(&mut self.transport, self.tokens.as_mut(), now);
            debug!("[SCHED] Keepalive sent to {}/{} targets", report.delivered, report.attempted);
            self.supervisor.on_send_report(&report, now);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin;
    use crate::config::ServerTarget;
    use crate::testing::{MockLink, MockRadio, MockTransport};
    use chrono::Utc;
    use onechan_shared::codec;
    use onechan_shared::FrameKind;
    use std::net::SocketAddr;

    type TestBridge = Bridge<MockRadio, MockTransport, MockLink>;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn bridge_with(config: BridgeConfig) -> TestBridge {
        let targets = [1701, 1702]
            .iter()
            .map(|port| {
                ResolvedTarget::new(
                    ServerTarget {
                        host: "127.0.0.1".into(),
                        port: *port,
                    },
                    addr(*port),
                )
            })
            .collect();
        let identity = config.identity().unwrap();
        Bridge::new(
            &config,
            identity,
            targets,
            MockRadio::new(),
            MockTransport::new(),
            MockLink::new(),
            0,
        )
    }

    fn bridge() -> TestBridge {
        bridge_with(BridgeConfig::default())
    }

    fn at(millis: u32) -> Tick {
        Tick {
            millis,
            wall: Utc::now(),
        }
    }

    #[test]
    fn test_idle_iteration() {
        let mut bridge = bridge();
        let iteration = bridge.run_once(&at(10));
        assert_eq!(
            iteration,
            Iteration {
                did_work: false,
                link: LinkState::Connected
            }
        );
    }

    #[test]
    fn test_radio_packet_fans_out() {
        let mut bridge = bridge();
        bridge.radio.push(RadioPacket::new(&b"temp=21"[..], CrcStatus::Ok));

        assert!(bridge.run_once(&at(10)).did_work);

        assert_eq!(bridge.transport.sent_to(addr(1701)), 1);
        assert_eq!(bridge.transport.sent_to(addr(1702)), 1);
        let frame = codec::decode(&bridge.transport.sent[0].0).unwrap();
        assert_eq!(frame.kind, FrameKind::PushData);
        assert_eq!(&frame.payload[..], b"temp=21");

        let stats = bridge.stats();
        assert_eq!(stats.rx_received, 1);
        assert_eq!(stats.rx_valid, 1);
        assert_eq!(stats.forwarded, 1);
    }

    #[test]
    fn test_crc_accounting() {
        let mut bridge = bridge();
        bridge.radio.push(RadioPacket::new(&b"bad"[..], CrcStatus::Bad));
        bridge.radio.push(RadioPacket::new(&b"nocrc"[..], CrcStatus::Missing));

        bridge.run_once(&at(10));
        assert!(bridge.transport.sent.is_empty());
        bridge.run_once(&at(20));
        assert_eq!(bridge.transport.sent.len(), 2);

        let stats = bridge.stats();
        assert_eq!(stats.rx_received, 2);
        assert_eq!(stats.rx_invalid, 1);
        assert_eq!(stats.rx_no_crc, 1);
        assert_eq!(stats.rx_valid, 0);
        assert_eq!(stats.forwarded, 1);
    }

    #[test]
    fn test_total_failure_suspends_traffic() {
        let mut bridge = bridge();
        bridge.transport.down = true;
        bridge.radio.push(RadioPacket::new(&b"one"[..], CrcStatus::Ok));
        bridge.radio.push(RadioPacket::new(&b"two"[..], CrcStatus::Ok));

        let iteration = bridge.run_once(&at(10));
        assert_eq!(iteration.link, LinkState::Reconnecting);

        // Downlinks wait in the transport while reconnecting
        let resp = codec::encode(FrameKind::PullResp, 1, None, Some(b"dl")).unwrap();
        bridge.transport.push_inbound(resp.to_vec(), addr(1701));
        bridge.transport.down = false;
        bridge.run_once(&at(20));
        assert_eq!(bridge.stats().rx_received, 2);
        assert_eq!(bridge.stats().forwarded, 0);
        assert!(bridge.transport.sent.is_empty());
        assert_eq!(bridge.transport.inbound.len(), 1);

        // Supervisor restores after the retry interval, then the downlink flows
        let iteration = bridge.run_once(&at(1_010));
        assert_eq!(iteration.link, LinkState::Connected);
        assert_eq!(bridge.link_state(), LinkState::Connected);
        assert_eq!(bridge.link_episodes(), 1);
        assert_eq!(bridge.radio.transmitted, vec![b"dl".to_vec()]);
        assert_eq!(bridge.transport.sent_to(addr(1701)), 1);
    }

    #[test]
    fn test_keepalive_and_status_timers() {
        let mut bridge = bridge();

        bridge.run_once(&at(30_999));
        assert!(bridge.transport.sent.is_empty());

        assert!(bridge.run_once(&at(31_000)).did_work);
        assert_eq!(bridge.transport.sent.len(), 2);
        assert!(bridge
            .transport
            .sent
            .iter()
            .all(|(frame, _)| frame[3] == FrameKind::PullData.code()));

        bridge.run_once(&at(61_000));
        let status = codec::decode(&bridge.transport.sent[2].0).unwrap();
        assert_eq!(status.kind, FrameKind::PushData);
        assert!(status.payload.starts_with(b"{\"stat\":"));
    }

    #[test]
    fn test_tracks_tokens_when_enabled() {
        let mut bridge = bridge_with(BridgeConfig {
            track_tokens: true,
            ..Default::default()
        });
        bridge.radio.push(RadioPacket::new(&b"x"[..], CrcStatus::Ok));
        bridge.run_once(&at(10));

        let token = codec::decode(&bridge.transport.sent[0].0).unwrap().token;
        let ack = codec::encode(FrameKind::PushAck, token, None, None).unwrap();
        bridge.transport.push_inbound(ack.to_vec(), addr(1701));
        bridge.run_once(&at(20));

        let tracker = bridge.tokens().unwrap();
        assert_eq!(tracker.matched(), 1);
        assert_eq!(tracker.unmatched(), 0);
        assert_eq!(bridge.stats().push_acked, 1);
    }

    #[tokio::test]
    async fn test_admin_requests_served_by_loop() {
        let (handle, inbox) = admin::channel();
        let mut bridge = bridge().with_admin(inbox);
        bridge.radio.push(RadioPacket::new(&b"x"[..], CrcStatus::Ok));
        bridge.run_once(&at(10));

        let client = tokio::spawn(async move { handle.reset().await });
        while !client.is_finished() {
            bridge.run_once(&at(20));
            tokio::task::yield_now().await;
        }

        let before = client.await.unwrap().unwrap();
        assert_eq!(before.rx_received, 1);
        assert_eq!(bridge.stats(), StatsSnapshot::default());
    }
}
