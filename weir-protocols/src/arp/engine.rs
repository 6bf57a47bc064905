//! ARP engine: passive classification, virtual-MAC defense, probe rejection

use super::packet::{self, Arp, OPERATION_REPLY, OPERATION_REQUEST};
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use weir_core::{Addr, Error, MacAddr, Result};
use weir_packet::{ethernet, BufferPool};
use weir_session::{Frame, PayloadId, Session};

/// Classification of an incoming ARP packet from opcode and addressing.
///
/// | opcode | sender IP | target IP | class        |
/// |--------|-----------|-----------|--------------|
/// | 1      | clientIP  | clientIP  | Announcement |
/// | 1      | 0.0.0.0   | targetIP  | Probe        |
/// | 1      | clientIP  | targetIP  | Request      |
/// | 2      | targetIP  | clientIP  | Reply        |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpOperation {
    Request,
    Reply,
    Announcement,
    Probe,
}

impl ArpOperation {
    /// Classify from opcode and sender/target IPs.
    pub fn classify(operation: u16, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Option<Self> {
        match operation {
            OPERATION_REPLY => Some(ArpOperation::Reply),
            OPERATION_REQUEST => {
                if sender_ip == target_ip {
                    Some(ArpOperation::Announcement)
                } else if sender_ip.is_unspecified() {
                    Some(ArpOperation::Probe)
                } else {
                    Some(ArpOperation::Request)
                }
            }
            _ => None,
        }
    }
}

/// ARP engine configuration.
#[derive(Debug, Clone, Default)]
pub struct ArpConfig {
    /// Sweep the whole LAN with ARP requests at this interval. Off when None.
    pub full_scan_interval: Option<Duration>,
}

/// The ARP engine.
///
/// Ingress work runs on the reader task and must not block; hunts spawn one
/// spoof task per victim MAC (see `spoof.rs`).
pub struct ArpEngine {
    session: Arc<Session>,
    pool: BufferPool,
    config: ArpConfig,
    /// IPs this engine answers for on behalf of fabricated owners
    virtual_ips: RwLock<HashMap<Ipv4Addr, MacAddr>>,
    /// Victims currently being spoofed, keyed by MAC
    pub(crate) hunt_list: DashMap<MacAddr, Addr>,
    pub(crate) shutdown: broadcast::Sender<()>,
}

impl ArpEngine {
    pub fn new(
        session: Arc<Session>,
        config: ArpConfig,
        shutdown: broadcast::Sender<()>,
    ) -> Arc<Self> {
        let engine = Arc::new(Self {
            session,
            pool: BufferPool::default(),
            config,
            virtual_ips: RwLock::new(HashMap::new()),
            hunt_list: DashMap::new(),
            shutdown,
        });
        if let Some(interval) = engine.config.full_scan_interval {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.scan_loop(interval).await });
        }
        engine
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Number of virtual IPs currently defended.
    pub fn virtual_count(&self) -> usize {
        self.virtual_ips.read().len()
    }

    /// True while `mac` is being spoofed.
    pub fn is_hunting(&self, mac: MacAddr) -> bool {
        self.hunt_list.contains_key(&mac)
    }

    /// Handle one ingress ARP frame. Learning happened in the parse pipeline;
    /// this is the active side: virtual-IP defense and probe rejection.
    pub fn process_frame(&self, frame: &Frame<'_>) -> Result<()> {
        let arp = match Arp::new(frame.payload()) {
            Ok(a) => a,
            Err(err) => {
                self.session.stats().record_err(PayloadId::Arp);
                return Err(err);
            }
        };

        // link-local scoped senders or targets are not ours to answer
        if arp.sender_ip().is_link_local() || arp.target_ip().is_link_local() {
            debug!(packet = %arp, "arp skipping link local");
            return Ok(());
        }

        let operation =
            match ArpOperation::classify(arp.operation(), arp.sender_ip(), arp.target_ip()) {
                Some(op) => op,
                None => {
                    warn!(packet = %arp, "arp invalid operation");
                    return Ok(());
                }
            };

        match operation {
            ArpOperation::Request | ArpOperation::Announcement => {
                // if the target IP is virtual we are claiming it: answer
                // immediately with the virtual MAC so the claimant backs off
                let target = self.virtual_ips.read().get(&arp.target_ip()).copied();
                if let Some(virtual_mac) = target {
                    debug!(ip = %arp.target_ip(), mac = %virtual_mac, "arp defending virtual IP");
                    self.reply(
                        MacAddr::broadcast(),
                        virtual_mac,
                        arp.target_ip(),
                        arp.sender_mac(),
                        arp.target_ip(),
                    )?;
                }
            }
            ArpOperation::Probe => {
                // a captured client probing for an address other than the one
                // we offered gets told the address is taken
                let src_mac = frame.src_addr.mac;
                if self.session.is_captured(src_mac) {
                    if let Some(offer) = self.session.ip4_offer(src_mac) {
                        if arp.target_ip() != offer {
                            info!(mac = %src_mac, probe = %arp.target_ip(), offer = %offer,
                                "arp rejecting probe for foreign address");
                            self.reply(
                                MacAddr::broadcast(),
                                src_mac,
                                arp.target_ip(),
                                src_mac,
                                arp.target_ip(),
                            )?;
                        }
                    }
                }
            }
            ArpOperation::Reply => {}
        }

        Ok(())
    }

    /// Register a virtual IP defended with a fabricated MAC. Returns the MAC.
    pub fn claim(&self, ip: Ipv4Addr) -> MacAddr {
        let mut table = self.virtual_ips.write();
        *table.entry(ip).or_insert_with(random_virtual_mac)
    }

    /// Stop defending a virtual IP.
    pub fn unclaim(&self, ip: Ipv4Addr) {
        self.virtual_ips.write().remove(&ip);
    }

    fn send_arp(
        &self,
        ether_dst: MacAddr,
        operation: u16,
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Result<()> {
        let mut b = self.pool.get();
        let buf = b.as_mut_slice();
        let ether_len = ethernet::encode(buf, ethernet::ETHERTYPE_ARP, sender_mac, ether_dst)?;
        let arp_len = packet::encode(
            &mut buf[ether_len..],
            operation,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        )?;
        self.session.socket().send(&b.as_slice()[..ether_len + arp_len])?;
        Ok(())
    }

    /// Send an ARP reply.
    pub fn reply(
        &self,
        ether_dst: MacAddr,
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Result<()> {
        self.send_arp(
            ether_dst,
            OPERATION_REPLY,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        )
    }

    /// Send an ARP request (who-has `target_ip`).
    pub fn request(
        &self,
        ether_dst: MacAddr,
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_ip: Ipv4Addr,
    ) -> Result<()> {
        self.send_arp(
            ether_dst,
            OPERATION_REQUEST,
            sender_mac,
            sender_ip,
            MacAddr::zero(),
            target_ip,
        )
    }

    /// Send an ACD announcement (`sender IP == target IP`) claiming `ip` for
    /// `mac`, `repeats` times.
    pub fn announce(
        &self,
        ether_dst: MacAddr,
        mac: MacAddr,
        ip: Ipv4Addr,
        repeats: usize,
    ) -> Result<()> {
        for _ in 0..repeats {
            self.send_arp(ether_dst, OPERATION_REQUEST, mac, ip, MacAddr::zero(), ip)?;
        }
        Ok(())
    }

    /// Unicast liveness probe used by the maintenance ticker.
    pub fn check_addr(&self, addr: Addr) -> Result<()> {
        let ip = addr
            .ipv4()
            .ok_or_else(|| Error::InvalidIp4(format!("{}", addr.ip)))?;
        let nic = self.session.nic();
        self.request(addr.mac, nic.host_mac, nic.host_addr4(), ip)
    }

    /// Sweep the whole LAN with ARP requests to surface silent devices,
    /// skipping the router and this host. 25 ms between requests.
    pub async fn scan_network(&self) -> Result<()> {
        let nic = self.session.nic();
        let lan = nic.home_lan4;
        debug!(lan = %lan, "arp scanning network");
        for ip in lan.iter() {
            if ip == lan.network()
                || ip == lan.broadcast()
                || ip == nic.router_addr4()
                || ip == nic.host_addr4()
            {
                continue;
            }
            if let Err(err) = self.request(MacAddr::broadcast(), nic.host_mac, nic.host_addr4(), ip)
            {
                warn!(ip = %ip, error = %err, "arp scan request failed");
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        Ok(())
    }

    async fn scan_loop(self: Arc<Self>, interval: Duration) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = ticker.tick() => {
                    if let Err(err) = self.scan_network().await {
                        warn!(error = %err, "arp network scan failed");
                    }
                }
            }
        }
    }
}

/// A random locally-administered unicast MAC for virtual claims.
fn random_virtual_mac() -> MacAddr {
    let mut mac = [0u8; 6];
    rand::thread_rng().fill(&mut mac);
    mac[0] &= 0xfe; // unicast
    mac[0] |= 0x02; // locally administered
    MacAddr(mac)
}
