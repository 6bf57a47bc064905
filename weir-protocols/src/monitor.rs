//! Top-level wiring
//!
//! A [`Monitor`] joins the session, the ARP engine and the DHCPv4 engine.
//! Ingress frames are parsed and dispatched on the caller's task so that any
//! replies hit the wire before `process_frame` returns; background work is
//! limited to the spoof tasks, the attack burst and the maintenance ticker.

use crate::arp::{ArpConfig, ArpEngine};
use crate::dhcp4::{Dhcp4Config, Dhcp4Engine};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use weir_core::{MacAddr, Result};
use weir_session::{PayloadId, Session};

/// Idle time before the ticker confirms a host with a unicast ARP request.
const PROBE_AFTER: Duration = Duration::from_secs(30);
/// Idle time before a host is marked offline.
const OFFLINE_AFTER: Duration = Duration::from_secs(5 * 60);
/// Idle time before an offline host is purged from the tables.
const PURGE_AFTER: Duration = Duration::from_secs(60 * 60);
/// Maintenance cadence.
const TICK: Duration = Duration::from_secs(60);

/// The assembled LAN monitor.
pub struct Monitor {
    session: Arc<Session>,
    arp: Arc<ArpEngine>,
    dhcp4: Arc<Dhcp4Engine>,
    shutdown: broadcast::Sender<()>,
}

impl Monitor {
    /// Wire the engines to a session. The raw socket stays owned by the
    /// caller.
    pub fn new(
        session: Arc<Session>,
        arp_config: ArpConfig,
        dhcp_config: Dhcp4Config,
    ) -> Result<Self> {
        let (shutdown, _) = broadcast::channel(4);
        let arp = ArpEngine::new(Arc::clone(&session), arp_config, shutdown.clone());
        let dhcp4 = Dhcp4Engine::new(Arc::clone(&session), dhcp_config, shutdown.clone())?;
        Ok(Self {
            session,
            arp,
            dhcp4,
            shutdown,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn arp(&self) -> &Arc<ArpEngine> {
        &self.arp
    }

    pub fn dhcp4(&self) -> &Arc<Dhcp4Engine> {
        &self.dhcp4
    }

    /// Parse one raw frame and run the protocol hooks. Replies for this
    /// frame are written before the call returns.
    pub fn process_frame(&self, b: &[u8]) -> Result<()> {
        let frame = self.session.parse(b)?;
        match frame.payload_id {
            PayloadId::Arp => self.arp.process_frame(&frame),
            PayloadId::Dhcp4 => self.dhcp4.process_frame(&frame),
            _ => Ok(()),
        }
    }

    /// Flag a device for MITM and start hunting every IPv4 address it
    /// carries.
    pub fn capture(&self, mac: MacAddr) -> Result<()> {
        let addrs = self.session.capture(mac);
        for addr in addrs {
            let Some(ip) = addr.ipv4() else { continue };
            self.dhcp4.start_hunt(ip)?;
            self.arp.start_hunt(addr)?;
        }
        Ok(())
    }

    /// Stop hunting a device and clear its capture flag.
    pub fn release(&self, mac: MacAddr) -> Result<()> {
        let addrs = self.session.release(mac);
        for addr in addrs {
            let Some(ip) = addr.ipv4() else { continue };
            self.dhcp4.stop_hunt(ip)?;
            self.arp.stop_hunt(addr)?;
        }
        Ok(())
    }

    /// Spawn the once-a-minute maintenance task: probe idle hosts, mark the
    /// silent ones offline, purge the long-gone, expire stale leases.
    pub fn spawn_ticker(&self) -> JoinHandle<()> {
        let session = Arc::clone(&self.session);
        let arp = Arc::clone(&self.arp);
        let dhcp4 = Arc::clone(&self.dhcp4);
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the first tick of a tokio interval fires immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!("ticker stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        let now = SystemTime::now();
                        let probe = session.purge(now, PROBE_AFTER, OFFLINE_AFTER, PURGE_AFTER);
                        for addr in probe {
                            if addr.ipv4().is_none() {
                                continue;
                            }
                            if let Err(err) = arp.check_addr(addr) {
                                warn!(addr = %addr, error = %err, "liveness probe failed");
                            }
                        }
                        dhcp4.free_expired(now);
                    }
                }
            }
        })
    }

    /// Signal every background task to stop. Tasks exit at their next
    /// suspension point; the raw socket is left open for its owner.
    pub fn close(&self) {
        info!("monitor closing");
        let _ = self.shutdown.send(());
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}
