//! Host lifecycle notifications

use weir_core::Addr;

/// Record emitted on every online/offline transition.
///
/// The channel is unbounded; the consumer must drain it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub addr: Addr,
    pub online: bool,
    pub dhcp_name: Option<String>,
    pub mdns_name: Option<String>,
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} online={} dhcp={} mdns={}",
            self.addr,
            self.online,
            self.dhcp_name.as_deref().unwrap_or("-"),
            self.mdns_name.as_deref().unwrap_or("-"),
        )
    }
}
