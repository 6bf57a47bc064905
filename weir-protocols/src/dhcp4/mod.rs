//! DHCPv4 rogue server
//!
//! Wire codec, the two-subnet lease table and the server/attack engine.

mod attack;
mod engine;
mod lease;
mod packet;
mod subnet;

pub use engine::{Dhcp4Config, Dhcp4Engine, Mode, FAMILY_DNS};
pub use lease::{Lease, LeaseState, LeaseTable};
pub use packet::{
    encode, encode_reply, Dhcp4, DhcpOptions, MessageType, OptionCode, OptionMap, BOOT_REPLY,
    BOOT_REQUEST, CLIENT_PORT, SERVER_PORT,
};
pub use subnet::{Subnet, SubnetConfig, SubnetId};
