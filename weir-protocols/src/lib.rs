//! Protocol engines for the weir LAN monitor
//!
//! The ARP engine learns the neighbourhood, defends virtual addresses and
//! poisons hunted clients; the DHCPv4 engine runs a two-subnet rogue server
//! that races the legitimate router. [`Monitor`] wires both to a shared
//! [`weir_session::Session`] and runs the background maintenance ticker.

pub mod arp;
pub mod dhcp4;
pub mod monitor;

pub use arp::{ArpConfig, ArpEngine};
pub use dhcp4::{Dhcp4Config, Dhcp4Engine, Mode};
pub use monitor::Monitor;
