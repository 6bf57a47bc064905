//! Address Resolution Protocol
//!
//! Wire codec, passive classification and the active spoofing engine.

mod engine;
mod packet;
mod spoof;

pub use engine::{ArpConfig, ArpEngine, ArpOperation};
pub use packet::{encode, Arp, ARP_LEN, OPERATION_REPLY, OPERATION_REQUEST};
