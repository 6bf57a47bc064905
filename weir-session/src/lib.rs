//! Session state for the weir LAN monitor
//!
//! A [`Session`] owns the two-level host inventory (MAC table and host
//! table), per-payload capture statistics and the notification channel, and
//! turns raw frames into layered [`Frame`] views via [`Session::parse`].

pub mod frame;
pub mod notify;
pub mod session;
pub mod stats;

pub use frame::{Frame, PayloadId};
pub use notify::Notification;
pub use session::{Host, HostInfo, MacEntry, Session};
pub use stats::{ProtoStats, SessionStats};
