//! Weir core library
//!
//! Fundamental types, error handling and the raw-socket seam shared by every
//! crate in the weir workspace.

pub mod error;
pub mod nic;
pub mod socket;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use nic::NicInfo;
pub use socket::{DatalinkSocket, MemSocket, RawSocket};
pub use types::{Addr, HuntStage, MacAddr};
