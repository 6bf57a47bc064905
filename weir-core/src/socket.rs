//! Raw socket seam
//!
//! The engines read and write complete Ethernet frames but never open or
//! close the underlying socket; ownership stays with the caller.

use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// A bidirectional raw link-layer socket carrying whole Ethernet frames.
pub trait RawSocket: Send + Sync {
    /// Write one frame. Returns the number of bytes queued.
    fn send(&self, frame: &[u8]) -> Result<usize>;

    /// Read one frame into `buf`. Returns the frame length.
    fn recv(&self, buf: &mut [u8]) -> Result<usize>;
}

/// Raw socket over a pnet datalink channel.
pub struct DatalinkSocket {
    tx: Mutex<Box<dyn pnet_datalink::DataLinkSender>>,
    rx: Mutex<Box<dyn pnet_datalink::DataLinkReceiver>>,
}

impl DatalinkSocket {
    /// Open an Ethernet channel on the named interface.
    pub fn open(name: &str) -> Result<Self> {
        let iface = pnet_datalink::interfaces()
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| Error::interface(format!("interface '{}' not found", name)))?;

        let (tx, rx) = match pnet_datalink::channel(&iface, Default::default()) {
            Ok(pnet_datalink::Channel::Ethernet(tx, rx)) => (tx, rx),
            Ok(_) => return Err(Error::interface("unsupported channel type")),
            Err(e) => return Err(Error::interface(format!("failed to open channel: {}", e))),
        };

        Ok(Self {
            tx: Mutex::new(tx),
            rx: Mutex::new(rx),
        })
    }
}

impl RawSocket for DatalinkSocket {
    fn send(&self, frame: &[u8]) -> Result<usize> {
        let mut tx = self.tx.lock();
        tx.send_to(frame, None)
            .ok_or_else(|| Error::interface("failed to queue frame"))?
            .map_err(Error::Io)?;
        Ok(frame.len())
    }

    fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let mut rx = self.rx.lock();
        let packet = rx.next().map_err(Error::Io)?;
        if packet.len() > buf.len() {
            return Err(Error::PayloadTooBig(format!(
                "frame len {} exceeds buffer {}",
                packet.len(),
                buf.len()
            )));
        }
        buf[..packet.len()].copy_from_slice(packet);
        Ok(packet.len())
    }
}

/// In-memory loopback socket used by tests to observe emitted frames.
#[derive(Default)]
pub struct MemSocket {
    outbound: Mutex<Vec<Vec<u8>>>,
    inbound: Mutex<VecDeque<Vec<u8>>>,
}

impl MemSocket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a frame for the next `recv` call.
    pub fn push_inbound(&self, frame: &[u8]) {
        self.inbound.lock().push_back(frame.to_vec());
    }

    /// Drain everything written so far.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.outbound.lock())
    }

    /// Number of frames written so far.
    pub fn sent_count(&self) -> usize {
        self.outbound.lock().len()
    }
}

impl RawSocket for MemSocket {
    fn send(&self, frame: &[u8]) -> Result<usize> {
        self.outbound.lock().push(frame.to_vec());
        Ok(frame.len())
    }

    fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let frame = self
            .inbound
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Timeout("no frame queued".into()))?;
        if frame.len() > buf.len() {
            return Err(Error::PayloadTooBig(format!(
                "frame len {} exceeds buffer {}",
                frame.len(),
                buf.len()
            )));
        }
        buf[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_socket_roundtrip() {
        let sock = MemSocket::new();
        sock.push_inbound(&[1, 2, 3, 4]);

        let mut buf = [0u8; 16];
        let n = sock.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3, 4]);

        sock.send(&[9, 9]).unwrap();
        assert_eq!(sock.sent_count(), 1);
        assert_eq!(sock.take_sent(), vec![vec![9, 9]]);
        assert_eq!(sock.sent_count(), 0);
    }

    #[test]
    fn test_mem_socket_empty_recv_times_out() {
        let sock = MemSocket::new();
        let mut buf = [0u8; 16];
        assert!(matches!(sock.recv(&mut buf), Err(Error::Timeout(_))));
    }

    #[test]
    fn test_mem_socket_small_buffer() {
        let sock = MemSocket::new();
        sock.push_inbound(&[0u8; 32]);
        let mut buf = [0u8; 8];
        assert!(matches!(
            sock.recv(&mut buf),
            Err(Error::PayloadTooBig(_))
        ));
    }
}
