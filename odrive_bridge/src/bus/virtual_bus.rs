//! In-memory bus.
//!
//! Every endpoint attached to the same hub sees every frame sent by the
//! other endpoints, like nodes on a physical bus. Used by the simulator and
//! by tests.

use super::CanBus;
use odrive_common::error::TransportError;
use odrive_common::protocol::CanFrame;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Hub {
    endpoints: Mutex<Vec<(usize, Sender<CanFrame>)>>,
    next_id: AtomicUsize,
    bitrate: AtomicU32,
}

/// One endpoint on an in-memory bus.
pub struct VirtualBus {
    id: usize,
    hub: Arc<Hub>,
    rx: Mutex<Receiver<CanFrame>>,
}

impl VirtualBus {
    /// First endpoint of a new hub.
    pub fn new() -> Self {
        Self::attach(Arc::new(Hub::default()))
    }

    /// Two connected endpoints.
    pub fn pair() -> (Self, Self) {
        let a = Self::new();
        let b = a.endpoint();
        (a, b)
    }

    /// Attach another endpoint to the same hub.
    pub fn endpoint(&self) -> Self {
        Self::attach(Arc::clone(&self.hub))
    }

    /// Last bitrate set through any endpoint (0 if never set).
    pub fn bitrate(&self) -> u32 {
        self.hub.bitrate.load(Ordering::Acquire)
    }

    fn attach(hub: Arc<Hub>) -> Self {
        let (tx, rx) = mpsc::channel();
        let id = hub.next_id.fetch_add(1, Ordering::Relaxed);
        hub.endpoints.lock().push((id, tx));
        Self { id, hub, rx: Mutex::new(rx) }
    }
}

impl Default for VirtualBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VirtualBus {
    fn drop(&mut self) {
        self.hub.endpoints.lock().retain(|(id, _)| *id != self.id);
    }
}

impl CanBus for VirtualBus {
    fn name(&self) -> &str {
        "virtual"
    }

    fn send(&self, frame: &CanFrame) -> Result<(), TransportError> {
        let mut endpoints = self.hub.endpoints.lock();
        endpoints.retain(|(id, tx)| *id == self.id || tx.send(frame.clone()).is_ok());
        Ok(())
    }

    fn recv(&self, timeout: Duration) -> Result<Option<CanFrame>, TransportError> {
        match self.rx.lock().recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn set_bitrate(&self, bitrate: u32) -> Result<(), TransportError> {
        self.hub.bitrate.store(bitrate, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_reach_other_endpoints_only() {
        let a = VirtualBus::new();
        let b = a.endpoint();
        let c = a.endpoint();

        let frame = CanFrame::new(0x61, &[1, 2, 3]).unwrap();
        a.send(&frame).unwrap();

        assert_eq!(b.recv(Duration::from_millis(100)).unwrap(), Some(frame.clone()));
        assert_eq!(c.recv(Duration::from_millis(100)).unwrap(), Some(frame));
        assert_eq!(a.recv(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn test_bitrate_shared_by_hub() {
        let (a, b) = VirtualBus::pair();
        a.set_bitrate(500_000).unwrap();
        assert_eq!(b.bitrate(), 500_000);
    }
}
