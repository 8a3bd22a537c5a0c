//! Bus Transport.
//!
//! A [`CanBus`] is the raw leaf: send and receive frames. [`BusHandle`] owns
//! one shared bus and is what actuators talk through:
//!
//! - sends from every caller (foreground and monitors) are serialized
//! - one listener thread receives frames, decodes them and dispatches the
//!   telemetry to the [`TelemetryCache`] subscribed for the frame's node
//!
//! The handle is reference counted; the listener stops and is joined when the
//! last clone is dropped.

pub mod virtual_bus;

#[cfg(feature = "socketcan")]
pub mod socketcan;

use crate::telemetry::TelemetryCache;
use odrive_common::consts::BUS_RECV_SLICE;
use odrive_common::error::{SchemaError, TransportError};
use odrive_common::protocol::{decode, CanFrame, NodeAddress};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

pub use virtual_bus::VirtualBus;

/// Raw frame transport.
///
/// Implementations must tolerate `send` and `recv` being called from
/// different threads at the same time.
pub trait CanBus: Send + Sync {
    /// Interface name for logging (e.g. "can0", "virtual").
    fn name(&self) -> &str;

    /// Send one frame.
    fn send(&self, frame: &CanFrame) -> Result<(), TransportError>;

    /// Receive one frame, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` on timeout.
    fn recv(&self, timeout: Duration) -> Result<Option<CanFrame>, TransportError>;

    /// Re-initialise the interface at a new bitrate.
    fn set_bitrate(&self, bitrate: u32) -> Result<(), TransportError>;
}

struct Subscriber {
    id: u64,
    node: Arc<AtomicU8>,
    cache: Arc<TelemetryCache>,
}

type Subscribers = Arc<Mutex<Vec<Subscriber>>>;

struct BusShared {
    bus: Arc<dyn CanBus>,
    send_lock: Mutex<()>,
    subscribers: Subscribers,
    next_id: AtomicU64,
    running: Arc<AtomicBool>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for BusShared {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.listener.lock().take() {
            if handle.join().is_err() {
                warn!("Bus listener for '{}' panicked", self.bus.name());
            }
        }
        debug!("Bus '{}' released", self.bus.name());
    }
}

/// Shared, reference-counted bus connection.
#[derive(Clone)]
pub struct BusHandle {
    shared: Arc<BusShared>,
}

impl BusHandle {
    /// Take ownership of `bus` and start the telemetry listener.
    pub fn open(bus: Arc<dyn CanBus>) -> Self {
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));

        let listener = {
            let bus = Arc::clone(&bus);
            let subscribers = Arc::clone(&subscribers);
            let running = Arc::clone(&running);
            thread::spawn(move || listen(bus, subscribers, running))
        };

        info!("Bus '{}' opened", bus.name());

        Self {
            shared: Arc::new(BusShared {
                bus,
                send_lock: Mutex::new(()),
                subscribers,
                next_id: AtomicU64::new(0),
                running,
                listener: Mutex::new(Some(listener)),
            }),
        }
    }

    /// Interface name.
    pub fn name(&self) -> &str {
        self.shared.bus.name()
    }

    /// Send one frame; concurrent callers are serialized.
    pub fn send(&self, frame: &CanFrame) -> Result<(), TransportError> {
        let _guard = self.shared.send_lock.lock();
        trace!("tx id=0x{:03X} rtr={} data={:02X?}", frame.id(), frame.is_remote(), frame.data());
        self.shared.bus.send(frame)
    }

    /// Re-initialise the bus at `bitrate`.
    ///
    /// Holds the send lock so no frame goes out mid-reset.
    pub fn set_bitrate(&self, bitrate: u32) -> Result<(), TransportError> {
        let _guard = self.shared.send_lock.lock();
        info!("Re-initialising bus '{}' at {} bit/s", self.name(), bitrate);
        self.shared.bus.set_bitrate(bitrate)
    }

    /// Route telemetry for the node currently stored in `node` into `cache`.
    ///
    /// The node is read on every frame, so storing a new address re-routes
    /// without re-subscribing.
    pub fn subscribe(&self, node: Arc<AtomicU8>, cache: Arc<TelemetryCache>) -> Subscription {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.subscribers.lock().push(Subscriber { id, node, cache });
        Subscription { id, subscribers: Arc::clone(&self.shared.subscribers) }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }
}

impl std::fmt::Debug for BusHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusHandle").field("name", &self.name()).finish()
    }
}

/// Unsubscribes on drop.
pub struct Subscription {
    id: u64,
    subscribers: Subscribers,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.subscribers.lock().retain(|s| s.id != self.id);
    }
}

fn listen(bus: Arc<dyn CanBus>, subscribers: Subscribers, running: Arc<AtomicBool>) {
    debug!("Bus listener for '{}' started", bus.name());

    while running.load(Ordering::Acquire) {
        match bus.recv(BUS_RECV_SLICE) {
            Ok(Some(frame)) => dispatch(&frame, &subscribers),
            Ok(None) => {}
            Err(TransportError::Closed) => {
                warn!("Bus '{}' closed, listener exiting", bus.name());
                break;
            }
            Err(e) => {
                debug!("Receive on '{}' failed: {}", bus.name(), e);
                thread::sleep(BUS_RECV_SLICE);
            }
        }
    }

    debug!("Bus listener for '{}' stopped", bus.name());
}

fn dispatch(frame: &CanFrame, subscribers: &Subscribers) {
    // Requests carry no data; they are someone else's poll.
    if frame.is_remote() {
        return;
    }

    let decoded = match decode(frame) {
        Ok(decoded) => decoded,
        Err(SchemaError::UnknownFrame(id)) => {
            trace!("Ignoring unknown frame 0x{:03X}", id);
            return;
        }
        Err(e) => {
            debug!("Dropping undecodable frame 0x{:03X}: {}", frame.id(), e);
            return;
        }
    };

    let node = NodeAddress::from_masked(decoded.node);
    for sub in subscribers.lock().iter() {
        if sub.node.load(Ordering::Acquire) == node.get() {
            sub.cache.apply(&decoded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odrive_common::protocol::{encode, AxisState, Command, Fields};
    use std::collections::BTreeMap;
    use std::time::Instant;

    /// Counts sends or bitrate changes that overlap on the raw bus.
    struct ExclusiveBus {
        inner: VirtualBus,
        busy: AtomicBool,
        overlaps: AtomicU64,
    }

    impl ExclusiveBus {
        fn new(inner: VirtualBus) -> Self {
            Self { inner, busy: AtomicBool::new(false), overlaps: AtomicU64::new(0) }
        }

        fn enter(&self) {
            if self.busy.swap(true, Ordering::AcqRel) {
                self.overlaps.fetch_add(1, Ordering::Relaxed);
            }
        }

        fn leave(&self) {
            self.busy.store(false, Ordering::Release);
        }
    }

    impl CanBus for ExclusiveBus {
        fn name(&self) -> &str {
            "exclusive"
        }

        fn send(&self, frame: &CanFrame) -> Result<(), TransportError> {
            self.enter();
            thread::yield_now();
            let sent = self.inner.send(frame);
            self.leave();
            sent
        }

        fn recv(&self, timeout: Duration) -> Result<Option<CanFrame>, TransportError> {
            self.inner.recv(timeout)
        }

        fn set_bitrate(&self, bitrate: u32) -> Result<(), TransportError> {
            self.enter();
            thread::sleep(Duration::from_micros(200));
            let set = self.inner.set_bitrate(bitrate);
            self.leave();
            set
        }
    }

    fn heartbeat(node: u8, state: AxisState) -> CanFrame {
        let fields = Fields::new()
            .with("Axis_Error", 0.0)
            .with("Axis_State", f64::from(state.code()))
            .with("Procedure_Result", 0.0)
            .with("Trajectory_Done_Flag", 1.0);
        encode(NodeAddress::new(node).unwrap(), Command::Heartbeat, &fields).unwrap()
    }

    #[test]
    fn test_dispatch_routes_by_node() {
        let (ours, theirs) = VirtualBus::pair();
        let handle = BusHandle::open(Arc::new(ours));

        let node3 = Arc::new(TelemetryCache::new());
        let node4 = Arc::new(TelemetryCache::new());
        let _s3 = handle.subscribe(Arc::new(AtomicU8::new(3)), Arc::clone(&node3));
        let _s4 = handle.subscribe(Arc::new(AtomicU8::new(4)), Arc::clone(&node4));

        theirs.send(&heartbeat(3, AxisState::ClosedLoopControl)).unwrap();

        assert!(node3.wait_for(|t| t.heartbeat.is_some(), Duration::from_secs(2)));
        assert_eq!(node3.snapshot().axis_state(), Some(AxisState::ClosedLoopControl));
        assert!(node4.snapshot().heartbeat.is_none());
    }

    #[test]
    fn test_subscription_drop_unsubscribes() {
        let (ours, _theirs) = VirtualBus::pair();
        let handle = BusHandle::open(Arc::new(ours));
        let sub = handle.subscribe(Arc::new(AtomicU8::new(1)), Arc::new(TelemetryCache::new()));
        assert_eq!(handle.subscriber_count(), 1);
        drop(sub);
        assert_eq!(handle.subscriber_count(), 0);
    }

    #[test]
    fn test_listener_joins_on_drop() {
        let (ours, _theirs) = VirtualBus::pair();
        let handle = BusHandle::open(Arc::new(ours));
        let start = Instant::now();
        drop(handle);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_concurrent_sends_are_serialized() {
        const SENDERS: u8 = 8;
        const PER_SENDER: u8 = 50;
        const BITRATE_CHANGES: u32 = 20;

        let (ours, theirs) = VirtualBus::pair();
        let bus = Arc::new(ExclusiveBus::new(ours));
        let handle = BusHandle::open(Arc::clone(&bus) as Arc<dyn CanBus>);

        let mut workers = Vec::new();
        for sender in 0..SENDERS {
            let handle = handle.clone();
            workers.push(thread::spawn(move || {
                for seq in 0..PER_SENDER {
                    let payload = [sender, seq, sender ^ seq, 0xA5, !sender, !seq, sender, seq];
                    let frame = CanFrame::new((u16::from(sender) << 5) | 0x09, &payload).unwrap();
                    handle.send(&frame).unwrap();
                }
            }));
        }
        {
            let handle = handle.clone();
            workers.push(thread::spawn(move || {
                for step in 0..BITRATE_CHANGES {
                    handle.set_bitrate(250_000 + step * 1_000).unwrap();
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        let expected = usize::from(SENDERS) * usize::from(PER_SENDER);
        let mut by_sender: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut received = 0;
        while received < expected && Instant::now() < deadline {
            let Some(frame) = theirs.recv(Duration::from_millis(50)).unwrap() else {
                continue;
            };
            let d = frame.data();
            assert_eq!(d.len(), 8);
            assert_eq!(frame.node(), d[0]);
            assert_eq!(d[2], d[0] ^ d[1]);
            assert_eq!([d[3], d[4], d[5], d[6], d[7]], [0xA5, !d[0], !d[1], d[0], d[1]]);
            by_sender.entry(d[0]).or_default().push(d[1]);
            received += 1;
        }

        assert_eq!(received, expected);
        let in_order: Vec<u8> = (0..PER_SENDER).collect();
        for sender in 0..SENDERS {
            assert_eq!(by_sender.get(&sender), Some(&in_order), "sender {sender}");
        }
        assert_eq!(bus.overlaps.load(Ordering::Relaxed), 0);
        assert_eq!(bus.inner.bitrate(), 250_000 + (BITRATE_CHANGES - 1) * 1_000);
    }
}
