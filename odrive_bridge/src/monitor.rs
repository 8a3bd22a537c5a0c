//! Background monitors.
//!
//! - [`GoalTracker`] - stops the axis when the active goal is reached
//! - [`FaultMonitor`] - stops the axis and clears faults when telemetry
//!   reports nonzero error or disarm codes
//!
//! Both tick on the same interval in their own thread. A tick never waits on
//! the bus: no telemetry yet is a no-op. Transport failures are logged and the
//! loop carries on. [`Monitors`] owns the threads and the [`StopSignal`] they
//! observe; dropping it joins them.

use crate::planner::MotionPlanner;
use crate::telemetry::Telemetry;
use odrive_common::consts::GOAL_TOLERANCE;
use odrive_common::protocol::{AxisState, FaultCode};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Shutdown flag that interrupts interval sleeps.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    /// Unsignalled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal every waiter to exit.
    pub fn stop(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }

    /// Whether [`stop`](Self::stop) was called.
    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep for `interval` or until stopped. Returns `true` if stopped.
    pub fn wait(&self, interval: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            // Spurious wakeups just shorten one tick.
            self.wake.wait_for(&mut stopped, interval);
        }
        *stopped
    }
}

/// Watches the active goal for arrival.
#[derive(Clone)]
pub struct GoalTracker {
    planner: Arc<MotionPlanner>,
}

impl GoalTracker {
    /// Tracker over `planner`'s goal.
    pub fn new(planner: Arc<MotionPlanner>) -> Self {
        Self { planner }
    }

    /// One check. Returns whether the axis was stopped.
    pub fn tick(&self) -> bool {
        self.planner.stop_if_arrived(GOAL_TOLERANCE)
    }
}

/// Surfaces and self-heals actuator faults.
#[derive(Clone)]
pub struct FaultMonitor {
    planner: Arc<MotionPlanner>,
}

impl FaultMonitor {
    /// Monitor over `planner`'s actuator.
    pub fn new(planner: Arc<MotionPlanner>) -> Self {
        Self { planner }
    }

    /// One check. Returns the fault handled, if any.
    pub fn tick(&self) -> Option<FaultCode> {
        let actuator = self.planner.actuator();
        let telemetry = actuator.telemetry();
        let fault = telemetry.fault();

        if !fault.is_empty() {
            self.handle(&telemetry, fault);
        }

        // Requested after any clear, so the answers reflect it.
        if let Err(e) = actuator.refresh() {
            debug!("{}: telemetry request failed: {}", actuator.name(), e);
        }

        (!fault.is_empty()).then_some(fault)
    }

    fn handle(&self, telemetry: &Telemetry, fault: FaultCode) {
        let actuator = self.planner.actuator();

        if let Err(e) = self.planner.stop() {
            warn!("{}: stop on fault failed: {}", actuator.name(), e);
        }

        let axis_error = telemetry.heartbeat.map_or(0, |hb| hb.axis_error);
        let (active, disarm) = telemetry
            .errors
            .map_or((0, 0), |r| (r.active_errors, r.disarm_reason));
        error!(
            "{}: actuator fault 0x{:08X} [{}] (axis_error=0x{:08X} active=0x{:08X} disarm=0x{:08X} state={})",
            actuator.name(),
            fault.bits(),
            fault.symbolic(),
            axis_error,
            active,
            disarm,
            telemetry.axis_state().unwrap_or(AxisState::Undefined)
        );

        match actuator.clear_errors() {
            Ok(()) => info!("{}: errors cleared", actuator.name()),
            Err(e) => warn!("{}: clear errors failed: {}", actuator.name(), e),
        }
    }
}

/// Running monitor threads.
pub struct Monitors {
    signal: Arc<StopSignal>,
    threads: Vec<JoinHandle<()>>,
}

impl Monitors {
    /// Start both monitors on `interval`.
    pub fn spawn(planner: &Arc<MotionPlanner>, interval: Duration) -> Self {
        let signal = Arc::new(StopSignal::new());
        let goal_tracker = GoalTracker::new(Arc::clone(planner));
        let fault_monitor = FaultMonitor::new(Arc::clone(planner));

        let threads = vec![
            spawn_loop("goal tracker", interval, Arc::clone(&signal), move || {
                goal_tracker.tick();
            }),
            spawn_loop("fault monitor", interval, Arc::clone(&signal), move || {
                fault_monitor.tick();
            }),
        ];

        info!("Monitors started ({:?} interval)", interval);
        Self { signal, threads }
    }

    /// Signal both loops and join them.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.signal.stop();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("Monitor thread panicked");
            }
        }
    }
}

impl Drop for Monitors {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn spawn_loop(
    name: &'static str,
    interval: Duration,
    signal: Arc<StopSignal>,
    mut tick: impl FnMut() + Send + 'static,
) -> JoinHandle<()> {
    thread::spawn(move || {
        debug!("{} started", name);
        while !signal.wait(interval) {
            tick();
        }
        debug!("{} stopped", name);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_stop_signal_interrupts_wait() {
        let signal = Arc::new(StopSignal::new());
        let waiter = Arc::clone(&signal);
        let start = Instant::now();
        let handle = thread::spawn(move || waiter.wait(Duration::from_secs(30)));

        thread::sleep(Duration::from_millis(20));
        signal.stop();

        assert!(handle.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(signal.is_stopped());
    }

    #[test]
    fn test_stop_signal_times_out() {
        let signal = StopSignal::new();
        assert!(!signal.wait(Duration::from_millis(10)));
    }
}
