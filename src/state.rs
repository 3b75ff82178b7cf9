use crossbeam::atomic::AtomicCell;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Process-wide pipeline flags and counters, shared by `Arc`
#[derive(Debug)]
pub struct PipelineState {
    active_cameras: AtomicUsize,
    system_ready: AtomicBool,
    all_done: AtomicBool,
    stop: AtomicBool,
    started_at: Instant,
    threshold: Threshold,
    latch: Arc<StartupLatch>,
}

impl PipelineState {
    pub fn new(camera_count: usize, threshold: f64) -> Arc<Self> {
        Self::started_at(camera_count, threshold, Instant::now())
    }

    /// State whose clock starts at `started_at`, usually process start
    pub fn started_at(camera_count: usize, threshold: f64, started_at: Instant) -> Arc<Self> {
        Arc::new(Self {
            active_cameras: AtomicUsize::new(camera_count),
            system_ready: AtomicBool::new(false),
            all_done: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            started_at,
            threshold: Threshold::new(threshold),
            latch: Arc::new(StartupLatch::new(camera_count)),
        })
    }

    /// Number of cameras currently delivering frames
    pub fn active_cameras(&self) -> usize {
        self.active_cameras.load(Ordering::Acquire)
    }

    /// Mark one camera as gone; returns the number still active
    ///
    /// The last camera to leave raises the all-done flag.
    pub fn camera_finished(&self) -> usize {
        let previous = self
            .active_cameras
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        let remaining = previous.saturating_sub(1);
        if remaining == 0 {
            info!("All cameras finished");
            self.all_done.store(true, Ordering::Release);
        } else {
            debug!("Camera finished, {} still active", remaining);
        }
        remaining
    }

    pub fn is_system_ready(&self) -> bool {
        self.system_ready.load(Ordering::Acquire)
    }

    pub fn set_system_ready(&self) {
        if !self.system_ready.swap(true, Ordering::AcqRel) {
            info!("System ready, triggers enabled");
        }
    }

    pub fn all_done(&self) -> bool {
        self.all_done.load(Ordering::Acquire)
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            info!("Pipeline stop requested");
        }
    }

    /// Time since the state's clock started
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Instant the state's clock started
    pub fn start_instant(&self) -> Instant {
        self.started_at
    }

    pub fn threshold(&self) -> &Threshold {
        &self.threshold
    }

    pub fn latch(&self) -> &Arc<StartupLatch> {
        &self.latch
    }
}

/// Live-tunable acceptance threshold
#[derive(Debug)]
pub struct Threshold(AtomicCell<f64>);

impl Threshold {
    pub fn new(value: f64) -> Self {
        Self(AtomicCell::new(value))
    }

    pub fn get(&self) -> f64 {
        self.0.load()
    }

    /// Replace the threshold, returning the previous value
    pub fn set(&self, value: f64) -> f64 {
        self.0.swap(value)
    }
}

/// Countdown latch used to wait for camera bring-up
///
/// Each participant holds one `LatchGuard`; dropping it counts down, so
/// every exit path (success, open failure, panic) arrives exactly once.
#[derive(Debug)]
pub struct StartupLatch {
    remaining: Mutex<usize>,
    released: Condvar,
}

impl StartupLatch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            released: Condvar::new(),
        }
    }

    /// Token that arrives at the latch when dropped
    pub fn guard(self: &Arc<Self>) -> LatchGuard {
        LatchGuard {
            latch: Arc::clone(self),
            arrived: false,
        }
    }

    pub fn remaining(&self) -> usize {
        *self.remaining.lock()
    }

    fn arrive(&self) {
        let mut remaining = self.remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
            if *remaining == 0 {
                self.released.notify_all();
            }
        }
    }

    /// Wait until every participant arrived; `false` on timeout
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            if self.released.wait_until(&mut remaining, deadline).timed_out() {
                return *remaining == 0;
            }
        }
        true
    }
}

/// Arrival token for a `StartupLatch`
#[derive(Debug)]
pub struct LatchGuard {
    latch: Arc<StartupLatch>,
    arrived: bool,
}

impl LatchGuard {
    /// Arrive now instead of at drop
    pub fn arrive(mut self) {
        self.arrive_once();
    }

    fn arrive_once(&mut self) {
        if !self.arrived {
            self.arrived = true;
            self.latch.arrive();
        }
    }
}

impl Drop for LatchGuard {
    fn drop(&mut self) {
        self.arrive_once();
    }
}
