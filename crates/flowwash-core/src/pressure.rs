//! Pressure safety monitor.
//!
//! A daemon thread samples the pressure sensor at ~100 Hz for the
//! supervisor's whole lifetime. It serves two masters:
//!
//! - **Safety**: any sample above the configured ceiling halts the
//!   instrument (pump stop, all solenoids de-energized, mixer stop) and
//!   latches a non-maskable [`AbortFlag`] that every foreground flowpath
//!   operation checks at entry and inside its polling loops.
//! - **Measurement**: on request it buffers one time window of samples
//!   and hands back their mean. This is the only pressure API the
//!   leak-check routines use.
//!
//! The monitor never takes the flowpath lock and never mutates the
//! flowpath except via the halt path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flowwash_hardware::PressureSensor;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::supervisor::HaltHandle;
use crate::{Result, SupervisorError};

/// Interval between pressure samples (~100 Hz).
const SAMPLE_PERIOD: Duration = Duration::from_millis(10);

/// Latched, non-maskable abort signal raised by the pressure monitor.
///
/// Once tripped, every flowpath operation fails with
/// [`SupervisorError::Aborted`] until an operator
/// [`reset`](crate::Supervisor::reset) acknowledges the halt.
#[derive(Clone, Default)]
pub struct AbortFlag {
    inner: Arc<AbortInner>,
}

#[derive(Default)]
struct AbortInner {
    tripped: AtomicBool,
    /// Pressure at the moment of the trip; meaningful only while tripped.
    psig_bits: AtomicU64,
}

impl AbortFlag {
    pub(crate) fn trip(&self, psig: f64) {
        self.inner.psig_bits.store(psig.to_bits(), Ordering::SeqCst);
        self.inner.tripped.store(true, Ordering::SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.inner.tripped.load(Ordering::SeqCst)
    }

    /// The pressure that caused the trip, if tripped.
    pub fn trip_pressure_psig(&self) -> Option<f64> {
        if !self.is_tripped() {
            return None;
        }
        Some(f64::from_bits(self.inner.psig_bits.load(Ordering::SeqCst)))
    }

    pub(crate) fn clear(&self) {
        self.inner.tripped.store(false, Ordering::SeqCst);
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_tripped() {
            return Err(SupervisorError::Aborted);
        }
        Ok(())
    }
}

struct ActiveWindow {
    samples: Vec<f64>,
    deadline: Instant,
}

struct WindowSlot {
    active: Option<ActiveWindow>,
    result: Option<f64>,
}

impl WindowSlot {
    const fn new() -> Self {
        Self {
            active: None,
            result: None,
        }
    }
}

struct MonitorShared {
    live_psig_bits: AtomicU64,
    running: AtomicBool,
    window: Mutex<WindowSlot>,
    window_done: Condvar,
}

/// Handle to the sampling thread. Dropping it stops the thread, which is
/// why the supervisor owns it: the monitor outlives every foreground
/// operation by construction.
pub(crate) struct PressureMonitor {
    shared: Arc<MonitorShared>,
    handle: Option<JoinHandle<()>>,
}

impl PressureMonitor {
    /// Spawn the sampling thread.
    pub(crate) fn start(
        sensor: Arc<dyn PressureSensor>,
        ceiling_psig: f64,
        halt: HaltHandle,
        abort: AbortFlag,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(MonitorShared {
            live_psig_bits: AtomicU64::new(0f64.to_bits()),
            running: AtomicBool::new(true),
            window: Mutex::new(WindowSlot::new()),
            window_done: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("pressure_monitor".into())
            .spawn(move || monitor_loop(thread_shared, sensor, ceiling_psig, halt, abort))?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Most recent sample.
    pub(crate) fn live_psig(&self) -> f64 {
        f64::from_bits(self.shared.live_psig_bits.load(Ordering::SeqCst))
    }

    /// Collect one window of samples and return their mean.
    ///
    /// Callers are serialized by the flowpath lock, so at most one window
    /// is ever in flight.
    pub(crate) fn average_psig(&self, duration_s: f64) -> Result<f64> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(SupervisorError::Internal(
                "pressure monitor is not running".into(),
            ));
        }
        let duration = Duration::from_secs_f64(duration_s);
        let mut slot = self.shared.window.lock();
        slot.result = None;
        slot.active = Some(ActiveWindow {
            samples: Vec::new(),
            deadline: Instant::now() + duration,
        });
        // The thread finishes the window one sample past the deadline;
        // anything much slower means it died.
        let patience = duration + Duration::from_secs(2);
        loop {
            if let Some(mean) = slot.result.take() {
                return Ok(mean);
            }
            if self
                .shared
                .window_done
                .wait_for(&mut slot, patience)
                .timed_out()
            {
                return Err(SupervisorError::Internal(
                    "pressure sample window never completed".into(),
                ));
            }
        }
    }
}

impl Drop for PressureMonitor {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn monitor_loop(
    shared: Arc<MonitorShared>,
    sensor: Arc<dyn PressureSensor>,
    ceiling_psig: f64,
    halt: HaltHandle,
    abort: AbortFlag,
) {
    debug!("pressure monitor running");
    let mut above_ceiling = false;
    while shared.running.load(Ordering::SeqCst) {
        match sensor.pressure_psig() {
            Ok(psig) => {
                shared.live_psig_bits.store(psig.to_bits(), Ordering::SeqCst);
                {
                    let mut slot = shared.window.lock();
                    if let Some(window) = slot.active.as_mut() {
                        window.samples.push(psig);
                        if Instant::now() >= window.deadline {
                            let mean =
                                window.samples.iter().sum::<f64>() / window.samples.len() as f64;
                            slot.active = None;
                            slot.result = Some(mean);
                            shared.window_done.notify_all();
                        }
                    }
                }
                if psig > ceiling_psig {
                    if !above_ceiling {
                        above_ceiling = true;
                        error!(
                            psig,
                            ceiling_psig, "Jam detected!! Aborting syringe movement."
                        );
                        halt.halt();
                        abort.trip(psig);
                    }
                } else {
                    above_ceiling = false;
                }
            }
            Err(err) => warn!(%err, "pressure sample failed"),
        }
        thread::sleep(SAMPLE_PERIOD);
    }
    debug!("pressure monitor stopped");
}
