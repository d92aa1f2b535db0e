//! Manual clock
//!
//! Drives a scheduler with synthetic timestamps instead of wall-clock time.
//! Time only moves in whole frames: partial frames accumulate and carry into
//! the next advance, so two runs fed the same total duration tick at
//! identical timestamps no matter how the advances were chunked. Built for
//! tests and headless hosts.

use std::time::Duration;

use crate::scheduler::SchedulerHandle;

/// Default frame interval, one sixtieth of a second in whole nanoseconds
const DEFAULT_FRAME: Duration = Duration::from_nanos(1_000_000_000 / 60);

/// A frame-stepped clock over a [`SchedulerHandle`]
///
/// ```
/// use std::time::Duration;
/// use verve_motion::{ManualClock, MotionScheduler, Spring, SpringConfig};
///
/// let scheduler = MotionScheduler::new();
/// let handle = scheduler.handle();
/// let mut clock = ManualClock::new(scheduler.handle());
///
/// let spring = Spring::new(SpringConfig::stiff(), 0.0)?;
/// let id = handle.register_spring(spring).unwrap();
/// handle.set_spring_target(id, 100.0);
///
/// let ticks = clock.advance(Duration::from_millis(100));
/// assert_eq!(ticks, 6);
/// assert!(handle.spring_position(id).unwrap() > 0.0);
/// # Ok::<(), verve_motion::MotionError>(())
/// ```
pub struct ManualClock {
    handle: SchedulerHandle,
    frame: Duration,
    /// Timestamp of the last emitted tick
    now: Duration,
    /// Sub-frame time carried to the next advance
    pending: Duration,
}

impl ManualClock {
    /// Clock ticking at 60 frames per second
    pub fn new(handle: SchedulerHandle) -> Self {
        Self {
            handle,
            frame: DEFAULT_FRAME,
            now: Duration::ZERO,
            pending: Duration::ZERO,
        }
    }

    /// Clock ticking at an explicit frame rate
    pub fn with_frame_rate(handle: SchedulerHandle, frames_per_second: u32) -> Self {
        let fps = frames_per_second.max(1);
        Self {
            handle,
            frame: Duration::from_secs(1) / fps,
            now: Duration::ZERO,
            pending: Duration::ZERO,
        }
    }

    /// Timestamp of the last tick emitted
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn frame(&self) -> Duration {
        self.frame
    }

    /// Add time to the clock, ticking once per whole frame elapsed
    ///
    /// Returns how many ticks fired. Leftover time below one frame carries
    /// over.
    pub fn advance(&mut self, delta: Duration) -> usize {
        self.pending += delta;
        let mut ticks = 0;
        while self.pending >= self.frame {
            self.pending -= self.frame;
            self.now += self.frame;
            self.handle.tick_at(self.now);
            ticks += 1;
        }
        ticks
    }

    /// Tick exactly `frames` whole frames
    pub fn advance_frames(&mut self, frames: u32) {
        for _ in 0..frames {
            self.now += self.frame;
            self.handle.tick_at(self.now);
        }
    }
}
