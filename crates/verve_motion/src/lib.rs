//! Physics-based motion engine
//!
//! Springs, not timelines: every animation in this crate is a damped spring
//! integrated per frame, so values can be retargeted or flung mid-flight and
//! the motion stays continuous. The crate is host-agnostic; it owns no event
//! loop and spawns no threads. The embedding UI drives a
//! [`MotionScheduler`] from its frame source and reads values back each
//! tick.
//!
//! # Features
//!
//! - **Springs**: configurable stiffness, damping, mass, and settle
//!   precision, with presets ([`SpringConfig::gentle`],
//!   [`SpringConfig::bouncy`], [`SpringConfig::stiff`],
//!   [`SpringConfig::snappy`])
//! - **Composites**: named channels retargeted atomically and settled as a
//!   group ([`MotionGroup`])
//! - **Pointer interaction**: attract, repel, and magnetic-snap bindings
//!   with sampled release velocity ([`PointerBinding`])
//! - **Collision**: impulse-resolved circles and rects for overlapping
//!   elements ([`WorldHandle`])
//! - **Sequences**: dependency-ordered steps with stagger and a parallelism
//!   cap ([`SequenceBuilder`])
//! - **Reduced motion**: a host-settable gate that compresses every
//!   animation to its end state while keeping callback order
//!   ([`ReducedMotion`])
//! - **Deterministic ticks**: drive the scheduler from a [`ManualClock`] and
//!   identical inputs produce identical frames
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use verve_motion::{ManualClock, MotionScheduler, MotionValue, SpringConfig};
//!
//! let scheduler = MotionScheduler::new();
//! let handle = scheduler.handle();
//! let mut clock = ManualClock::new(scheduler.handle());
//!
//! let mut opacity = MotionValue::new(&handle, SpringConfig::snappy(), 0.0)?;
//! opacity.set_target(1.0);
//!
//! while scheduler.has_active() {
//!     clock.advance(Duration::from_millis(16));
//! }
//! assert_eq!(opacity.get(), 1.0);
//! # Ok::<(), verve_motion::MotionError>(())
//! ```

pub mod clock;
pub mod collision;
pub mod composite;
pub mod error;
pub mod gate;
pub mod interaction;
pub mod scheduler;
pub mod sequence;
pub mod spring;
pub mod value;

pub use clock::ManualClock;
pub use collision::{Body, BodyId, CollisionConfig, CollisionWorld, Shape};
pub use composite::{ChannelSpec, Composite, SettlePolicy};
pub use error::{MotionError, Result};
pub use gate::MotionGate;
pub use interaction::{InteractionConfig, InteractionMode, PointerBinding};
pub use scheduler::{
    Driver, Hook, MotionScheduler, SchedulerHandle, Tick, UnitHooks, UnitId, MAX_FRAME_DELTA,
};
pub use sequence::{
    Sequence, SequenceBuilder, SequenceStatus, StepFn, StepOutcome, StepStatus, StepWork,
};
pub use spring::{ChannelStatus, Spring, SpringConfig};
pub use value::{MotionGroup, MotionValue, SequenceHandle, WorldHandle};

pub use verve_core::{Rect, ReducedMotion, Vec2};
