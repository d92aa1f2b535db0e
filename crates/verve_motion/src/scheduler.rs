//! Motion scheduler
//!
//! Owns every active animation unit and fans one tick out to all of them.
//! The host drives ticks: either from its frame source via [`tick`]
//! (wall-clock timing) or from a [`ManualClock`](crate::clock::ManualClock)
//! via [`tick_at`] (explicit timestamps, deterministic). Units are usually
//! registered implicitly through the wrapper types:
//! - `MotionValue` - one spring-driven scalar
//! - `MotionGroup` - a composite of named channels
//! - `SequenceHandle` - an orchestration sequence
//! - `WorldHandle` - a collision world
//!
//! [`tick`]: MotionScheduler::tick
//! [`tick_at`]: MotionScheduler::tick_at

use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::mem;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::collision::{Body, BodyId, CollisionWorld};
use crate::composite::Composite;
use crate::error::Result;
use crate::gate::{self, MotionGate};
use crate::sequence::{Sequence, SequenceStatus, StepStatus};
use crate::spring::Spring;
use verve_core::{ReducedMotion, Vec2};

/// Largest delta a unit will ever be stepped with, in seconds
///
/// A stalled host (breakpoint, long GC in the embedding runtime, laptop lid)
/// produces one clamped tick instead of a huge integration step, trading a
/// momentary slowdown for solver stability.
pub const MAX_FRAME_DELTA: f32 = 1.0 / 30.0;

new_key_type! {
    /// Handle to a unit registered with the scheduler
    pub struct UnitId;
}

/// Timing snapshot shared by every unit stepped in one tick
#[derive(Clone, Copy, Debug)]
pub struct Tick {
    /// Engine time at this tick, monotonically non-decreasing
    pub elapsed: Duration,
    /// Seconds since the previous tick, clamped to [`MAX_FRAME_DELTA`]
    pub dt: f32,
    /// Whether reduced motion was active when the tick began
    pub reduced: bool,
}

/// Lifecycle callback attached to a unit
pub type Hook = Arc<dyn Fn() + Send + Sync>;

/// Callback that wakes the host's frame source when an idle scheduler
/// becomes active again
pub type WakeCallback = Arc<dyn Fn() + Send + Sync>;

/// Scripted unit stepped like any other animation kind
///
/// The closure runs with the scheduler lock released, so it may call back
/// into the scheduler freely: read values, retarget, register and remove
/// units. Driving the clock from inside a step is ignored.
pub type TickFn = Box<dyn FnMut(Tick) -> bool + Send>;

/// Lifecycle hooks observed by a unit's owner
///
/// `on_start` fires when the unit begins animating, `on_update` after every
/// tick that stepped it, `on_complete` when it settles or finishes, and
/// `on_cancel` exactly once if it is removed or cancelled mid-flight.
#[derive(Clone, Default)]
pub struct UnitHooks {
    pub on_start: Option<Hook>,
    pub on_update: Option<Hook>,
    pub on_complete: Option<Hook>,
    pub on_cancel: Option<Hook>,
}

/// The closed set of animation kinds the scheduler can drive
///
/// Every kind shares the same capability: step under a tick, report whether
/// it is still active. Dispatch is a plain match; adding a kind means
/// touching this enum.
pub enum Driver {
    Spring(Spring),
    Composite(Composite),
    World(CollisionWorld),
    Sequence(Sequence),
    Callback { f: TickFn, active: bool },
}

impl Driver {
    fn step(&mut self, tick: Tick) {
        match self {
            Driver::Spring(spring) => {
                if tick.reduced {
                    let target = spring.target();
                    spring.snap_to(target);
                } else {
                    spring.step(tick.dt);
                }
            }
            Driver::Composite(composite) => {
                if tick.reduced {
                    composite.snap_to_targets();
                } else {
                    composite.step(tick.dt);
                }
            }
            Driver::World(world) => {
                let restitution =
                    gate::effective_restitution(tick.reduced, world.config().restitution);
                world.step_with_restitution(tick.dt, restitution);
            }
            Driver::Sequence(sequence) => sequence.tick(tick),
            Driver::Callback { f, active } => {
                if *active {
                    *active = f(tick);
                }
            }
        }
    }

    fn is_active(&self) -> bool {
        match self {
            Driver::Spring(spring) => spring.is_animating(),
            Driver::Composite(composite) => composite.is_animating(),
            Driver::World(world) => !world.is_settled(),
            Driver::Sequence(sequence) => sequence.is_active(),
            Driver::Callback { active, .. } => *active,
        }
    }

    fn drain_events(&mut self, sink: &mut dyn FnMut(Hook)) {
        if let Driver::Sequence(sequence) = self {
            sequence.drain_events(sink);
        }
    }

    /// Kinds whose step runs user-supplied closures
    fn is_scripted(&self) -> bool {
        matches!(self, Driver::Sequence(_) | Driver::Callback { .. })
    }

    /// Inert stand-in occupying a unit's slot while its real driver is
    /// stepped outside the lock
    fn parked() -> Self {
        Driver::Callback {
            f: Box::new(|_| false),
            active: false,
        }
    }
}

struct ScheduledUnit {
    driver: Driver,
    hooks: UnitHooks,
}

/// Internal state of the motion scheduler
struct SchedulerInner {
    units: SlotMap<UnitId, ScheduledUnit>,
    /// Active units in registration order. Slotmap iteration follows slot
    /// order, which diverges from registration order once slots are reused,
    /// so fan-out walks this list instead.
    order: Vec<UnitId>,
    /// Units cancelled since the last tick began; their queued lifecycle
    /// events are dropped before dispatch.
    suppressed: rustc_hash::FxHashSet<UnitId>,
    gate: MotionGate,
    /// Engine time, advanced by every tick
    elapsed: Duration,
    /// Wall-clock anchor for the real-time tick path
    last_instant: Option<Instant>,
    wake_callback: Option<WakeCallback>,
    /// Set while a tick walks the active list; re-entrant ticks are ignored
    ticking: bool,
}

/// Effects collected under the lock, fired after it is released
#[derive(Default)]
struct Activation {
    on_start: Option<Hook>,
    wake: Option<WakeCallback>,
}

impl Activation {
    fn fire(self) {
        if let Some(hook) = self.on_start {
            hook();
        }
        if let Some(wake) = self.wake {
            wake();
        }
    }
}

impl SchedulerInner {
    fn new() -> Self {
        Self {
            units: SlotMap::with_key(),
            order: Vec::new(),
            suppressed: rustc_hash::FxHashSet::default(),
            gate: MotionGate::disabled(),
            elapsed: Duration::ZERO,
            last_instant: None,
            wake_callback: None,
            ticking: false,
        }
    }

    /// Put a unit on the active list if it has work to do
    ///
    /// Re-activation appends, so a unit that settles and is later retargeted
    /// takes a fresh registration position.
    fn activate(&mut self, id: UnitId) -> Activation {
        let Some(unit) = self.units.get(id) else {
            return Activation::default();
        };
        if !unit.driver.is_active() || self.order.contains(&id) {
            return Activation::default();
        }
        let was_idle = self.order.is_empty();
        self.order.push(id);
        Activation {
            on_start: unit.hooks.on_start.clone(),
            wake: if was_idle {
                self.wake_callback.clone()
            } else {
                None
            },
        }
    }

    fn insert(&mut self, driver: Driver) -> (UnitId, Activation) {
        let id = self.units.insert(ScheduledUnit {
            driver,
            hooks: UnitHooks::default(),
        });
        let activation = self.activate(id);
        (id, activation)
    }

    fn spring(&self, id: UnitId) -> Option<&Spring> {
        match self.units.get(id) {
            Some(ScheduledUnit {
                driver: Driver::Spring(spring),
                ..
            }) => Some(spring),
            _ => None,
        }
    }

    fn spring_mut(&mut self, id: UnitId) -> Option<&mut Spring> {
        match self.units.get_mut(id) {
            Some(ScheduledUnit {
                driver: Driver::Spring(spring),
                ..
            }) => Some(spring),
            _ => None,
        }
    }

    fn composite(&self, id: UnitId) -> Option<&Composite> {
        match self.units.get(id) {
            Some(ScheduledUnit {
                driver: Driver::Composite(composite),
                ..
            }) => Some(composite),
            _ => None,
        }
    }

    fn composite_mut(&mut self, id: UnitId) -> Option<&mut Composite> {
        match self.units.get_mut(id) {
            Some(ScheduledUnit {
                driver: Driver::Composite(composite),
                ..
            }) => Some(composite),
            _ => None,
        }
    }

    fn world(&self, id: UnitId) -> Option<&CollisionWorld> {
        match self.units.get(id) {
            Some(ScheduledUnit {
                driver: Driver::World(world),
                ..
            }) => Some(world),
            _ => None,
        }
    }

    fn world_mut(&mut self, id: UnitId) -> Option<&mut CollisionWorld> {
        match self.units.get_mut(id) {
            Some(ScheduledUnit {
                driver: Driver::World(world),
                ..
            }) => Some(world),
            _ => None,
        }
    }

    fn sequence(&self, id: UnitId) -> Option<&Sequence> {
        match self.units.get(id) {
            Some(ScheduledUnit {
                driver: Driver::Sequence(sequence),
                ..
            }) => Some(sequence),
            _ => None,
        }
    }

    fn sequence_mut(&mut self, id: UnitId) -> Option<&mut Sequence> {
        match self.units.get_mut(id) {
            Some(ScheduledUnit {
                driver: Driver::Sequence(sequence),
                ..
            }) => Some(sequence),
            _ => None,
        }
    }
}

/// Run one tick against the shared state
///
/// Steps every unit that was active when the tick began, in registration
/// order, under one shared timestamp and clamped delta. Engine drivers step
/// under the lock; scripted drivers are lifted out of their slot and stepped
/// with the lock released, so their closures can call back into the
/// scheduler. Lifecycle hooks are collected during the walk and fired at the
/// end; hooks for a unit cancelled earlier in the same dispatch are dropped.
fn run_tick(inner: &Arc<Mutex<SchedulerInner>>, timestamp: Duration) -> bool {
    let mut events: SmallVec<[(UnitId, Hook); 8]> = SmallVec::new();

    let (tick, active) = {
        let mut guard = inner.lock().unwrap();
        let guard = &mut *guard;

        // A closure driving the clock from inside its own step would fan
        // out twice and wipe the suppression set mid-walk
        if guard.ticking {
            tracing::warn!("tick re-entered from a unit step, ignoring");
            return !guard.order.is_empty();
        }
        guard.ticking = true;

        if timestamp < guard.elapsed {
            tracing::warn!(
                ?timestamp,
                elapsed = ?guard.elapsed,
                "tick timestamp went backwards, treating as zero delta"
            );
        }
        let raw = timestamp.saturating_sub(guard.elapsed).as_secs_f32();
        let dt = raw.min(MAX_FRAME_DELTA);
        if raw > MAX_FRAME_DELTA {
            tracing::trace!(raw, clamped = MAX_FRAME_DELTA, "frame delta clamped");
        }
        guard.elapsed = guard.elapsed.max(timestamp);
        guard.suppressed.clear();

        let tick = Tick {
            elapsed: guard.elapsed,
            dt,
            reduced: guard.gate.is_active(),
        };
        let active: SmallVec<[UnitId; 16]> = guard.order.iter().copied().collect();
        (tick, active)
    };

    for id in active {
        let mut guard = inner.lock().unwrap();
        // Cancellation check: a unit removed by an earlier closure or call
        // is skipped without being stepped
        let Some(unit) = guard.units.get_mut(id) else {
            guard.order.retain(|u| *u != id);
            continue;
        };
        if unit.driver.is_scripted() {
            // Lift the driver out and step it unlocked; re-entrant handle
            // calls land on the parked stand-in
            let on_cancel = unit.hooks.on_cancel.clone();
            let mut driver = mem::replace(&mut unit.driver, Driver::parked());
            drop(guard);
            driver.step(tick);
            guard = inner.lock().unwrap();
            match guard.units.get_mut(id) {
                Some(unit) => unit.driver = driver,
                None => {
                    // The closure removed its own unit. remove_unit saw the
                    // inactive stand-in and skipped on_cancel; honor it here
                    drop(guard);
                    if driver.is_active() {
                        if let Some(hook) = on_cancel {
                            hook();
                        }
                    }
                    continue;
                }
            }
        } else {
            unit.driver.step(tick);
        }

        let state = &mut *guard;
        let Some(unit) = state.units.get_mut(id) else {
            continue;
        };
        unit.driver.drain_events(&mut |hook| events.push((id, hook)));
        if let Some(hook) = &unit.hooks.on_update {
            events.push((id, Arc::clone(hook)));
        }
        if !unit.driver.is_active() {
            state.order.retain(|u| *u != id);
            if let Some(hook) = &unit.hooks.on_complete {
                events.push((id, Arc::clone(hook)));
            }
        }
    }

    let has_active = {
        let mut guard = inner.lock().unwrap();
        guard.ticking = false;
        !guard.order.is_empty()
    };

    for (id, hook) in events {
        let cancelled = inner.lock().unwrap().suppressed.contains(&id);
        if !cancelled {
            hook();
        }
    }
    has_active
}

/// The scheduler that owns and ticks all active animation units
///
/// Created explicitly and shared via [`SchedulerHandle`]; there is no
/// implicit global instance. The scheduler never spawns threads: the host
/// calls [`tick`](Self::tick) from its frame loop and may stop calling it
/// whenever [`has_active`](Self::has_active) reports false, re-arming on the
/// wake callback.
pub struct MotionScheduler {
    inner: Arc<Mutex<SchedulerInner>>,
}

impl MotionScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SchedulerInner::new())),
        }
    }

    /// Scheduler gated by the host's reduced-motion signal
    pub fn with_reduced_motion(signal: ReducedMotion) -> Self {
        let scheduler = Self::new();
        scheduler.set_reduced_motion(signal);
        scheduler
    }

    /// Attach or replace the reduced-motion signal
    pub fn set_reduced_motion(&self, signal: ReducedMotion) {
        self.inner.lock().unwrap().gate = MotionGate::new(signal);
    }

    /// Set a callback invoked when an idle scheduler gains its first active
    /// unit, so the host can re-acquire its frame source
    pub fn set_wake_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.lock().unwrap().wake_callback = Some(Arc::new(callback));
    }

    /// Get a weak handle for registering and driving units
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Tick using wall-clock time
    ///
    /// Returns true if any unit is still active and another tick is needed.
    pub fn tick(&self) -> bool {
        let timestamp = {
            let mut guard = self.inner.lock().unwrap();
            let now = Instant::now();
            let dt = guard
                .last_instant
                .map(|last| now.duration_since(last))
                .unwrap_or(Duration::ZERO);
            guard.last_instant = Some(now);
            guard.elapsed + dt
        };
        run_tick(&self.inner, timestamp)
    }

    /// Tick at an explicit timestamp (deterministic path)
    pub fn tick_at(&self, timestamp: Duration) -> bool {
        run_tick(&self.inner, timestamp)
    }

    /// Check if any unit still needs ticks
    pub fn has_active(&self) -> bool {
        !self.inner.lock().unwrap().order.is_empty()
    }

    /// Number of units the scheduler holds, active or at rest
    pub fn unit_count(&self) -> usize {
        self.inner.lock().unwrap().units.len()
    }

    /// Number of units that will be stepped next tick
    pub fn active_count(&self) -> usize {
        self.inner.lock().unwrap().order.len()
    }
}

impl Default for MotionScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// A weak handle to the motion scheduler
///
/// Held by wrapper types and host glue. Every operation no-ops safely after
/// the scheduler is dropped.
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Weak<Mutex<SchedulerInner>>,
}

impl SchedulerHandle {
    fn with_inner<R>(&self, f: impl FnOnce(&mut SchedulerInner) -> R) -> Option<R> {
        let arc = self.inner.upgrade()?;
        let mut guard = arc.lock().unwrap();
        Some(f(&mut guard))
    }

    /// Check if the scheduler is still alive
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Tick at an explicit timestamp (deterministic path)
    pub fn tick_at(&self, timestamp: Duration) -> bool {
        match self.inner.upgrade() {
            Some(arc) => run_tick(&arc, timestamp),
            None => false,
        }
    }

    // =========================================================================
    // Unit lifecycle
    // =========================================================================

    /// Register any driver kind
    pub fn register_unit(&self, driver: Driver) -> Option<UnitId> {
        let out = self.with_inner(|inner| inner.insert(driver));
        out.map(|(id, activation)| {
            activation.fire();
            id
        })
    }

    pub fn register_spring(&self, spring: Spring) -> Option<UnitId> {
        self.register_unit(Driver::Spring(spring))
    }

    pub fn register_composite(&self, composite: Composite) -> Option<UnitId> {
        self.register_unit(Driver::Composite(composite))
    }

    pub fn register_world(&self, world: CollisionWorld) -> Option<UnitId> {
        self.register_unit(Driver::World(world))
    }

    pub fn register_sequence(&self, sequence: Sequence) -> Option<UnitId> {
        self.register_unit(Driver::Sequence(sequence))
    }

    /// Register a scripted unit polled every tick until it returns false
    pub fn register_callback<F>(&self, f: F) -> Option<UnitId>
    where
        F: FnMut(Tick) -> bool + Send + 'static,
    {
        self.register_unit(Driver::Callback {
            f: Box::new(f),
            active: true,
        })
    }

    /// Remove a unit entirely
    ///
    /// Fires `on_cancel` exactly once if the unit was still mid-flight; a
    /// settled unit is cleaned up silently. Queued events for the unit are
    /// suppressed.
    pub fn remove_unit(&self, id: UnitId) {
        let hook = self
            .with_inner(|inner| {
                let unit = inner.units.remove(id)?;
                inner.order.retain(|u| *u != id);
                inner.suppressed.insert(id);
                if unit.driver.is_active() {
                    unit.hooks.on_cancel
                } else {
                    None
                }
            })
            .flatten();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Stop ticking a unit without touching its state
    ///
    /// The unit holds position and velocity indefinitely and resumes when
    /// re-activated.
    pub fn suspend_unit(&self, id: UnitId) {
        self.with_inner(|inner| {
            inner.order.retain(|u| *u != id);
        });
    }

    /// Resume ticking a suspended unit
    pub fn resume_unit(&self, id: UnitId) {
        if let Some(activation) = self.with_inner(|inner| inner.activate(id)) {
            activation.fire();
        }
    }

    /// Update a unit's lifecycle hooks in place
    pub fn with_unit_hooks(&self, id: UnitId, f: impl FnOnce(&mut UnitHooks)) {
        self.with_inner(|inner| {
            if let Some(unit) = inner.units.get_mut(id) {
                f(&mut unit.hooks);
            }
        });
    }

    // =========================================================================
    // Spring operations
    // =========================================================================

    pub fn set_spring_target(&self, id: UnitId, target: f32) {
        if let Some(activation) = self.with_inner(|inner| {
            if let Some(spring) = inner.spring_mut(id) {
                spring.set_target(target);
            }
            inner.activate(id)
        }) {
            activation.fire();
        }
    }

    pub fn snap_spring_to(&self, id: UnitId, value: f32) {
        self.with_inner(|inner| {
            if let Some(spring) = inner.spring_mut(id) {
                spring.snap_to(value);
            }
        });
    }

    pub fn set_spring_velocity(&self, id: UnitId, velocity: f32) {
        if let Some(activation) = self.with_inner(|inner| {
            if let Some(spring) = inner.spring_mut(id) {
                spring.set_velocity(velocity);
            }
            inner.activate(id)
        }) {
            activation.fire();
        }
    }

    pub fn spring_position(&self, id: UnitId) -> Option<f32> {
        self.with_inner(|inner| inner.spring(id).map(Spring::position))
            .flatten()
    }

    pub fn spring_velocity(&self, id: UnitId) -> Option<f32> {
        self.with_inner(|inner| inner.spring(id).map(Spring::velocity))
            .flatten()
    }

    pub fn spring_target(&self, id: UnitId) -> Option<f32> {
        self.with_inner(|inner| inner.spring(id).map(Spring::target))
            .flatten()
    }

    pub fn spring_is_animating(&self, id: UnitId) -> bool {
        self.with_inner(|inner| inner.spring(id).map(Spring::is_animating))
            .flatten()
            .unwrap_or(false)
    }

    /// Check if a spring has settled
    ///
    /// A missing spring (or dropped scheduler) counts as settled since
    /// nothing is animating.
    pub fn spring_is_settled(&self, id: UnitId) -> bool {
        self.with_inner(|inner| inner.spring(id).map(Spring::is_settled))
            .flatten()
            .unwrap_or(true)
    }

    // =========================================================================
    // Composite operations
    // =========================================================================

    pub fn set_composite_target(&self, id: UnitId, name: &str, target: f32) -> Result<()> {
        match self.with_inner(|inner| {
            let result = match inner.composite_mut(id) {
                Some(composite) => composite.set_target(name, target),
                None => Ok(()),
            };
            (result, inner.activate(id))
        }) {
            Some((result, activation)) => {
                activation.fire();
                result
            }
            None => Ok(()),
        }
    }

    pub fn set_composite_targets(&self, id: UnitId, targets: &[(&str, f32)]) -> Result<()> {
        match self.with_inner(|inner| {
            let result = match inner.composite_mut(id) {
                Some(composite) => composite.set_targets(targets),
                None => Ok(()),
            };
            (result, inner.activate(id))
        }) {
            Some((result, activation)) => {
                activation.fire();
                result
            }
            None => Ok(()),
        }
    }

    pub fn snap_composite_to(&self, id: UnitId, name: &str, value: f32) -> Result<()> {
        self.with_inner(|inner| match inner.composite_mut(id) {
            Some(composite) => composite.snap_to(name, value),
            None => Ok(()),
        })
        .unwrap_or(Ok(()))
    }

    pub fn set_composite_velocity(&self, id: UnitId, name: &str, velocity: f32) -> Result<()> {
        match self.with_inner(|inner| {
            let result = match inner.composite_mut(id) {
                Some(composite) => composite.set_velocity(name, velocity),
                None => Ok(()),
            };
            (result, inner.activate(id))
        }) {
            Some((result, activation)) => {
                activation.fire();
                result
            }
            None => Ok(()),
        }
    }

    pub fn composite_value(&self, id: UnitId, name: &str) -> Option<f32> {
        self.with_inner(|inner| inner.composite(id).and_then(|c| c.value(name)))
            .flatten()
    }

    pub fn composite_velocity(&self, id: UnitId, name: &str) -> Option<f32> {
        self.with_inner(|inner| inner.composite(id).and_then(|c| c.velocity(name)))
            .flatten()
    }

    pub fn composite_target(&self, id: UnitId, name: &str) -> Option<f32> {
        self.with_inner(|inner| inner.composite(id).and_then(|c| c.target(name)))
            .flatten()
    }

    pub fn composite_values(&self, id: UnitId) -> Vec<(String, f32)> {
        self.with_inner(|inner| {
            inner
                .composite(id)
                .map(Composite::values)
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    pub fn composite_contains(&self, id: UnitId, name: &str) -> Option<bool> {
        self.with_inner(|inner| inner.composite(id).map(|c| c.contains(name)))
            .flatten()
    }

    pub fn composite_is_settled(&self, id: UnitId) -> bool {
        self.with_inner(|inner| inner.composite(id).map(Composite::is_settled))
            .flatten()
            .unwrap_or(true)
    }

    pub fn composite_is_animating(&self, id: UnitId) -> bool {
        self.with_inner(|inner| inner.composite(id).map(Composite::is_animating))
            .flatten()
            .unwrap_or(false)
    }

    // =========================================================================
    // Collision world operations
    // =========================================================================

    /// Add a body to a registered world
    ///
    /// `Ok(None)` means the scheduler or world is gone and the call no-oped.
    pub fn world_add_body(&self, id: UnitId, body: Body) -> Result<Option<BodyId>> {
        match self.with_inner(|inner| {
            let result = match inner.world_mut(id) {
                Some(world) => world.add_body(body).map(Some),
                None => Ok(None),
            };
            (result, inner.activate(id))
        }) {
            Some((result, activation)) => {
                activation.fire();
                result
            }
            None => Ok(None),
        }
    }

    pub fn world_remove_body(&self, id: UnitId, body: BodyId) {
        self.with_inner(|inner| {
            if let Some(world) = inner.world_mut(id) {
                world.remove_body(body);
            }
        });
    }

    pub fn world_set_body_velocity(&self, id: UnitId, body: BodyId, velocity: Vec2) {
        if let Some(activation) = self.with_inner(|inner| {
            if let Some(world) = inner.world_mut(id) {
                world.set_body_velocity(body, velocity);
            }
            inner.activate(id)
        }) {
            activation.fire();
        }
    }

    pub fn world_set_body_position(&self, id: UnitId, body: BodyId, position: Vec2) {
        if let Some(activation) = self.with_inner(|inner| {
            if let Some(world) = inner.world_mut(id) {
                world.set_body_position(body, position);
            }
            inner.activate(id)
        }) {
            activation.fire();
        }
    }

    pub fn world_body_position(&self, id: UnitId, body: BodyId) -> Option<Vec2> {
        self.with_inner(|inner| inner.world(id).and_then(|w| w.body(body)).map(|b| b.position))
            .flatten()
    }

    pub fn world_body_velocity(&self, id: UnitId, body: BodyId) -> Option<Vec2> {
        self.with_inner(|inner| inner.world(id).and_then(|w| w.body(body)).map(|b| b.velocity))
            .flatten()
    }

    pub fn world_body_count(&self, id: UnitId) -> usize {
        self.with_inner(|inner| inner.world(id).map(CollisionWorld::body_count))
            .flatten()
            .unwrap_or(0)
    }

    pub fn world_is_settled(&self, id: UnitId) -> bool {
        self.with_inner(|inner| inner.world(id).map(CollisionWorld::is_settled))
            .flatten()
            .unwrap_or(true)
    }

    // =========================================================================
    // Sequence operations
    // =========================================================================

    pub fn start_sequence(&self, id: UnitId) {
        if let Some(activation) = self.with_inner(|inner| {
            if let Some(sequence) = inner.sequence_mut(id) {
                sequence.start();
            }
            inner.activate(id)
        }) {
            activation.fire();
        }
    }

    /// Freeze a sequence, preserving every step's exact state
    pub fn pause_sequence(&self, id: UnitId) {
        self.with_inner(|inner| {
            let Some(sequence) = inner.sequence_mut(id) else {
                return;
            };
            sequence.pause();
            inner.order.retain(|u| *u != id);
        });
    }

    pub fn resume_sequence(&self, id: UnitId) {
        if let Some(activation) = self.with_inner(|inner| {
            if let Some(sequence) = inner.sequence_mut(id) {
                sequence.resume();
            }
            inner.activate(id)
        }) {
            activation.fire();
        }
    }

    /// Cancel a sequence: every non-terminal step becomes cancelled and no
    /// callback fires twice
    pub fn cancel_sequence(&self, id: UnitId) {
        let hook = self
            .with_inner(|inner| {
                let unit = inner.units.get_mut(id)?;
                let Driver::Sequence(sequence) = &mut unit.driver else {
                    return None;
                };
                let changed = sequence.cancel();
                let hook = if changed {
                    unit.hooks.on_cancel.clone()
                } else {
                    None
                };
                inner.order.retain(|u| *u != id);
                inner.suppressed.insert(id);
                hook
            })
            .flatten();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub fn sequence_status(&self, id: UnitId) -> Option<SequenceStatus> {
        self.with_inner(|inner| inner.sequence(id).map(Sequence::status))
            .flatten()
    }

    pub fn sequence_step_status(&self, id: UnitId, step: &str) -> Option<StepStatus> {
        self.with_inner(|inner| inner.sequence(id).and_then(|s| s.step_status(step)))
            .flatten()
    }

    pub fn sequence_step_position(&self, id: UnitId, step: &str) -> Option<f32> {
        self.with_inner(|inner| inner.sequence(id).and_then(|s| s.step_position(step)))
            .flatten()
    }

    pub fn sequence_step_channel_value(
        &self,
        id: UnitId,
        step: &str,
        channel: &str,
    ) -> Option<f32> {
        self.with_inner(|inner| {
            inner
                .sequence(id)
                .and_then(|s| s.step_channel_value(step, channel))
        })
        .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{SequenceBuilder, StepOutcome, StepWork};
    use crate::spring::SpringConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FRAME: Duration = Duration::from_micros(16_667);

    fn frame_at(n: u32) -> Duration {
        FRAME * n
    }

    #[test]
    fn test_scheduler_ticks_spring() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();

        let spring = Spring::new(SpringConfig::stiff(), 0.0).unwrap();
        let id = handle.register_spring(spring).unwrap();
        handle.set_spring_target(id, 100.0);

        assert!(scheduler.tick_at(frame_at(1)));
        let position = handle.spring_position(id).unwrap();
        assert!(position > 0.0);
    }

    #[test]
    fn test_fanout_follows_registration_order_after_slot_reuse() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_a = Arc::clone(&log);
        let a = handle
            .register_callback(move |_| {
                log_a.lock().unwrap().push('a');
                true
            })
            .unwrap();
        let log_b = Arc::clone(&log);
        let _b = handle
            .register_callback(move |_| {
                log_b.lock().unwrap().push('b');
                true
            })
            .unwrap();

        // Free a slot, then register a newcomer that reuses it
        handle.remove_unit(a);
        let log_c = Arc::clone(&log);
        let _c = handle
            .register_callback(move |_| {
                log_c.lock().unwrap().push('c');
                true
            })
            .unwrap();

        scheduler.tick_at(frame_at(1));

        // Registration order, not slot order
        assert_eq!(*log.lock().unwrap(), vec!['b', 'c']);
    }

    #[test]
    fn test_delta_clamped_and_timestamp_monotonic() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();
        let deltas = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&deltas);
        handle.register_callback(move |tick| {
            sink.lock().unwrap().push(tick.dt);
            true
        });

        // A ten second stall produces one clamped step
        scheduler.tick_at(Duration::from_secs(10));
        // A backwards timestamp produces a zero delta
        scheduler.tick_at(Duration::from_secs(3));

        let deltas = deltas.lock().unwrap();
        assert_eq!(deltas[0], MAX_FRAME_DELTA);
        assert_eq!(deltas[1], 0.0);
    }

    #[test]
    fn test_settle_deregisters_and_completes_once() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();
        let completions = Arc::new(AtomicUsize::new(0));

        let spring = Spring::new(SpringConfig::snappy(), 0.0).unwrap();
        let id = handle.register_spring(spring).unwrap();
        let count = Arc::clone(&completions);
        handle.with_unit_hooks(id, |hooks| {
            hooks.on_complete = Some(Arc::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        });
        handle.set_spring_target(id, 10.0);

        for n in 1..=180 {
            scheduler.tick_at(frame_at(n));
        }

        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.active_count(), 0);
        // Storage persists so the owner can still read and retarget
        assert_eq!(scheduler.unit_count(), 1);
        assert_eq!(handle.spring_position(id), Some(10.0));

        // Retargeting re-arms the lifecycle
        handle.set_spring_target(id, 20.0);
        for n in 181..=360 {
            scheduler.tick_at(frame_at(n));
        }
        assert_eq!(completions.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancel_mid_tick_suppresses_queued_events() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();

        let second = Arc::new(Mutex::new(None::<UnitId>));
        let updates = Arc::new(AtomicUsize::new(0));

        let victim_slot = Arc::clone(&second);
        let killer_handle = handle.clone();
        let killer = handle.register_callback(move |_| true).unwrap();
        handle.with_unit_hooks(killer, |hooks| {
            hooks.on_update = Some(Arc::new(move || {
                if let Some(victim) = *victim_slot.lock().unwrap() {
                    killer_handle.remove_unit(victim);
                }
            }));
        });

        let victim = handle.register_callback(move |_| true).unwrap();
        let count = Arc::clone(&updates);
        handle.with_unit_hooks(victim, |hooks| {
            hooks.on_update = Some(Arc::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        });
        *second.lock().unwrap() = Some(victim);

        scheduler.tick_at(frame_at(1));

        // The victim was stepped before the killer's hook ran, but its
        // queued update must not fire after cancellation
        assert_eq!(updates.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.unit_count(), 1);
    }

    #[test]
    fn test_callback_deregisters_peer_mid_tick() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();

        let victim_slot = Arc::new(Mutex::new(None::<UnitId>));
        let victim_steps = Arc::new(AtomicUsize::new(0));
        let cancels = Arc::new(AtomicUsize::new(0));

        let slot = Arc::clone(&victim_slot);
        let remover_handle = handle.clone();
        handle.register_callback(move |_| {
            if let Some(victim) = *slot.lock().unwrap() {
                remover_handle.remove_unit(victim);
            }
            true
        });

        let steps = Arc::clone(&victim_steps);
        let victim = handle
            .register_callback(move |_| {
                steps.fetch_add(1, Ordering::SeqCst);
                true
            })
            .unwrap();
        let count = Arc::clone(&cancels);
        handle.with_unit_hooks(victim, |hooks| {
            hooks.on_cancel = Some(Arc::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        });
        *victim_slot.lock().unwrap() = Some(victim);

        assert!(scheduler.tick_at(frame_at(1)));

        // Removed before its turn: never stepped, cancelled exactly once
        assert_eq!(victim_steps.load(Ordering::SeqCst), 0);
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.unit_count(), 1);
    }

    #[test]
    fn test_callback_polls_and_drives_units_mid_tick() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();

        let leader = handle
            .register_spring(Spring::new(SpringConfig::stiff(), 0.0).unwrap())
            .unwrap();
        handle.set_spring_target(leader, 80.0);

        let follower = handle
            .register_spring(Spring::new(SpringConfig::stiff(), 0.0).unwrap())
            .unwrap();

        // Scripted binding: the follower chases the leader's live position
        let binding_handle = handle.clone();
        handle.register_callback(move |_| {
            if let Some(position) = binding_handle.spring_position(leader) {
                binding_handle.set_spring_target(follower, position);
            }
            true
        });

        for n in 1..=96 {
            scheduler.tick_at(frame_at(n));
        }

        assert_eq!(handle.spring_position(leader), Some(80.0));
        let followed = handle.spring_position(follower).unwrap();
        assert!((followed - 80.0).abs() < 1.0);
    }

    #[test]
    fn test_step_callback_reaches_scheduler_mid_tick() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();

        let bystander = handle.register_callback(move |_| true).unwrap();

        let evict_handle = handle.clone();
        let sequence = SequenceBuilder::new()
            .step(
                "evict",
                StepWork::callback(move |_| {
                    evict_handle.remove_unit(bystander);
                    StepOutcome::Complete
                }),
            )
            .build()
            .unwrap();
        let id = handle.register_sequence(sequence).unwrap();
        handle.start_sequence(id);

        scheduler.tick_at(frame_at(1));
        scheduler.tick_at(frame_at(2));

        assert_eq!(handle.sequence_status(id), Some(SequenceStatus::Complete));
        assert_eq!(scheduler.unit_count(), 1);
    }

    #[test]
    fn test_handle_noops_after_scheduler_drop() {
        let handle = {
            let scheduler = MotionScheduler::new();
            scheduler.handle()
        };

        assert!(!handle.is_alive());
        assert!(handle
            .register_spring(Spring::new(SpringConfig::stiff(), 0.0).unwrap())
            .is_none());
        assert!(!handle.tick_at(Duration::from_millis(16)));
    }

    #[test]
    fn test_wake_fires_when_idle_scheduler_gains_work() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();
        let wakes = Arc::new(AtomicUsize::new(0));

        let count = Arc::clone(&wakes);
        scheduler.set_wake_callback(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        let spring = Spring::new(SpringConfig::snappy(), 0.0).unwrap();
        let id = handle.register_spring(spring).unwrap();
        handle.set_spring_target(id, 10.0);
        assert_eq!(wakes.load(Ordering::SeqCst), 1);

        // Already active: no second wake
        handle.set_spring_target(id, 20.0);
        assert_eq!(wakes.load(Ordering::SeqCst), 1);

        // Settle to idle, then retarget: wakes again
        for n in 1..=180 {
            scheduler.tick_at(frame_at(n));
        }
        assert!(!scheduler.has_active());
        handle.set_spring_target(id, 30.0);
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reduced_motion_completes_spring_in_one_tick() {
        let signal = ReducedMotion::new(true);
        let scheduler = MotionScheduler::with_reduced_motion(signal);
        let handle = scheduler.handle();

        let spring = Spring::new(SpringConfig::gentle(), 0.0).unwrap();
        let id = handle.register_spring(spring).unwrap();
        handle.set_spring_target(id, 100.0);

        scheduler.tick_at(frame_at(1));

        assert_eq!(handle.spring_position(id), Some(100.0));
        assert!(handle.spring_is_settled(id));
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn test_units_registered_during_dispatch_step_next_tick() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();

        let late_ticks = Arc::new(AtomicUsize::new(0));
        let spawned = Arc::new(Mutex::new(false));

        let spawner_handle = handle.clone();
        let spawned_flag = Arc::clone(&spawned);
        let late_count = Arc::clone(&late_ticks);
        let spawner = handle.register_callback(move |_| true).unwrap();
        handle.with_unit_hooks(spawner, |hooks| {
            hooks.on_update = Some(Arc::new(move || {
                let mut flag = spawned_flag.lock().unwrap();
                if !*flag {
                    *flag = true;
                    let count = Arc::clone(&late_count);
                    spawner_handle.register_callback(move |_| {
                        count.fetch_add(1, Ordering::SeqCst);
                        true
                    });
                }
            }));
        });

        scheduler.tick_at(frame_at(1));
        assert_eq!(late_ticks.load(Ordering::SeqCst), 0);

        scheduler.tick_at(frame_at(2));
        assert_eq!(late_ticks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_suspend_preserves_state_and_resume_continues() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();

        let spring = Spring::new(SpringConfig::gentle(), 0.0).unwrap();
        let id = handle.register_spring(spring).unwrap();
        handle.set_spring_target(id, 100.0);

        for n in 1..=10 {
            scheduler.tick_at(frame_at(n));
        }
        let frozen_position = handle.spring_position(id).unwrap();
        let frozen_velocity = handle.spring_velocity(id).unwrap();
        assert!(frozen_velocity > 0.0);

        handle.suspend_unit(id);
        for n in 11..=30 {
            scheduler.tick_at(frame_at(n));
        }
        assert_eq!(handle.spring_position(id), Some(frozen_position));
        assert_eq!(handle.spring_velocity(id), Some(frozen_velocity));

        handle.resume_unit(id);
        scheduler.tick_at(frame_at(31));
        assert!(handle.spring_position(id).unwrap() > frozen_position);
    }
}
