//! Animated value wrappers
//!
//! Owner-facing handles over scheduler units:
//! - [`MotionValue`] - one spring-driven scalar
//! - [`MotionGroup`] - named channels settling as a group
//! - [`SequenceHandle`] - a registered orchestration sequence
//! - [`WorldHandle`] - a registered collision world
//!
//! Values and groups register lazily on first use, so constructing them is
//! free until something actually animates. Dropping a wrapper removes its
//! unit; a drop mid-animation fires the unit's cancel hook.

use std::sync::Arc;

use crate::collision::{Body, BodyId, CollisionConfig, CollisionWorld};
use crate::composite::{ChannelSpec, Composite, SettlePolicy};
use crate::error::{MotionError, Result};
use crate::scheduler::{Hook, SchedulerHandle, UnitHooks, UnitId};
use crate::sequence::{Sequence, SequenceStatus, StepStatus};
use crate::spring::{Spring, SpringConfig};
use verve_core::Vec2;

// =============================================================================
// MotionValue
// =============================================================================

/// A single spring-driven scalar
///
/// Owns exactly one scheduler unit, so it is deliberately not `Clone`:
/// dropping the value removes the unit, and two owners of one unit would
/// fight over it. Registration is lazy; a value that is never retargeted
/// never touches the scheduler.
pub struct MotionValue {
    handle: SchedulerHandle,
    config: SpringConfig,
    /// Local position before registration, refreshed on snaps after
    resting: f32,
    id: Option<UnitId>,
    hooks: UnitHooks,
}

impl MotionValue {
    pub fn new(handle: &SchedulerHandle, config: SpringConfig, initial: f32) -> Result<Self> {
        config.validate()?;
        if !initial.is_finite() {
            return Err(MotionError::Config(format!(
                "initial value must be finite, got {initial}"
            )));
        }
        Ok(Self {
            handle: handle.clone(),
            config,
            resting: initial,
            id: None,
            hooks: UnitHooks::default(),
        })
    }

    pub fn config(&self) -> SpringConfig {
        self.config
    }

    pub fn unit_id(&self) -> Option<UnitId> {
        self.id
    }

    /// Current position
    pub fn get(&self) -> f32 {
        self.id
            .and_then(|id| self.handle.spring_position(id))
            .unwrap_or(self.resting)
    }

    pub fn velocity(&self) -> f32 {
        self.id
            .and_then(|id| self.handle.spring_velocity(id))
            .unwrap_or(0.0)
    }

    pub fn target(&self) -> f32 {
        self.id
            .and_then(|id| self.handle.spring_target(id))
            .unwrap_or(self.resting)
    }

    pub fn is_animating(&self) -> bool {
        self.id
            .map(|id| self.handle.spring_is_animating(id))
            .unwrap_or(false)
    }

    pub fn is_settled(&self) -> bool {
        self.id
            .map(|id| self.handle.spring_is_settled(id))
            .unwrap_or(true)
    }

    /// Animate toward a new target, registering on first use
    pub fn set_target(&mut self, target: f32) {
        if let Some(id) = self.ensure_registered() {
            self.handle.set_spring_target(id, target);
        }
    }

    /// Jump instantly, settling in place
    pub fn snap_to(&mut self, value: f32) {
        if !value.is_finite() {
            tracing::warn!(value, "ignoring non-finite snap");
            return;
        }
        self.resting = value;
        if let Some(id) = self.ensure_registered() {
            self.handle.snap_spring_to(id, value);
        }
    }

    /// Inject velocity, e.g. to hand off a gesture fling
    pub fn set_velocity(&mut self, velocity: f32) {
        if let Some(id) = self.ensure_registered() {
            self.handle.set_spring_velocity(id, velocity);
        }
    }

    pub fn on_start<F>(&mut self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let hook: Hook = Arc::new(hook);
        self.hooks.on_start = Some(Arc::clone(&hook));
        if let Some(id) = self.id {
            self.handle
                .with_unit_hooks(id, move |hooks| hooks.on_start = Some(hook));
        }
    }

    pub fn on_update<F>(&mut self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let hook: Hook = Arc::new(hook);
        self.hooks.on_update = Some(Arc::clone(&hook));
        if let Some(id) = self.id {
            self.handle
                .with_unit_hooks(id, move |hooks| hooks.on_update = Some(hook));
        }
    }

    pub fn on_complete<F>(&mut self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let hook: Hook = Arc::new(hook);
        self.hooks.on_complete = Some(Arc::clone(&hook));
        if let Some(id) = self.id {
            self.handle
                .with_unit_hooks(id, move |hooks| hooks.on_complete = Some(hook));
        }
    }

    pub fn on_cancel<F>(&mut self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let hook: Hook = Arc::new(hook);
        self.hooks.on_cancel = Some(Arc::clone(&hook));
        if let Some(id) = self.id {
            self.handle
                .with_unit_hooks(id, move |hooks| hooks.on_cancel = Some(hook));
        }
    }

    /// Register the backing spring, applying any hooks set before now
    ///
    /// Hooks go in before the first retarget so `on_start` observes the
    /// very first activation.
    fn ensure_registered(&mut self) -> Option<UnitId> {
        if self.id.is_none() {
            if !self.handle.is_alive() {
                return None;
            }
            match Spring::new(self.config, self.resting) {
                Ok(spring) => {
                    if let Some(id) = self.handle.register_spring(spring) {
                        let hooks = self.hooks.clone();
                        self.handle.with_unit_hooks(id, move |slot| *slot = hooks);
                        self.id = Some(id);
                    }
                }
                Err(error) => {
                    // Config was validated in new(), so this path is dead
                    tracing::warn!(%error, "failed to build backing spring");
                }
            }
        }
        self.id
    }
}

impl Drop for MotionValue {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.handle.remove_unit(id);
        }
    }
}

// =============================================================================
// MotionGroup
// =============================================================================

/// Named channels animating and settling as one group
///
/// Channels are validated when the group is created; the composite itself
/// registers on first use, like [`MotionValue`].
pub struct MotionGroup {
    handle: SchedulerHandle,
    /// Built composite held until the first retarget registers it
    pending: Option<Composite>,
    id: Option<UnitId>,
    hooks: UnitHooks,
}

impl MotionGroup {
    pub fn new(
        handle: &SchedulerHandle,
        channels: Vec<ChannelSpec>,
        policy: SettlePolicy,
    ) -> Result<Self> {
        let composite = Composite::new(channels, policy)?;
        Ok(Self {
            handle: handle.clone(),
            pending: Some(composite),
            id: None,
            hooks: UnitHooks::default(),
        })
    }

    pub fn unit_id(&self) -> Option<UnitId> {
        self.id
    }

    pub fn contains(&self, name: &str) -> bool {
        match (&self.pending, self.id) {
            (Some(composite), _) => composite.contains(name),
            (None, Some(id)) => self.handle.composite_contains(id, name).unwrap_or(false),
            _ => false,
        }
    }

    pub fn value(&self, name: &str) -> Option<f32> {
        match (&self.pending, self.id) {
            (Some(composite), _) => composite.value(name),
            (None, Some(id)) => self.handle.composite_value(id, name),
            _ => None,
        }
    }

    pub fn velocity(&self, name: &str) -> Option<f32> {
        match (&self.pending, self.id) {
            (Some(composite), _) => composite.velocity(name),
            (None, Some(id)) => self.handle.composite_velocity(id, name),
            _ => None,
        }
    }

    pub fn target(&self, name: &str) -> Option<f32> {
        match (&self.pending, self.id) {
            (Some(composite), _) => composite.target(name),
            (None, Some(id)) => self.handle.composite_target(id, name),
            _ => None,
        }
    }

    /// Every channel's current value, in declaration order
    pub fn values(&self) -> Vec<(String, f32)> {
        match (&self.pending, self.id) {
            (Some(composite), _) => composite.values(),
            (None, Some(id)) => self.handle.composite_values(id),
            _ => Vec::new(),
        }
    }

    pub fn is_settled(&self) -> bool {
        match (&self.pending, self.id) {
            (Some(composite), _) => composite.is_settled(),
            (None, Some(id)) => self.handle.composite_is_settled(id),
            _ => true,
        }
    }

    pub fn is_animating(&self) -> bool {
        match (&self.pending, self.id) {
            (Some(composite), _) => composite.is_animating(),
            (None, Some(id)) => self.handle.composite_is_animating(id),
            _ => false,
        }
    }

    pub fn set_target(&mut self, name: &str, target: f32) -> Result<()> {
        match self.ensure_registered() {
            Some(id) => self.handle.set_composite_target(id, name, target),
            None => Ok(()),
        }
    }

    /// Retarget several channels atomically
    pub fn set_targets(&mut self, targets: &[(&str, f32)]) -> Result<()> {
        match self.ensure_registered() {
            Some(id) => self.handle.set_composite_targets(id, targets),
            None => Ok(()),
        }
    }

    pub fn snap_to(&mut self, name: &str, value: f32) -> Result<()> {
        match self.ensure_registered() {
            Some(id) => self.handle.snap_composite_to(id, name, value),
            None => Ok(()),
        }
    }

    pub fn set_velocity(&mut self, name: &str, velocity: f32) -> Result<()> {
        match self.ensure_registered() {
            Some(id) => self.handle.set_composite_velocity(id, name, velocity),
            None => Ok(()),
        }
    }

    pub fn on_start<F>(&mut self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let hook: Hook = Arc::new(hook);
        self.hooks.on_start = Some(Arc::clone(&hook));
        if let Some(id) = self.id {
            self.handle
                .with_unit_hooks(id, move |hooks| hooks.on_start = Some(hook));
        }
    }

    /// Fires once per aggregate settle under the group's policy, re-arming
    /// on the next retarget
    pub fn on_settle<F>(&mut self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let hook: Hook = Arc::new(hook);
        self.hooks.on_complete = Some(Arc::clone(&hook));
        if let Some(id) = self.id {
            self.handle
                .with_unit_hooks(id, move |hooks| hooks.on_complete = Some(hook));
        }
    }

    fn ensure_registered(&mut self) -> Option<UnitId> {
        if self.id.is_none() {
            if !self.handle.is_alive() {
                return None;
            }
            if let Some(composite) = self.pending.take() {
                if let Some(id) = self.handle.register_composite(composite) {
                    let hooks = self.hooks.clone();
                    self.handle.with_unit_hooks(id, move |slot| *slot = hooks);
                    self.id = Some(id);
                }
            }
        }
        self.id
    }
}

impl Drop for MotionGroup {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.handle.remove_unit(id);
        }
    }
}

// =============================================================================
// SequenceHandle
// =============================================================================

/// Owner of a registered sequence
///
/// Registers immediately but stays inactive until [`start`](Self::start).
pub struct SequenceHandle {
    handle: SchedulerHandle,
    id: Option<UnitId>,
}

impl SequenceHandle {
    pub fn new(handle: &SchedulerHandle, sequence: Sequence) -> Self {
        let id = handle.register_sequence(sequence);
        Self {
            handle: handle.clone(),
            id,
        }
    }

    pub fn unit_id(&self) -> Option<UnitId> {
        self.id
    }

    pub fn start(&self) {
        if let Some(id) = self.id {
            self.handle.start_sequence(id);
        }
    }

    /// Freeze every step exactly where it is
    pub fn pause(&self) {
        if let Some(id) = self.id {
            self.handle.pause_sequence(id);
        }
    }

    pub fn resume(&self) {
        if let Some(id) = self.id {
            self.handle.resume_sequence(id);
        }
    }

    /// Cancel the sequence; queued step callbacks from this tick are dropped
    pub fn cancel(&self) {
        if let Some(id) = self.id {
            self.handle.cancel_sequence(id);
        }
    }

    pub fn status(&self) -> Option<SequenceStatus> {
        self.id.and_then(|id| self.handle.sequence_status(id))
    }

    pub fn step_status(&self, step: &str) -> Option<StepStatus> {
        self.id.and_then(|id| self.handle.sequence_step_status(id, step))
    }

    pub fn step_position(&self, step: &str) -> Option<f32> {
        self.id
            .and_then(|id| self.handle.sequence_step_position(id, step))
    }

    pub fn step_channel_value(&self, step: &str, channel: &str) -> Option<f32> {
        self.id
            .and_then(|id| self.handle.sequence_step_channel_value(id, step, channel))
    }

    pub fn on_complete<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        if let Some(id) = self.id {
            let hook: Hook = Arc::new(hook);
            self.handle
                .with_unit_hooks(id, move |hooks| hooks.on_complete = Some(hook));
        }
    }

    pub fn on_cancel<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        if let Some(id) = self.id {
            let hook: Hook = Arc::new(hook);
            self.handle
                .with_unit_hooks(id, move |hooks| hooks.on_cancel = Some(hook));
        }
    }
}

impl Drop for SequenceHandle {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.handle.remove_unit(id);
        }
    }
}

// =============================================================================
// WorldHandle
// =============================================================================

/// Owner of a registered collision world
pub struct WorldHandle {
    handle: SchedulerHandle,
    id: Option<UnitId>,
}

impl WorldHandle {
    pub fn new(handle: &SchedulerHandle, config: CollisionConfig) -> Result<Self> {
        let world = CollisionWorld::new(config)?;
        Ok(Self {
            handle: handle.clone(),
            id: handle.register_world(world),
        })
    }

    pub fn with_defaults(handle: &SchedulerHandle) -> Self {
        Self {
            handle: handle.clone(),
            id: handle.register_world(CollisionWorld::with_defaults()),
        }
    }

    pub fn unit_id(&self) -> Option<UnitId> {
        self.id
    }

    /// Add a body; `Ok(None)` means the scheduler is gone
    pub fn add_body(&self, body: Body) -> Result<Option<BodyId>> {
        match self.id {
            Some(id) => self.handle.world_add_body(id, body),
            None => Ok(None),
        }
    }

    pub fn remove_body(&self, body: BodyId) {
        if let Some(id) = self.id {
            self.handle.world_remove_body(id, body);
        }
    }

    pub fn set_velocity(&self, body: BodyId, velocity: Vec2) {
        if let Some(id) = self.id {
            self.handle.world_set_body_velocity(id, body, velocity);
        }
    }

    pub fn set_position(&self, body: BodyId, position: Vec2) {
        if let Some(id) = self.id {
            self.handle.world_set_body_position(id, body, position);
        }
    }

    pub fn position(&self, body: BodyId) -> Option<Vec2> {
        self.id
            .and_then(|id| self.handle.world_body_position(id, body))
    }

    pub fn velocity(&self, body: BodyId) -> Option<Vec2> {
        self.id
            .and_then(|id| self.handle.world_body_velocity(id, body))
    }

    pub fn body_count(&self) -> usize {
        self.id
            .map(|id| self.handle.world_body_count(id))
            .unwrap_or(0)
    }

    pub fn is_settled(&self) -> bool {
        self.id
            .map(|id| self.handle.world_is_settled(id))
            .unwrap_or(true)
    }
}

impl Drop for WorldHandle {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.handle.remove_unit(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::scheduler::MotionScheduler;
    use crate::sequence::{SequenceBuilder, StepWork};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use verve_core::ReducedMotion;

    const FRAME: Duration = Duration::from_micros(16_667);

    fn settle(scheduler: &MotionScheduler, frames: u32) {
        for n in 1..=frames {
            scheduler.tick_at(FRAME * n);
        }
    }

    #[test]
    fn test_value_registers_lazily() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();

        let mut value = MotionValue::new(&handle, SpringConfig::stiff(), 25.0).unwrap();
        assert_eq!(scheduler.unit_count(), 0);
        assert_eq!(value.get(), 25.0);
        assert!(value.is_settled());

        value.set_target(50.0);
        assert_eq!(scheduler.unit_count(), 1);
        assert!(value.is_animating());
    }

    #[test]
    fn test_value_settles_exactly_on_target() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();

        let mut value = MotionValue::new(&handle, SpringConfig::snappy(), 0.0).unwrap();
        value.set_target(80.0);
        settle(&scheduler, 240);

        assert_eq!(value.get(), 80.0);
        assert_eq!(value.velocity(), 0.0);
        assert!(value.is_settled());
    }

    #[test]
    fn test_presets_settle_on_a_manual_clock() {
        // Double each profile's rough settle time; the envelope estimates
        // in the preset docs put the last velocity crossing near the line
        let cases = [
            (SpringConfig::gentle(), Duration::from_millis(3400)),
            (SpringConfig::bouncy(), Duration::from_millis(4000)),
            (SpringConfig::stiff(), Duration::from_millis(1600)),
            (SpringConfig::snappy(), Duration::from_millis(1200)),
        ];
        for (config, budget) in cases {
            let scheduler = MotionScheduler::new();
            let handle = scheduler.handle();
            let mut clock = ManualClock::new(scheduler.handle());

            let mut value = MotionValue::new(&handle, config, 0.0).unwrap();
            value.set_target(100.0);
            clock.advance(budget);

            assert!(value.is_settled(), "{config:?} still moving after {budget:?}");
            assert_eq!(value.get(), 100.0);
            assert!(!scheduler.has_active());
        }
    }

    #[test]
    fn test_value_drop_removes_unit_and_fires_cancel() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();
        let cancels = Arc::new(AtomicUsize::new(0));

        {
            let mut value = MotionValue::new(&handle, SpringConfig::gentle(), 0.0).unwrap();
            let count = Arc::clone(&cancels);
            value.on_cancel(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
            value.set_target(100.0);
            scheduler.tick_at(FRAME);
            assert_eq!(scheduler.unit_count(), 1);
        }

        assert_eq!(scheduler.unit_count(), 0);
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_value_hooks_fire_in_lifecycle_order() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let mut value = MotionValue::new(&handle, SpringConfig::snappy(), 0.0).unwrap();
        let started = Arc::clone(&log);
        value.on_start(move || started.lock().unwrap().push("start"));
        let updated = Arc::clone(&log);
        value.on_update(move || updated.lock().unwrap().push("update"));
        let completed = Arc::clone(&log);
        value.on_complete(move || completed.lock().unwrap().push("complete"));

        value.set_target(10.0);
        settle(&scheduler, 240);

        let log = log.lock().unwrap();
        assert_eq!(log.first(), Some(&"start"));
        assert_eq!(log.last(), Some(&"complete"));
        assert!(log.iter().filter(|entry| **entry == "complete").count() == 1);
        assert!(log.iter().any(|entry| *entry == "update"));
    }

    #[test]
    fn test_reduced_motion_completes_value_in_one_tick() {
        let scheduler = MotionScheduler::with_reduced_motion(ReducedMotion::new(true));
        let handle = scheduler.handle();
        let completions = Arc::new(AtomicUsize::new(0));

        let mut value = MotionValue::new(&handle, SpringConfig::gentle(), 0.0).unwrap();
        let count = Arc::clone(&completions);
        value.on_complete(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        value.set_target(100.0);

        scheduler.tick_at(FRAME);

        assert_eq!(value.get(), 100.0);
        assert!(value.is_settled());
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_group_validates_and_routes_channels() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();

        let mut group = MotionGroup::new(
            &handle,
            vec![
                ChannelSpec::new("x", 0.0, SpringConfig::stiff()),
                ChannelSpec::new("y", 10.0, SpringConfig::stiff()),
            ],
            SettlePolicy::AllSettled,
        )
        .unwrap();

        // Reads work before anything registers
        assert_eq!(scheduler.unit_count(), 0);
        assert_eq!(group.value("y"), Some(10.0));
        assert!(group.contains("x"));

        assert_eq!(
            group.set_target("z", 1.0).unwrap_err(),
            MotionError::UnknownChannel("z".into())
        );

        group.set_targets(&[("x", 40.0), ("y", -10.0)]).unwrap();
        assert_eq!(scheduler.unit_count(), 1);
        settle(&scheduler, 300);

        assert_eq!(group.value("x"), Some(40.0));
        assert_eq!(group.value("y"), Some(-10.0));
        assert!(group.is_settled());
    }

    #[test]
    fn test_group_settle_hook_rearms_per_retarget() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();
        let mut clock = ManualClock::new(scheduler.handle());
        let settles = Arc::new(AtomicUsize::new(0));

        let mut group = MotionGroup::new(
            &handle,
            vec![
                ChannelSpec::new("x", 0.0, SpringConfig::snappy()),
                ChannelSpec::new("y", 0.0, SpringConfig::snappy()),
            ],
            SettlePolicy::AllSettled,
        )
        .unwrap();
        let count = Arc::clone(&settles);
        group.on_settle(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        group.set_targets(&[("x", 30.0), ("y", -30.0)]).unwrap();
        clock.advance(Duration::from_secs(2));
        assert!(group.is_settled());
        assert_eq!(settles.load(Ordering::SeqCst), 1);

        // A fresh retarget re-arms the settle hook
        group.set_target("x", 90.0).unwrap();
        clock.advance(Duration::from_secs(2));
        assert_eq!(group.value("x"), Some(90.0));
        assert_eq!(settles.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_sequence_handle_runs_chain_to_completion() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();
        let completions = Arc::new(AtomicUsize::new(0));

        let sequence = SequenceBuilder::new()
            .step(
                "rise",
                StepWork::spring(Spring::new(SpringConfig::stiff(), 0.0).unwrap(), 12.0),
            )
            .step_after(
                "fade",
                &["rise"],
                StepWork::spring(Spring::new(SpringConfig::stiff(), 1.0).unwrap(), 0.0),
            )
            .build()
            .unwrap();
        let sequence = SequenceHandle::new(&handle, sequence);
        let count = Arc::clone(&completions);
        sequence.on_complete(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        // Registered but idle until started
        scheduler.tick_at(FRAME);
        assert_eq!(sequence.status(), Some(SequenceStatus::Idle));
        assert_eq!(scheduler.active_count(), 0);

        sequence.start();
        settle(&scheduler, 600);

        assert_eq!(sequence.status(), Some(SequenceStatus::Complete));
        assert_eq!(sequence.step_position("rise"), Some(12.0));
        assert_eq!(sequence.step_position("fade"), Some(0.0));
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_on_completion_tick_suppresses_step_callback() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();

        let step_hooks = Arc::new(AtomicUsize::new(0));
        let cancels = Arc::new(AtomicUsize::new(0));
        let sequence_slot: Arc<Mutex<Option<UnitId>>> = Arc::new(Mutex::new(None));

        // The killer unit is registered first, so its update hook fires
        // before the sequence's queued step callback each tick
        let killer_handle = handle.clone();
        let killer_slot = Arc::clone(&sequence_slot);
        let killer_ticks = Arc::new(AtomicUsize::new(0));
        let killer_count = Arc::clone(&killer_ticks);
        let killer = handle.register_callback(move |_| true).unwrap();
        handle.with_unit_hooks(killer, |hooks| {
            hooks.on_update = Some(Arc::new(move || {
                // The delay step completes on the fourth tick
                if killer_count.fetch_add(1, Ordering::SeqCst) + 1 == 4 {
                    if let Some(id) = *killer_slot.lock().unwrap() {
                        killer_handle.cancel_sequence(id);
                    }
                }
            }));
        });

        let hook_count = Arc::clone(&step_hooks);
        let sequence = SequenceBuilder::new()
            .step("blink", StepWork::delay(Duration::from_millis(50)))
            .step("tail", StepWork::delay(Duration::from_secs(5)))
            .on_step_complete("blink", move || {
                hook_count.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();
        let sequence = SequenceHandle::new(&handle, sequence);
        let cancel_count = Arc::clone(&cancels);
        sequence.on_cancel(move || {
            cancel_count.fetch_add(1, Ordering::SeqCst);
        });
        *sequence_slot.lock().unwrap() = Some(sequence.unit_id().unwrap());
        sequence.start();

        settle(&scheduler, 6);

        assert_eq!(sequence.status(), Some(SequenceStatus::Cancelled));
        assert_eq!(sequence.step_status("blink"), Some(StepStatus::Complete));
        assert_eq!(sequence.step_status("tail"), Some(StepStatus::Cancelled));
        // The step completed on the cancel tick, but its queued callback
        // must not fire after the cancel
        assert_eq!(step_hooks.load(Ordering::SeqCst), 0);
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancelled_sequence_emits_nothing_on_later_ticks() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();
        let mut clock = ManualClock::new(scheduler.handle());

        let updates = Arc::new(AtomicUsize::new(0));
        let step_hooks = Arc::new(AtomicUsize::new(0));

        let hook_count = Arc::clone(&step_hooks);
        let sequence = SequenceBuilder::new()
            .step(
                "drift",
                StepWork::spring(Spring::new(SpringConfig::gentle(), 0.0).unwrap(), 400.0),
            )
            .step_after("hold", &["drift"], StepWork::delay(Duration::from_millis(400)))
            .on_step_complete("drift", move || {
                hook_count.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();
        let sequence = SequenceHandle::new(&handle, sequence);
        let update_count = Arc::clone(&updates);
        handle.with_unit_hooks(sequence.unit_id().unwrap(), |hooks| {
            hooks.on_update = Some(Arc::new(move || {
                update_count.fetch_add(1, Ordering::SeqCst);
            }));
        });

        sequence.start();
        clock.advance(Duration::from_millis(200));
        let before = updates.load(Ordering::SeqCst);
        assert!(before > 0);
        assert_eq!(sequence.status(), Some(SequenceStatus::Running));

        sequence.cancel();
        clock.advance(Duration::from_secs(2));

        // The clock kept running; the cancelled sequence stayed silent
        assert_eq!(updates.load(Ordering::SeqCst), before);
        assert_eq!(step_hooks.load(Ordering::SeqCst), 0);
        assert_eq!(sequence.step_status("drift"), Some(StepStatus::Cancelled));
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn test_world_handle_owns_bodies() {
        let scheduler = MotionScheduler::new();
        let handle = scheduler.handle();

        let world = WorldHandle::with_defaults(&handle);
        let puck = world
            .add_body(Body::circle(Vec2::ZERO, 8.0).with_velocity(Vec2::new(60.0, 0.0)))
            .unwrap()
            .unwrap();
        assert_eq!(world.body_count(), 1);
        assert!(world
            .add_body(Body::circle(Vec2::ZERO, -1.0))
            .unwrap_err()
            .is_config());

        settle(&scheduler, 30);
        assert!(world.position(puck).unwrap().x > 0.0);

        drop(world);
        assert_eq!(scheduler.unit_count(), 0);
    }
}
