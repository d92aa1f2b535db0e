//! Orchestration sequences
//!
//! A sequence coordinates named steps into a dependency graph:
//! - Steps own their work: a spring, a composite, a delay, or a callback
//! - `step_after` declares dependencies; a step starts only after every
//!   dependency completes
//! - `stagger` offsets steps that become ready together
//! - `parallelism` caps how many steps run at once
//! - A failed step cancels its transitive dependents; independent branches
//!   run to completion and the sequence finishes as failed
//!
//! The graph is validated when built: duplicate names, unknown dependencies,
//! and cycles are rejected before anything runs.

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::composite::Composite;
use crate::error::{MotionError, Result};
use crate::gate;
use crate::scheduler::{Hook, Tick};
use crate::spring::Spring;

// =============================================================================
// Statuses
// =============================================================================

/// Lifecycle of one step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepStatus {
    /// Waiting on dependencies
    Pending,
    /// Dependencies complete, waiting on stagger delay or a parallelism slot
    Ready,
    Running,
    Complete,
    Failed,
    /// Abandoned by a sequence cancel or a failed dependency
    Cancelled,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

/// Lifecycle of the sequence as a whole
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceStatus {
    /// Built but not started
    Idle,
    Running,
    Paused,
    Complete,
    /// At least one step failed; the rest ran to a terminal status
    Failed,
    Cancelled,
}

impl SequenceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

/// Outcome a scripted step reports each tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Running,
    Complete,
    Failed,
}

// =============================================================================
// Step work
// =============================================================================

/// Scripted step body, polled once per tick while the step runs
///
/// Polled with the scheduler lock released, so the closure may call back
/// into the scheduler like any scripted unit
pub type StepFn = Box<dyn FnMut(Tick) -> StepOutcome + Send>;

/// What a step does while it runs
pub enum StepWork {
    /// Drive an owned spring to a target; completes when it settles
    Spring { spring: Spring, target: f32 },
    /// Drive an owned composite to per-channel targets
    Composite {
        composite: Composite,
        targets: Vec<(String, f32)>,
    },
    /// Hold for a fixed duration
    Delay { remaining: Duration },
    /// Poll a callback until it reports complete or failed
    Callback(StepFn),
}

impl StepWork {
    pub fn spring(spring: Spring, target: f32) -> Self {
        Self::Spring { spring, target }
    }

    pub fn composite(composite: Composite, targets: &[(&str, f32)]) -> Self {
        Self::Composite {
            composite,
            targets: targets
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect(),
        }
    }

    pub fn delay(duration: Duration) -> Self {
        Self::Delay {
            remaining: duration,
        }
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: FnMut(Tick) -> StepOutcome + Send + 'static,
    {
        Self::Callback(Box::new(f))
    }

    /// Advance the work by one tick
    fn step(&mut self, tick: Tick) -> StepOutcome {
        match self {
            StepWork::Spring { spring, .. } => {
                if tick.reduced {
                    let target = spring.target();
                    spring.snap_to(target);
                } else {
                    spring.step(tick.dt);
                }
                if spring.is_settled() {
                    StepOutcome::Complete
                } else {
                    StepOutcome::Running
                }
            }
            StepWork::Composite { composite, .. } => {
                if tick.reduced {
                    composite.snap_to_targets();
                } else {
                    composite.step(tick.dt);
                }
                if composite.is_settled() {
                    StepOutcome::Complete
                } else {
                    StepOutcome::Running
                }
            }
            StepWork::Delay { remaining } => {
                if tick.reduced {
                    *remaining = Duration::ZERO;
                } else {
                    *remaining = remaining.saturating_sub(Duration::from_secs_f32(tick.dt));
                }
                if remaining.is_zero() {
                    StepOutcome::Complete
                } else {
                    StepOutcome::Running
                }
            }
            StepWork::Callback(f) => f(tick),
        }
    }

    /// Apply targets when the step is dispatched
    fn dispatch(&mut self, name: &str) {
        match self {
            StepWork::Spring { spring, target } => spring.set_target(*target),
            StepWork::Composite { composite, targets } => {
                let refs: SmallVec<[(&str, f32); 4]> = targets
                    .iter()
                    .map(|(channel, value)| (channel.as_str(), *value))
                    .collect();
                if let Err(error) = composite.set_targets(&refs) {
                    // Channels were validated at build, so this only trips if
                    // the composite was swapped out from under us
                    tracing::warn!(step = name, %error, "step targets rejected at dispatch");
                }
            }
            StepWork::Delay { .. } | StepWork::Callback(_) => {}
        }
    }
}

struct Step {
    depends_on: SmallVec<[usize; 2]>,
    work: StepWork,
    status: StepStatus,
    /// Stagger delay still to elapse while the step is ready
    delay: Duration,
    on_complete: Option<Hook>,
}

// =============================================================================
// Builder
// =============================================================================

struct StepSpec {
    name: String,
    depends_on: Vec<String>,
    work: StepWork,
}

/// Builds and validates a [`Sequence`]
///
/// ```
/// use std::time::Duration;
/// use verve_motion::{SequenceBuilder, Spring, SpringConfig, StepWork};
///
/// let enter = Spring::new(SpringConfig::snappy(), 0.0)?;
/// let lift = Spring::new(SpringConfig::gentle(), 0.0)?;
/// let sequence = SequenceBuilder::new()
///     .stagger(Duration::from_millis(40))
///     .step("enter", StepWork::spring(enter, 1.0))
///     .step_after("lift", &["enter"], StepWork::spring(lift, -8.0))
///     .build()?;
/// # Ok::<(), verve_motion::MotionError>(())
/// ```
#[derive(Default)]
pub struct SequenceBuilder {
    steps: Vec<StepSpec>,
    hooks: Vec<(String, Hook)>,
    parallelism: usize,
    stagger: Duration,
}

impl SequenceBuilder {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            hooks: Vec::new(),
            parallelism: usize::MAX,
            stagger: Duration::ZERO,
        }
    }

    /// Cap concurrently running steps; unlimited when unset
    pub fn parallelism(mut self, limit: usize) -> Self {
        self.parallelism = limit;
        self
    }

    /// Offset steps that become ready in the same tick
    pub fn stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    /// Add a step with no dependencies
    pub fn step(self, name: impl Into<String>, work: StepWork) -> Self {
        self.step_after(name, &[], work)
    }

    /// Add a step that starts after every named dependency completes
    pub fn step_after(mut self, name: impl Into<String>, after: &[&str], work: StepWork) -> Self {
        self.steps.push(StepSpec {
            name: name.into(),
            depends_on: after.iter().map(|dep| dep.to_string()).collect(),
            work,
        });
        self
    }

    /// Attach a completion callback to a named step
    pub fn on_step_complete<F>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.push((name.into(), Arc::new(hook)));
        self
    }

    pub fn build(self) -> Result<Sequence> {
        if self.parallelism == 0 {
            return Err(MotionError::Config(
                "parallelism must be at least 1".into(),
            ));
        }

        let mut names: FxHashMap<&str, usize> = FxHashMap::default();
        for (index, spec) in self.steps.iter().enumerate() {
            if names.insert(spec.name.as_str(), index).is_some() {
                return Err(MotionError::DuplicateStep(spec.name.clone()));
            }
        }

        let mut resolved: Vec<SmallVec<[usize; 2]>> = Vec::with_capacity(self.steps.len());
        for spec in &self.steps {
            let mut deps = SmallVec::new();
            for dependency in &spec.depends_on {
                match names.get(dependency.as_str()) {
                    Some(&index) => deps.push(index),
                    None => {
                        return Err(MotionError::UnknownDependency {
                            step: spec.name.clone(),
                            dependency: dependency.clone(),
                        })
                    }
                }
            }
            resolved.push(deps);
        }

        for spec in &self.steps {
            match &spec.work {
                StepWork::Spring { target, .. } => {
                    if !target.is_finite() {
                        return Err(MotionError::Config(format!(
                            "step '{}' has a non-finite target",
                            spec.name
                        )));
                    }
                }
                StepWork::Composite { composite, targets } => {
                    for (channel, target) in targets {
                        if !composite.contains(channel) {
                            return Err(MotionError::UnknownChannel(channel.clone()));
                        }
                        if !target.is_finite() {
                            return Err(MotionError::Config(format!(
                                "step '{}' has a non-finite target for channel '{channel}'",
                                spec.name
                            )));
                        }
                    }
                }
                StepWork::Delay { .. } | StepWork::Callback(_) => {}
            }
        }

        for (name, _) in &self.hooks {
            if !names.contains_key(name.as_str()) {
                return Err(MotionError::UnknownStep(name.clone()));
            }
        }

        detect_cycle(&self.steps, &resolved)?;

        let mut steps: IndexMap<String, Step> = IndexMap::with_capacity(self.steps.len());
        for (spec, depends_on) in self.steps.into_iter().zip(resolved) {
            steps.insert(
                spec.name,
                Step {
                    depends_on,
                    work: spec.work,
                    status: StepStatus::Pending,
                    delay: Duration::ZERO,
                    on_complete: None,
                },
            );
        }
        for (name, hook) in self.hooks {
            if let Some(step) = steps.get_mut(&name) {
                step.on_complete = Some(hook);
            }
        }

        Ok(Sequence {
            steps,
            status: SequenceStatus::Idle,
            parallelism: self.parallelism,
            stagger: self.stagger,
            running: 0,
            any_failed: false,
            events: Vec::new(),
        })
    }
}

/// Kahn's algorithm over the resolved dependency edges
fn detect_cycle(specs: &[StepSpec], deps: &[SmallVec<[usize; 2]>]) -> Result<()> {
    let len = specs.len();
    let mut in_degree = vec![0usize; len];
    let mut dependents: Vec<SmallVec<[usize; 2]>> = vec![SmallVec::new(); len];
    for (index, step_deps) in deps.iter().enumerate() {
        in_degree[index] = step_deps.len();
        for &dep in step_deps {
            dependents[dep].push(index);
        }
    }

    let mut queue: VecDeque<usize> = (0..len).filter(|&index| in_degree[index] == 0).collect();
    let mut visited = 0;
    while let Some(index) = queue.pop_front() {
        visited += 1;
        for &next in &dependents[index] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if visited < len {
        let stuck = specs
            .iter()
            .enumerate()
            .find(|(index, _)| in_degree[*index] > 0)
            .map(|(_, spec)| spec.name.clone())
            .unwrap_or_default();
        return Err(MotionError::CycleDetected(stuck));
    }
    Ok(())
}

// =============================================================================
// Sequence
// =============================================================================

/// A validated step graph driven one tick at a time
pub struct Sequence {
    steps: IndexMap<String, Step>,
    status: SequenceStatus,
    parallelism: usize,
    stagger: Duration,
    running: usize,
    any_failed: bool,
    /// Step completion hooks queued this tick, drained by the scheduler
    events: Vec<Hook>,
}

impl Sequence {
    pub fn builder() -> SequenceBuilder {
        SequenceBuilder::new()
    }

    pub fn status(&self) -> SequenceStatus {
        self.status
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, SequenceStatus::Running | SequenceStatus::Paused)
    }

    pub fn step_status(&self, name: &str) -> Option<StepStatus> {
        self.steps.get(name).map(|step| step.status)
    }

    /// Current position of a spring step's channel
    pub fn step_position(&self, name: &str) -> Option<f32> {
        match &self.steps.get(name)?.work {
            StepWork::Spring { spring, .. } => Some(spring.position()),
            _ => None,
        }
    }

    /// Current value of one channel of a composite step
    pub fn step_channel_value(&self, name: &str, channel: &str) -> Option<f32> {
        match &self.steps.get(name)?.work {
            StepWork::Composite { composite, .. } => composite.value(channel),
            _ => None,
        }
    }

    /// Begin running; an empty sequence completes immediately
    pub fn start(&mut self) {
        if self.status != SequenceStatus::Idle {
            return;
        }
        if self.steps.is_empty() {
            self.status = SequenceStatus::Complete;
            tracing::debug!("empty sequence completed on start");
            return;
        }
        self.status = SequenceStatus::Running;
        tracing::debug!(steps = self.steps.len(), "sequence started");
    }

    /// Freeze every step exactly where it is
    pub fn pause(&mut self) {
        if self.status == SequenceStatus::Running {
            self.status = SequenceStatus::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.status == SequenceStatus::Paused {
            self.status = SequenceStatus::Running;
        }
    }

    /// Cancel the sequence and every non-terminal step
    ///
    /// Returns false when the sequence had already finished, so callers can
    /// tell whether the cancel did anything. Queued completion callbacks
    /// from this tick are dropped.
    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        for step in self.steps.values_mut() {
            if !step.status.is_terminal() {
                step.status = StepStatus::Cancelled;
            }
        }
        self.running = 0;
        self.events.clear();
        self.status = SequenceStatus::Cancelled;
        tracing::debug!("sequence cancelled");
        true
    }

    /// Hand queued step-completion hooks to the scheduler's event phase
    pub fn drain_events(&mut self, sink: &mut dyn FnMut(Hook)) {
        for hook in self.events.drain(..) {
            sink(hook);
        }
    }

    /// Advance the graph by one tick
    ///
    /// Running steps are stepped first, then stagger delays count down, then
    /// steps whose dependencies completed become ready, and finally ready
    /// steps are dispatched in declaration order while the parallelism cap
    /// allows. A step dispatched this tick does its first work next tick.
    pub fn tick(&mut self, tick: Tick) {
        if self.status != SequenceStatus::Running {
            return;
        }

        let mut failures: SmallVec<[usize; 2]> = SmallVec::new();
        for index in 0..self.steps.len() {
            let Some((name, step)) = self.steps.get_index_mut(index) else {
                continue;
            };
            if step.status != StepStatus::Running {
                continue;
            }
            match step.work.step(tick) {
                StepOutcome::Running => {}
                StepOutcome::Complete => {
                    step.status = StepStatus::Complete;
                    self.running -= 1;
                    if let Some(hook) = &step.on_complete {
                        self.events.push(Arc::clone(hook));
                    }
                    tracing::trace!(step = name.as_str(), "step complete");
                }
                StepOutcome::Failed => {
                    step.status = StepStatus::Failed;
                    self.running -= 1;
                    self.any_failed = true;
                    tracing::warn!(step = name.as_str(), "sequence step failed");
                    failures.push(index);
                }
            }
        }
        for origin in failures {
            self.cancel_dependents(origin);
        }

        let dt = Duration::from_secs_f32(tick.dt);
        for step in self.steps.values_mut() {
            if step.status == StepStatus::Ready {
                step.delay = if tick.reduced {
                    Duration::ZERO
                } else {
                    step.delay.saturating_sub(dt)
                };
            }
        }

        let statuses: SmallVec<[StepStatus; 16]> =
            self.steps.values().map(|step| step.status).collect();
        let stagger = gate::effective_stagger(tick.reduced, self.stagger);
        let mut batch = 0u32;
        for index in 0..self.steps.len() {
            if statuses[index] != StepStatus::Pending {
                continue;
            }
            let ready = self.steps[index]
                .depends_on
                .iter()
                .all(|&dep| statuses[dep] == StepStatus::Complete);
            if ready {
                let step = &mut self.steps[index];
                step.status = StepStatus::Ready;
                step.delay = stagger * batch;
                batch += 1;
            }
        }

        for index in 0..self.steps.len() {
            if self.running >= self.parallelism {
                break;
            }
            let Some((name, step)) = self.steps.get_index_mut(index) else {
                continue;
            };
            if step.status == StepStatus::Ready && step.delay.is_zero() {
                step.status = StepStatus::Running;
                self.running += 1;
                tracing::trace!(step = name.as_str(), "step dispatched");
                let name = name.clone();
                step.work.dispatch(&name);
            }
        }

        if self.steps.values().all(|step| step.status.is_terminal()) {
            self.status = if self.any_failed {
                SequenceStatus::Failed
            } else {
                SequenceStatus::Complete
            };
            tracing::debug!(status = ?self.status, "sequence finished");
        }
    }

    /// Cancel every pending step that transitively depends on `origin`
    fn cancel_dependents(&mut self, origin: usize) {
        let mut doomed: FxHashSet<usize> = FxHashSet::default();
        doomed.insert(origin);
        let mut grew = true;
        while grew {
            grew = false;
            for index in 0..self.steps.len() {
                if doomed.contains(&index) {
                    continue;
                }
                let step = &self.steps[index];
                if step.status != StepStatus::Pending {
                    continue;
                }
                if step.depends_on.iter().any(|dep| doomed.contains(dep)) {
                    doomed.insert(index);
                    grew = true;
                }
            }
        }
        doomed.remove(&origin);
        for index in doomed {
            if let Some((name, step)) = self.steps.get_index_mut(index) {
                step.status = StepStatus::Cancelled;
                tracing::debug!(step = name.as_str(), "cancelled by failed dependency");
            }
        }
    }
}
