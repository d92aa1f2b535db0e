//! Multi-channel coordination
//!
//! A composite drives several named spring channels as one logical unit:
//! one lifecycle, per-channel targets, and a single settle decision. Typical
//! use is an element animating x, y, scale, and opacity together.

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::error::{MotionError, Result};
use crate::spring::{ChannelStatus, Spring, SpringConfig};

/// When a composite reports settled
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SettlePolicy {
    /// Settled once every retargeted channel has settled
    #[default]
    AllSettled,
    /// Settled as soon as any retargeted channel settles; the remaining
    /// channels stop being stepped and hold their positions
    FirstSettled,
}

/// Declaration of one named channel
#[derive(Clone, Debug)]
pub struct ChannelSpec {
    pub name: String,
    pub initial: f32,
    pub config: SpringConfig,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>, initial: f32, config: SpringConfig) -> Self {
        Self {
            name: name.into(),
            initial,
            config,
        }
    }
}

/// A group of named spring channels sharing one lifecycle
///
/// Channels keep their declaration order, which is also the order reported
/// by [`values`](Composite::values). Retargeting a subset never disturbs the
/// other channels' motion.
#[derive(Clone, Debug)]
pub struct Composite {
    channels: IndexMap<String, Spring>,
    policy: SettlePolicy,
    status: ChannelStatus,
    /// Channels retargeted since the composite last came to rest; the settle
    /// policy is evaluated against these, not against channels that settled
    /// in an earlier generation.
    watched: SmallVec<[usize; 8]>,
}

impl Composite {
    /// Build a composite from channel declarations
    ///
    /// Every config is validated before any channel is created, so a failed
    /// build never leaves a partially constructed composite behind.
    pub fn new(specs: Vec<ChannelSpec>, policy: SettlePolicy) -> Result<Self> {
        for spec in &specs {
            spec.config.validate()?;
            if !spec.initial.is_finite() {
                return Err(MotionError::Config(format!(
                    "initial value for channel '{}' must be finite",
                    spec.name
                )));
            }
        }
        let mut channels = IndexMap::with_capacity(specs.len());
        for spec in specs {
            if channels.contains_key(&spec.name) {
                return Err(MotionError::DuplicateChannel(spec.name));
            }
            let spring = Spring::new(spec.config, spec.initial)?;
            channels.insert(spec.name, spring);
        }
        Ok(Self {
            channels,
            policy,
            status: ChannelStatus::Idle,
            watched: SmallVec::new(),
        })
    }

    pub fn policy(&self) -> SettlePolicy {
        self.policy
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// Current position of a channel
    pub fn value(&self, name: &str) -> Option<f32> {
        self.channels.get(name).map(Spring::position)
    }

    /// Current velocity of a channel
    pub fn velocity(&self, name: &str) -> Option<f32> {
        self.channels.get(name).map(Spring::velocity)
    }

    /// Current target of a channel
    pub fn target(&self, name: &str) -> Option<f32> {
        self.channels.get(name).map(Spring::target)
    }

    pub fn channel_status(&self, name: &str) -> Option<ChannelStatus> {
        self.channels.get(name).map(Spring::status)
    }

    /// Snapshot of every channel in declaration order
    pub fn values(&self) -> Vec<(String, f32)> {
        self.channels
            .iter()
            .map(|(name, spring)| (name.clone(), spring.position()))
            .collect()
    }

    /// Aggregate status under the settle policy
    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    pub fn is_settled(&self) -> bool {
        self.status == ChannelStatus::Settled
    }

    pub fn is_animating(&self) -> bool {
        self.status == ChannelStatus::Running
    }

    /// Retarget one channel, waking the composite
    pub fn set_target(&mut self, name: &str, target: f32) -> Result<()> {
        let index = self
            .channels
            .get_index_of(name)
            .ok_or_else(|| MotionError::UnknownChannel(name.to_string()))?;
        self.wake(index, |spring| spring.set_target(target));
        Ok(())
    }

    /// Retarget several channels at once
    ///
    /// Names are validated before any target is applied, so a bad name never
    /// leaves the composite partially retargeted.
    pub fn set_targets(&mut self, targets: &[(&str, f32)]) -> Result<()> {
        let mut indices: SmallVec<[usize; 8]> = SmallVec::with_capacity(targets.len());
        for (name, _) in targets {
            let index = self
                .channels
                .get_index_of(*name)
                .ok_or_else(|| MotionError::UnknownChannel(name.to_string()))?;
            indices.push(index);
        }
        for (index, (_, target)) in indices.into_iter().zip(targets) {
            self.wake(index, |spring| spring.set_target(*target));
        }
        Ok(())
    }

    /// Jump one channel to a value immediately
    pub fn snap_to(&mut self, name: &str, value: f32) -> Result<()> {
        let index = self
            .channels
            .get_index_of(name)
            .ok_or_else(|| MotionError::UnknownChannel(name.to_string()))?;
        self.wake(index, |spring| spring.snap_to(value));
        Ok(())
    }

    /// Jump every channel to its current target immediately
    ///
    /// This is the reduced-motion completion path: positions snap, velocities
    /// reset, and the composite settles without further ticks.
    pub fn snap_to_targets(&mut self) {
        for spring in self.channels.values_mut() {
            if spring.is_animating() {
                let target = spring.target();
                spring.snap_to(target);
            }
        }
        self.status = self.aggregate_status();
    }

    /// Seed one channel with a velocity (pointer release momentum)
    pub fn set_velocity(&mut self, name: &str, velocity: f32) -> Result<()> {
        let index = self
            .channels
            .get_index_of(name)
            .ok_or_else(|| MotionError::UnknownChannel(name.to_string()))?;
        self.wake(index, |spring| spring.set_velocity(velocity));
        Ok(())
    }

    /// Advance every running channel by the same delta
    ///
    /// All member channels move in the same tick; none is deferred.
    pub fn step(&mut self, dt: f32) {
        if self.status != ChannelStatus::Running {
            return;
        }
        for spring in self.channels.values_mut() {
            spring.step(dt);
        }
        self.status = self.aggregate_status();
    }

    fn wake(&mut self, index: usize, f: impl FnOnce(&mut Spring)) {
        if self.status != ChannelStatus::Running {
            // New generation: the settle policy only watches channels
            // retargeted from here on
            self.watched.clear();
        }
        if !self.watched.contains(&index) {
            self.watched.push(index);
        }
        if let Some((_, spring)) = self.channels.get_index_mut(index) {
            f(spring);
        }
        self.status = self.aggregate_status();
    }

    fn aggregate_status(&self) -> ChannelStatus {
        if self.watched.is_empty() {
            return ChannelStatus::Idle;
        }
        let mut watched = self
            .watched
            .iter()
            .filter_map(|&index| self.channels.get_index(index).map(|(_, s)| s));
        let settled = match self.policy {
            SettlePolicy::AllSettled => watched.all(|s| !s.is_animating()),
            SettlePolicy::FirstSettled => watched.any(|s| s.is_settled()),
        };
        if settled {
            ChannelStatus::Settled
        } else {
            ChannelStatus::Running
        }
    }
}
