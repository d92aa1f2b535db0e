//! Pointer interaction
//!
//! Binds a pointer to the `x`/`y` channels of a composite so elements
//! respond to drags and hovers with spring motion:
//! - `Attract` trails the pointer, scaled by strength
//! - `Repel` pushes away while the pointer is inside the radius
//! - `Magnetic` snaps to the nearest snap point near the pointer
//! - `Free` never retargets; the element only picks up release momentum
//!
//! The binding only ever moves the channel targets; positions stay with the
//! springs, so an element can overshoot its bounds even though its target
//! never leaves them. Releasing the pointer drops the binding back to
//! `Free`, hands the sampled pointer velocity to the channels, and lets
//! them settle wherever their targets already are.

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::{MotionError, Result};
use crate::scheduler::{SchedulerHandle, UnitId};
use verve_core::{Rect, Vec2};

/// Default fraction of the pointer offset applied to the target
pub const DEFAULT_STRENGTH: f32 = 0.5;

/// Default interaction radius in world units
pub const DEFAULT_RADIUS: f32 = 96.0;

/// Default number of pointer samples kept for release velocity
pub const DEFAULT_SAMPLE_WINDOW: usize = 5;

/// How the bound element reacts to the pointer
#[derive(Clone, Debug, PartialEq)]
pub enum InteractionMode {
    /// Trail toward the pointer, scaled by strength
    Attract,
    /// Push away from the pointer while it is within the radius
    Repel,
    /// Snap to the nearest snap point within the radius of the pointer,
    /// trailing like `Attract` when none is near
    Magnetic { snap_points: Vec<Vec2> },
    /// No coupling while held; only the release fling reaches the channels
    Free,
}

/// Tuning for a pointer binding
#[derive(Clone, Debug, PartialEq)]
pub struct InteractionConfig {
    pub mode: InteractionMode,
    /// Fraction of the pointer offset applied to the target
    pub strength: f32,
    /// Range of repel and magnetic effects, in world units
    pub radius: f32,
    /// Pointer samples kept for the release fling
    pub sample_window: usize,
    /// Clamp applied to derived targets, never to positions
    pub bounds: Option<Rect>,
    /// Cap on how far an attract target may leave the origin
    pub max_offset: Option<f32>,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            mode: InteractionMode::Attract,
            strength: DEFAULT_STRENGTH,
            radius: DEFAULT_RADIUS,
            sample_window: DEFAULT_SAMPLE_WINDOW,
            bounds: None,
            max_offset: None,
        }
    }
}

impl InteractionConfig {
    pub fn new(mode: InteractionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_sample_window(mut self, sample_window: usize) -> Self {
        self.sample_window = sample_window;
        self
    }

    pub fn with_bounds(mut self, bounds: Rect) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_max_offset(mut self, max_offset: f32) -> Self {
        self.max_offset = Some(max_offset);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.strength.is_finite() || self.strength < 0.0 {
            return Err(MotionError::Config(format!(
                "strength must be non-negative, got {}",
                self.strength
            )));
        }
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(MotionError::Config(format!(
                "radius must be positive, got {}",
                self.radius
            )));
        }
        if self.sample_window < 2 {
            return Err(MotionError::Config(format!(
                "sample_window must hold at least 2 samples, got {}",
                self.sample_window
            )));
        }
        if let Some(max_offset) = self.max_offset {
            if !max_offset.is_finite() || max_offset <= 0.0 {
                return Err(MotionError::Config(format!(
                    "max_offset must be positive, got {max_offset}"
                )));
            }
        }
        if let InteractionMode::Magnetic { snap_points } = &self.mode {
            if snap_points.iter().any(|point| !point.is_finite()) {
                return Err(MotionError::Config(
                    "magnetic snap points must be finite".into(),
                ));
            }
        }
        Ok(())
    }
}

/// A pointer bound to the `x`/`y` channels of a composite unit
pub struct PointerBinding {
    handle: SchedulerHandle,
    unit: UnitId,
    channel_x: String,
    channel_y: String,
    config: InteractionConfig,
    /// Rest anchor that offsets and radii are measured from
    origin: Vec2,
    engaged: bool,
    samples: VecDeque<(Vec2, Duration)>,
}

impl PointerBinding {
    /// Bind the pointer to two channels of a registered composite
    ///
    /// Channel names are checked against the composite up front. A handle
    /// whose scheduler is already gone produces an inert binding instead of
    /// an error.
    pub fn bind(
        handle: &SchedulerHandle,
        unit: UnitId,
        channel_x: &str,
        channel_y: &str,
        origin: Vec2,
        config: InteractionConfig,
    ) -> Result<Self> {
        config.validate()?;
        if !origin.is_finite() {
            return Err(MotionError::Config("origin must be finite".into()));
        }
        for channel in [channel_x, channel_y] {
            match handle.composite_contains(unit, channel) {
                Some(true) => {}
                Some(false) => return Err(MotionError::UnknownChannel(channel.to_string())),
                None => {
                    if handle.is_alive() {
                        return Err(MotionError::Config(
                            "pointer binding requires a composite unit".into(),
                        ));
                    }
                }
            }
        }
        let window = config.sample_window;
        Ok(Self {
            handle: handle.clone(),
            unit,
            channel_x: channel_x.to_string(),
            channel_y: channel_y.to_string(),
            config,
            origin,
            engaged: false,
            samples: VecDeque::with_capacity(window),
        })
    }

    pub fn config(&self) -> &InteractionConfig {
        &self.config
    }

    pub fn origin(&self) -> Vec2 {
        self.origin
    }

    /// Whether the pointer is currently held
    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    /// The mode currently in effect: the configured mode while the pointer
    /// is held, `Free` once it has been released
    pub fn mode(&self) -> &InteractionMode {
        if self.engaged {
            &self.config.mode
        } else {
            &InteractionMode::Free
        }
    }

    /// Move the rest anchor, e.g. after a layout pass
    pub fn set_origin(&mut self, origin: Vec2) {
        if !origin.is_finite() {
            tracing::warn!(?origin, "ignoring non-finite origin");
            return;
        }
        self.origin = origin;
    }

    /// Feed a pointer position, retargeting the bound channels
    pub fn pointer_update(&mut self, pointer: Vec2, timestamp: Duration) -> Result<()> {
        if !pointer.is_finite() {
            tracing::warn!(?pointer, "ignoring non-finite pointer position");
            return Ok(());
        }
        self.engaged = true;
        self.samples.push_back((pointer, timestamp));
        while self.samples.len() > self.config.sample_window {
            self.samples.pop_front();
        }

        let Some(target) = self.derive_target(pointer) else {
            return Ok(());
        };
        self.handle.set_composite_targets(
            self.unit,
            &[
                (self.channel_x.as_str(), target.x),
                (self.channel_y.as_str(), target.y),
            ],
        )
    }

    /// Release the pointer, flinging the channels with the sampled velocity
    ///
    /// Targets are left where the last update put them, so the channels
    /// settle at their current targets. Without at least two distinct
    /// samples the channels keep their current velocity.
    pub fn pointer_release(&mut self, timestamp: Duration) -> Result<()> {
        self.engaged = false;
        let fling = self.sampled_velocity();
        self.samples.clear();
        let Some(velocity) = fling else {
            tracing::trace!(?timestamp, "pointer released without a usable sample window");
            return Ok(());
        };
        self.handle
            .set_composite_velocity(self.unit, &self.channel_x, velocity.x)?;
        self.handle
            .set_composite_velocity(self.unit, &self.channel_y, velocity.y)
    }

    /// Finite difference across the ends of the sample window, scaled the
    /// same way targets are
    fn sampled_velocity(&self) -> Option<Vec2> {
        let (first_position, first_time) = self.samples.front()?;
        let (last_position, last_time) = self.samples.back()?;
        let span = last_time.saturating_sub(*first_time).as_secs_f32();
        if self.samples.len() < 2 || span <= 0.0 {
            return None;
        }
        Some((*last_position - *first_position).scale(self.config.strength / span))
    }

    fn derive_target(&self, pointer: Vec2) -> Option<Vec2> {
        let raw = match &self.config.mode {
            InteractionMode::Attract => self.attract_target(pointer),
            InteractionMode::Repel => {
                let delta = pointer - self.origin;
                let dist = delta.length();
                if dist >= self.config.radius {
                    self.origin
                } else {
                    // A pointer dead on the anchor still pushes, along a
                    // fixed axis so the result is deterministic
                    let dir = if dist > 1e-6 {
                        delta.scale(1.0 / dist)
                    } else {
                        Vec2::new(1.0, 0.0)
                    };
                    self.origin - dir.scale(self.config.strength * (self.config.radius - dist))
                }
            }
            InteractionMode::Magnetic { snap_points } => {
                let nearest = snap_points
                    .iter()
                    .map(|point| (*point, point.distance(pointer)))
                    .filter(|(_, dist)| *dist <= self.config.radius)
                    .min_by(|(_, a), (_, b)| a.total_cmp(b));
                match nearest {
                    Some((point, _)) => point,
                    None => self.attract_target(pointer),
                }
            }
            InteractionMode::Free => return None,
        };
        Some(match &self.config.bounds {
            Some(bounds) => bounds.clamp(raw),
            None => raw,
        })
    }

    fn attract_target(&self, pointer: Vec2) -> Vec2 {
        let mut offset = (pointer - self.origin).scale(self.config.strength);
        if let Some(max_offset) = self.config.max_offset {
            if offset.length() > max_offset {
                offset = offset.normalize().scale(max_offset);
            }
        }
        self.origin + offset
    }
}
