//! Spring physics solver
//!
//! RK4-integrated damped harmonic oscillator driving one scalar channel.
//! Configurations are validated when a channel is created, never
//! mid-animation; presets cover the common motion profiles.

use crate::error::{MotionError, Result};

/// Configuration for a spring channel
///
/// `precision` is the settle tolerance applied to both the distance from
/// target and the velocity magnitude, in the host's value units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpringConfig {
    pub stiffness: f32,
    pub damping: f32,
    pub mass: f32,
    pub precision: f32,
}

/// Default settle tolerance, in value units
pub const DEFAULT_PRECISION: f32 = 0.01;

impl SpringConfig {
    /// Create a configuration with the default precision
    pub fn new(stiffness: f32, damping: f32, mass: f32) -> Self {
        Self {
            stiffness,
            damping,
            mass,
            precision: DEFAULT_PRECISION,
        }
    }

    /// Override the settle tolerance
    pub fn with_precision(mut self, precision: f32) -> Self {
        self.precision = precision;
        self
    }

    /// A soft, slow spring (page transitions, large panels)
    ///
    /// A 100-unit move settles in roughly 1.7 s.
    pub fn gentle() -> Self {
        Self::new(120.0, 14.0, 1.0)
    }

    /// A spring with visible overshoot (playful UI)
    ///
    /// A 100-unit move settles in roughly 2 s.
    pub fn bouncy() -> Self {
        Self::new(180.0, 12.0, 1.0)
    }

    /// A firm spring with slight overshoot (buttons, toggles)
    ///
    /// A 100-unit move settles in roughly 0.8 s. This is the default.
    pub fn stiff() -> Self {
        Self::new(400.0, 30.0, 1.0)
    }

    /// A very firm spring with minimal oscillation (cursor-chasing UI)
    ///
    /// A 100-unit move settles in roughly 0.6 s.
    pub fn snappy() -> Self {
        Self::new(600.0, 40.0, 1.0)
    }

    /// Look up a preset by name
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "gentle" => Some(Self::gentle()),
            "bouncy" => Some(Self::bouncy()),
            "stiff" => Some(Self::stiff()),
            "snappy" => Some(Self::snappy()),
            _ => None,
        }
    }

    /// Calculate critical damping for this spring's stiffness and mass
    pub fn critical_damping(&self) -> f32 {
        2.0 * (self.stiffness * self.mass).sqrt()
    }

    /// Check if the spring is underdamped (will oscillate)
    pub fn is_underdamped(&self) -> bool {
        self.damping < self.critical_damping()
    }

    /// Check if the spring is critically damped (no oscillation, fastest settling)
    pub fn is_critically_damped(&self) -> bool {
        (self.damping - self.critical_damping()).abs() < 0.01
    }

    /// Check if the spring is overdamped (slow settling, no oscillation)
    pub fn is_overdamped(&self) -> bool {
        self.damping > self.critical_damping()
    }

    /// Validate the physics parameters
    ///
    /// Rejects non-positive stiffness or mass, negative damping or precision,
    /// and non-finite values. Called by every constructor that accepts a
    /// config, so an invalid channel can never be created.
    pub fn validate(&self) -> Result<()> {
        if !self.stiffness.is_finite()
            || !self.damping.is_finite()
            || !self.mass.is_finite()
            || !self.precision.is_finite()
        {
            return Err(MotionError::Config(
                "spring parameters must be finite".into(),
            ));
        }
        if self.stiffness <= 0.0 {
            return Err(MotionError::Config(format!(
                "stiffness must be positive, got {}",
                self.stiffness
            )));
        }
        if self.mass <= 0.0 {
            return Err(MotionError::Config(format!(
                "mass must be positive, got {}",
                self.mass
            )));
        }
        if self.damping < 0.0 {
            return Err(MotionError::Config(format!(
                "damping must not be negative, got {}",
                self.damping
            )));
        }
        if self.precision <= 0.0 {
            return Err(MotionError::Config(format!(
                "precision must be positive, got {}",
                self.precision
            )));
        }
        Ok(())
    }
}

impl Default for SpringConfig {
    fn default() -> Self {
        Self::stiff()
    }
}

/// Lifecycle status of a spring channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Created but not yet asked to move
    Idle,
    /// Moving toward its target
    Running,
    /// At rest at its target
    Settled,
}

/// A single spring-driven scalar channel
///
/// Owned by exactly one container (a scheduler unit, a composite, or a
/// sequence step) and stepped at most once per tick. Retargeting mid-flight
/// keeps the current position and velocity, so interrupted motion stays
/// continuous.
#[derive(Clone, Copy, Debug)]
pub struct Spring {
    config: SpringConfig,
    position: f32,
    velocity: f32,
    target: f32,
    status: ChannelStatus,
    /// Whether the settle tolerances held at the end of the previous tick.
    /// Settling requires them to hold for one full tick, not one sample.
    within_tolerance: bool,
}

impl Spring {
    /// Create a channel at rest at `initial`
    ///
    /// Fails with a configuration error if the config is invalid; an invalid
    /// channel is never created and nothing mid-animation can raise this.
    pub fn new(config: SpringConfig, initial: f32) -> Result<Self> {
        config.validate()?;
        if !initial.is_finite() {
            return Err(MotionError::Config(format!(
                "initial position must be finite, got {initial}"
            )));
        }
        Ok(Self {
            config,
            position: initial,
            velocity: 0.0,
            target: initial,
            status: ChannelStatus::Idle,
            within_tolerance: false,
        })
    }

    pub fn position(&self) -> f32 {
        self.position
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn config(&self) -> SpringConfig {
        self.config
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    /// Check if the channel is at rest at its target
    pub fn is_settled(&self) -> bool {
        self.status == ChannelStatus::Settled
    }

    /// Check if the channel is moving toward its target
    pub fn is_animating(&self) -> bool {
        self.status == ChannelStatus::Running
    }

    /// Retarget the channel, keeping its current position and velocity
    ///
    /// Non-finite targets are ignored with a warning so a bad input event
    /// can never poison a running solver.
    pub fn set_target(&mut self, target: f32) {
        if !target.is_finite() {
            tracing::warn!(requested = target, "ignoring non-finite spring target");
            return;
        }
        self.target = target;
        self.status = ChannelStatus::Running;
        self.within_tolerance = false;
    }

    /// Jump to `value` immediately: position snaps, velocity resets, and the
    /// channel reports settled without waiting for a tick
    pub fn snap_to(&mut self, value: f32) {
        if !value.is_finite() {
            tracing::warn!(value, "ignoring non-finite snap value");
            return;
        }
        self.position = value;
        self.target = value;
        self.velocity = 0.0;
        self.status = ChannelStatus::Settled;
        self.within_tolerance = true;
    }

    /// Seed the channel with a velocity, keeping position and target
    ///
    /// Used by interaction release to carry pointer momentum into the spring.
    pub fn set_velocity(&mut self, velocity: f32) {
        if !velocity.is_finite() {
            tracing::warn!(velocity, "ignoring non-finite spring velocity");
            return;
        }
        self.velocity = velocity;
        if velocity != 0.0 {
            self.status = ChannelStatus::Running;
            self.within_tolerance = false;
        }
    }

    /// Step the solver by `dt` seconds using RK4 integration
    ///
    /// Settling requires the position and velocity tolerances to hold for
    /// one full tick; the settled channel is then pinned exactly to target.
    pub fn step(&mut self, dt: f32) {
        if self.status != ChannelStatus::Running {
            return;
        }

        let k1_v = self.acceleration(self.position, self.velocity);
        let k1_x = self.velocity;

        let k2_v = self.acceleration(
            self.position + k1_x * dt * 0.5,
            self.velocity + k1_v * dt * 0.5,
        );
        let k2_x = self.velocity + k1_v * dt * 0.5;

        let k3_v = self.acceleration(
            self.position + k2_x * dt * 0.5,
            self.velocity + k2_v * dt * 0.5,
        );
        let k3_x = self.velocity + k2_v * dt * 0.5;

        let k4_v = self.acceleration(self.position + k3_x * dt, self.velocity + k3_v * dt);
        let k4_x = self.velocity + k3_v * dt;

        self.velocity += (k1_v + 2.0 * k2_v + 2.0 * k3_v + k4_v) * dt / 6.0;
        self.position += (k1_x + 2.0 * k2_x + 2.0 * k3_x + k4_x) * dt / 6.0;

        let within = (self.position - self.target).abs() < self.config.precision
            && self.velocity.abs() < self.config.precision;

        if within && self.within_tolerance {
            self.position = self.target;
            self.velocity = 0.0;
            self.status = ChannelStatus::Settled;
        }
        self.within_tolerance = within;
    }

    fn acceleration(&self, x: f32, v: f32) -> f32 {
        let spring_force = -self.config.stiffness * (x - self.target);
        let damping_force = -self.config.damping * v;
        (spring_force + damping_force) / self.config.mass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 60.0;

    #[test]
    fn test_spring_settles_to_target() {
        let mut spring = Spring::new(SpringConfig::stiff(), 0.0).unwrap();
        spring.set_target(100.0);

        // Documented settle time for stiff is ~0.8 s; give it 1.5 s
        for _ in 0..90 {
            spring.step(DT);
        }

        assert!(spring.is_settled());
        assert!((spring.position() - 100.0).abs() < DEFAULT_PRECISION);
        assert_eq!(spring.velocity(), 0.0);
    }

    #[test]
    fn test_all_presets_settle_within_documented_time() {
        // (preset, documented settle seconds, tested at twice that)
        let cases = [
            (SpringConfig::gentle(), 1.7),
            (SpringConfig::bouncy(), 2.0),
            (SpringConfig::stiff(), 0.8),
            (SpringConfig::snappy(), 0.6),
        ];

        for (config, seconds) in cases {
            let mut spring = Spring::new(config, 0.0).unwrap();
            spring.set_target(100.0);

            let frames = (seconds * 2.0 * 60.0) as usize;
            for _ in 0..frames {
                spring.step(DT);
            }

            assert!(spring.is_settled(), "preset {config:?} did not settle");
            assert!((spring.position() - 100.0).abs() < config.precision);
        }
    }

    #[test]
    fn test_retarget_preserves_position_and_velocity() {
        let mut spring = Spring::new(SpringConfig::bouncy(), 0.0).unwrap();
        spring.set_target(100.0);

        for _ in 0..10 {
            spring.step(DT);
        }

        let position = spring.position();
        let velocity = spring.velocity();
        assert!(velocity > 0.0);

        // Retarget mid-flight: state carries over, no snap
        spring.set_target(-50.0);
        assert_eq!(spring.position(), position);
        assert_eq!(spring.velocity(), velocity);
        assert!(spring.is_animating());
    }

    #[test]
    fn test_critically_damped_never_overshoots() {
        let config = SpringConfig::new(400.0, 40.0, 1.0);
        assert!(config.is_critically_damped());

        let mut spring = Spring::new(config, 0.0).unwrap();
        spring.set_target(100.0);

        let mut previous = 0.0f32;
        for _ in 0..300 {
            spring.step(DT);
            assert!(
                spring.position() <= 100.0 + 1e-3,
                "overshoot at {}",
                spring.position()
            );
            assert!(
                spring.position() >= previous - 1e-3,
                "position moved backwards"
            );
            previous = spring.position();
        }
        assert!(spring.is_settled());
    }

    #[test]
    fn test_invalid_config_rejected_at_creation() {
        assert!(Spring::new(SpringConfig::new(0.0, 10.0, 1.0), 0.0).is_err());
        assert!(Spring::new(SpringConfig::new(-5.0, 10.0, 1.0), 0.0).is_err());
        assert!(Spring::new(SpringConfig::new(100.0, -1.0, 1.0), 0.0).is_err());
        assert!(Spring::new(SpringConfig::new(100.0, 10.0, 0.0), 0.0).is_err());
        assert!(Spring::new(SpringConfig::new(100.0, f32::NAN, 1.0), 0.0).is_err());
        assert!(Spring::new(SpringConfig::stiff(), f32::INFINITY).is_err());

        let err = Spring::new(SpringConfig::new(100.0, 10.0, -2.0), 0.0).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_snap_to_settles_immediately() {
        let mut spring = Spring::new(SpringConfig::gentle(), 0.0).unwrap();
        spring.set_target(100.0);
        spring.step(DT);

        spring.snap_to(100.0);
        assert!(spring.is_settled());
        assert_eq!(spring.position(), 100.0);
        assert_eq!(spring.velocity(), 0.0);
    }

    #[test]
    fn test_settle_requires_one_full_tick() {
        // Tolerance wide enough that the spring is inside it from the start
        let config = SpringConfig::stiff().with_precision(10.0);
        let mut spring = Spring::new(config, 0.0).unwrap();
        spring.set_target(1.0);

        spring.step(DT);
        assert!(!spring.is_settled(), "settled after a single sample");

        spring.step(DT);
        assert!(spring.is_settled(), "tolerances held for a full tick");
        assert_eq!(spring.position(), 1.0);
    }

    #[test]
    fn test_non_finite_target_ignored() {
        let mut spring = Spring::new(SpringConfig::stiff(), 5.0).unwrap();
        spring.set_target(f32::NAN);
        assert_eq!(spring.target(), 5.0);
        assert_eq!(spring.status(), ChannelStatus::Idle);
    }

    #[test]
    fn test_set_velocity_wakes_settled_spring() {
        let mut spring = Spring::new(SpringConfig::stiff(), 100.0).unwrap();
        spring.snap_to(100.0);
        assert!(spring.is_settled());

        spring.set_velocity(300.0);
        assert!(spring.is_animating());

        spring.step(DT);
        assert!(spring.position() > 100.0);

        // With no retarget it is pulled back and settles at the old target
        for _ in 0..180 {
            spring.step(DT);
        }
        assert!(spring.is_settled());
        assert!((spring.position() - 100.0).abs() < DEFAULT_PRECISION);
    }

    #[test]
    fn test_rk4_stable_at_clamped_delta() {
        // 1/30 s is the largest delta the scheduler will ever hand a unit
        let mut spring = Spring::new(SpringConfig::snappy(), 0.0).unwrap();
        spring.set_target(1000.0);

        for _ in 0..120 {
            spring.step(1.0 / 30.0);
            assert!(spring.position().is_finite());
            assert!(spring.position() > -500.0 && spring.position() < 2000.0);
        }
        assert!(spring.is_settled());
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!(SpringConfig::preset("gentle"), Some(SpringConfig::gentle()));
        assert_eq!(SpringConfig::preset("snappy"), Some(SpringConfig::snappy()));
        assert_eq!(SpringConfig::preset("elastic"), None);
    }

    #[test]
    fn test_damping_classification() {
        assert!(SpringConfig::gentle().is_underdamped());
        assert!(SpringConfig::bouncy().is_underdamped());
        assert!(SpringConfig::stiff().is_underdamped());
        assert!(SpringConfig::new(400.0, 40.0, 1.0).is_critically_damped());
        assert!(SpringConfig::new(400.0, 80.0, 1.0).is_overdamped());
    }
}
