//! Collision world
//!
//! A 2D world of circle and axis-aligned rectangle bodies resolved with
//! impulses, built for overlapping UI elements rather than rigid-body
//! simulation:
//! - Spatial-hash broad phase, bucket size tuned for element-scale bodies
//! - Impulse resolution with configurable restitution (default inelastic)
//! - Positional correction so overlapping elements separate even at rest
//! - Fixed bodies (infinite mass) for container walls
//! - Deterministic: pairs resolve in ascending id order every tick
//!
//! The world settles when every body stays below the velocity threshold for
//! a full tick, and any mutation wakes it.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::error::{MotionError, Result};
use verve_core::Vec2;

/// Default cell size of the broad-phase hash, in world units
pub const DEFAULT_BUCKET_SIZE: f32 = 64.0;

/// Default velocity magnitude below which a body counts as at rest
pub const DEFAULT_SETTLE_THRESHOLD: f32 = 0.05;

// =============================================================================
// Configuration
// =============================================================================

/// Tuning for a collision world
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CollisionConfig {
    /// Bounciness in `0.0..=1.0`; 0 is fully inelastic
    pub restitution: f32,
    /// Broad-phase cell size in world units
    pub bucket_size: f32,
    /// Velocity magnitude below which a body counts as at rest
    pub settle_threshold: f32,
    /// Exponential velocity decay per second; 0 leaves momentum untouched
    pub damping: f32,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            restitution: 0.0,
            bucket_size: DEFAULT_BUCKET_SIZE,
            settle_threshold: DEFAULT_SETTLE_THRESHOLD,
            damping: 0.0,
        }
    }
}

impl CollisionConfig {
    pub fn new(restitution: f32) -> Self {
        Self {
            restitution,
            ..Self::default()
        }
    }

    pub fn with_bucket_size(mut self, bucket_size: f32) -> Self {
        self.bucket_size = bucket_size;
        self
    }

    pub fn with_settle_threshold(mut self, settle_threshold: f32) -> Self {
        self.settle_threshold = settle_threshold;
        self
    }

    pub fn with_damping(mut self, damping: f32) -> Self {
        self.damping = damping;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.restitution.is_finite() || !(0.0..=1.0).contains(&self.restitution) {
            return Err(MotionError::Config(format!(
                "restitution must be within 0.0..=1.0, got {}",
                self.restitution
            )));
        }
        if !self.bucket_size.is_finite() || self.bucket_size <= 0.0 {
            return Err(MotionError::Config(format!(
                "bucket_size must be positive, got {}",
                self.bucket_size
            )));
        }
        if !self.settle_threshold.is_finite() || self.settle_threshold <= 0.0 {
            return Err(MotionError::Config(format!(
                "settle_threshold must be positive, got {}",
                self.settle_threshold
            )));
        }
        if !self.damping.is_finite() || self.damping < 0.0 {
            return Err(MotionError::Config(format!(
                "damping must be non-negative, got {}",
                self.damping
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Bodies
// =============================================================================

/// Stable identifier of a body within one world
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(u32);

/// Collision footprint, centered on the body position
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Shape {
    Circle { radius: f32 },
    Rect { width: f32, height: f32 },
}

/// One collidable element
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Body {
    pub shape: Shape,
    pub position: Vec2,
    pub velocity: Vec2,
    /// Mass in arbitrary units; `f32::INFINITY` marks a fixed body
    pub mass: f32,
}

impl Body {
    pub fn circle(position: Vec2, radius: f32) -> Self {
        Self {
            shape: Shape::Circle { radius },
            position,
            velocity: Vec2::ZERO,
            mass: 1.0,
        }
    }

    pub fn rect(position: Vec2, width: f32, height: f32) -> Self {
        Self {
            shape: Shape::Rect { width, height },
            position,
            velocity: Vec2::ZERO,
            mass: 1.0,
        }
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_velocity(mut self, velocity: Vec2) -> Self {
        self.velocity = velocity;
        self
    }

    /// Pin the body in place: infinite mass, no motion
    pub fn fixed(mut self) -> Self {
        self.mass = f32::INFINITY;
        self.velocity = Vec2::ZERO;
        self
    }

    pub fn is_fixed(&self) -> bool {
        self.mass.is_infinite()
    }

    fn inverse_mass(&self) -> f32 {
        if self.mass.is_infinite() {
            0.0
        } else {
            1.0 / self.mass
        }
    }

    fn aabb(&self) -> (Vec2, Vec2) {
        let half = match self.shape {
            Shape::Circle { radius } => Vec2::splat(radius),
            Shape::Rect { width, height } => Vec2::new(width / 2.0, height / 2.0),
        };
        (self.position - half, self.position + half)
    }

    fn validate(&self) -> Result<()> {
        if !self.position.is_finite() || !self.velocity.is_finite() {
            return Err(MotionError::Config(
                "body position and velocity must be finite".into(),
            ));
        }
        if self.mass.is_nan() || self.mass <= 0.0 {
            return Err(MotionError::Config(format!(
                "body mass must be positive or infinite, got {}",
                self.mass
            )));
        }
        match self.shape {
            Shape::Circle { radius } => {
                if !radius.is_finite() || radius <= 0.0 {
                    return Err(MotionError::Config(format!(
                        "circle radius must be positive, got {radius}"
                    )));
                }
            }
            Shape::Rect { width, height } => {
                if !width.is_finite() || width <= 0.0 || !height.is_finite() || height <= 0.0 {
                    return Err(MotionError::Config(format!(
                        "rect extents must be positive, got {width}x{height}"
                    )));
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Contacts
// =============================================================================

/// A resolved overlap between two bodies
///
/// The normal is unit length and points from the first body toward the
/// second.
#[derive(Clone, Copy, Debug)]
struct Contact {
    normal: Vec2,
    depth: f32,
}

impl Contact {
    fn flipped(self) -> Self {
        Self {
            normal: -self.normal,
            depth: self.depth,
        }
    }
}

fn contact(a: &Body, b: &Body) -> Option<Contact> {
    match (a.shape, b.shape) {
        (Shape::Circle { radius: ra }, Shape::Circle { radius: rb }) => {
            circle_circle(a.position, ra, b.position, rb)
        }
        (
            Shape::Rect {
                width: wa,
                height: ha,
            },
            Shape::Rect {
                width: wb,
                height: hb,
            },
        ) => rect_rect(a.position, wa, ha, b.position, wb, hb),
        (Shape::Circle { radius }, Shape::Rect { width, height }) => {
            circle_rect(a.position, radius, b.position, width, height)
        }
        (Shape::Rect { width, height }, Shape::Circle { radius }) => {
            circle_rect(b.position, radius, a.position, width, height).map(Contact::flipped)
        }
    }
}

fn circle_circle(pa: Vec2, ra: f32, pb: Vec2, rb: f32) -> Option<Contact> {
    let delta = pb - pa;
    let sum = ra + rb;
    let dist_sq = delta.length_squared();
    if dist_sq >= sum * sum {
        return None;
    }
    let dist = dist_sq.sqrt();
    if dist <= 1e-6 {
        // Coincident centers: pick a fixed axis so resolution stays
        // deterministic
        return Some(Contact {
            normal: Vec2::new(1.0, 0.0),
            depth: sum,
        });
    }
    Some(Contact {
        normal: delta.scale(1.0 / dist),
        depth: sum - dist,
    })
}

fn rect_rect(pa: Vec2, wa: f32, ha: f32, pb: Vec2, wb: f32, hb: f32) -> Option<Contact> {
    let dx = pb.x - pa.x;
    let dy = pb.y - pa.y;
    let overlap_x = (wa + wb) / 2.0 - dx.abs();
    if overlap_x <= 0.0 {
        return None;
    }
    let overlap_y = (ha + hb) / 2.0 - dy.abs();
    if overlap_y <= 0.0 {
        return None;
    }
    // Separate along the shallower axis; ties go to x
    if overlap_x <= overlap_y {
        Some(Contact {
            normal: Vec2::new(dx.signum(), 0.0),
            depth: overlap_x,
        })
    } else {
        Some(Contact {
            normal: Vec2::new(0.0, dy.signum()),
            depth: overlap_y,
        })
    }
}

/// Circle against rect, normal pointing from the circle toward the rect
fn circle_rect(center: Vec2, radius: f32, rect_center: Vec2, width: f32, height: f32) -> Option<Contact> {
    let half = Vec2::new(width / 2.0, height / 2.0);
    let min = rect_center - half;
    let max = rect_center + half;
    let closest = Vec2::new(center.x.clamp(min.x, max.x), center.y.clamp(min.y, max.y));
    let delta = closest - center;
    let dist_sq = delta.length_squared();
    if dist_sq > 1e-12 {
        if dist_sq >= radius * radius {
            return None;
        }
        let dist = dist_sq.sqrt();
        return Some(Contact {
            normal: delta.scale(1.0 / dist),
            depth: radius - dist,
        });
    }
    // Center is inside the rect: push out through the nearest face
    let left = center.x - min.x;
    let right = max.x - center.x;
    let bottom = center.y - min.y;
    let top = max.y - center.y;
    let nearest = left.min(right).min(bottom).min(top);
    let normal = if nearest == left {
        Vec2::new(1.0, 0.0)
    } else if nearest == right {
        Vec2::new(-1.0, 0.0)
    } else if nearest == bottom {
        Vec2::new(0.0, 1.0)
    } else {
        Vec2::new(0.0, -1.0)
    };
    Some(Contact {
        normal,
        depth: radius + nearest,
    })
}

// =============================================================================
// World
// =============================================================================

/// A set of bodies stepped and resolved together
pub struct CollisionWorld {
    config: CollisionConfig,
    /// Bodies in id order; ids are monotonic so a push keeps the order
    bodies: Vec<(BodyId, Body)>,
    next_id: u32,
    calm_ticks: u8,
    settled: bool,
}

impl CollisionWorld {
    pub fn new(config: CollisionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            bodies: Vec::new(),
            next_id: 0,
            calm_ticks: 0,
            settled: true,
        })
    }

    pub fn with_defaults() -> Self {
        Self {
            config: CollisionConfig::default(),
            bodies: Vec::new(),
            next_id: 0,
            calm_ticks: 0,
            settled: true,
        }
    }

    pub fn config(&self) -> &CollisionConfig {
        &self.config
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Check if every body has been at rest for a full tick
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn body(&self, id: BodyId) -> Option<&Body> {
        self.index_of(id).map(|index| &self.bodies[index].1)
    }

    pub fn body_ids(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.bodies.iter().map(|(id, _)| *id)
    }

    /// Add a body, waking the world
    pub fn add_body(&mut self, body: Body) -> Result<BodyId> {
        body.validate()?;
        let id = BodyId(self.next_id);
        self.next_id += 1;
        self.bodies.push((id, body));
        self.wake();
        tracing::trace!(id = id.0, "body added");
        Ok(id)
    }

    pub fn remove_body(&mut self, id: BodyId) -> bool {
        match self.index_of(id) {
            Some(index) => {
                self.bodies.remove(index);
                self.wake();
                true
            }
            None => false,
        }
    }

    pub fn set_body_velocity(&mut self, id: BodyId, velocity: Vec2) {
        if !velocity.is_finite() {
            tracing::warn!(?velocity, "ignoring non-finite body velocity");
            return;
        }
        if let Some(index) = self.index_of(id) {
            self.bodies[index].1.velocity = velocity;
            self.wake();
        }
    }

    pub fn set_body_position(&mut self, id: BodyId, position: Vec2) {
        if !position.is_finite() {
            tracing::warn!(?position, "ignoring non-finite body position");
            return;
        }
        if let Some(index) = self.index_of(id) {
            self.bodies[index].1.position = position;
            self.wake();
        }
    }

    /// Advance the world by `dt` seconds
    pub fn step(&mut self, dt: f32) {
        self.step_with_restitution(dt, self.config.restitution);
    }

    /// Step with an explicit restitution, overriding the configured one
    pub(crate) fn step_with_restitution(&mut self, dt: f32, restitution: f32) {
        if self.settled {
            return;
        }
        if self.bodies.is_empty() {
            self.settled = true;
            return;
        }

        for (_, body) in &mut self.bodies {
            if !body.is_fixed() {
                body.position = body.position + body.velocity * dt;
            }
        }
        if self.config.damping > 0.0 {
            let decay = (-self.config.damping * dt).exp();
            for (_, body) in &mut self.bodies {
                if !body.is_fixed() {
                    body.velocity = body.velocity * decay;
                }
            }
        }

        for (i, j) in self.candidate_pairs() {
            // i < j, so the split leaves a in the left half
            let (left, right) = self.bodies.split_at_mut(j);
            let a = &mut left[i].1;
            let b = &mut right[0].1;
            if let Some(contact) = contact(a, b) {
                resolve(a, b, contact, restitution);
            }
        }

        let threshold = self.config.settle_threshold;
        let calm = self
            .bodies
            .iter()
            .all(|(_, body)| body.velocity.length() < threshold);
        if calm {
            self.calm_ticks = self.calm_ticks.saturating_add(1);
            if self.calm_ticks >= 2 {
                for (_, body) in &mut self.bodies {
                    body.velocity = Vec2::ZERO;
                }
                self.settled = true;
                tracing::debug!(bodies = self.bodies.len(), "collision world settled");
            }
        } else {
            self.calm_ticks = 0;
        }
    }

    fn wake(&mut self) {
        self.settled = false;
        self.calm_ticks = 0;
    }

    fn index_of(&self, id: BodyId) -> Option<usize> {
        self.bodies.binary_search_by_key(&id, |(id, _)| *id).ok()
    }

    /// Broad phase: bucket every body's AABB into hash cells and pair up
    /// bodies sharing a cell
    ///
    /// Pairs come out sorted ascending, which both canonicalizes each pair
    /// (lower id first) and fixes the resolution order, so a given world
    /// state always resolves identically.
    fn candidate_pairs(&self) -> Vec<(usize, usize)> {
        let bucket = self.config.bucket_size;
        let mut cells: FxHashMap<(i32, i32), SmallVec<[usize; 4]>> = FxHashMap::default();
        for (index, (_, body)) in self.bodies.iter().enumerate() {
            let (min, max) = body.aabb();
            let x0 = (min.x / bucket).floor() as i32;
            let x1 = (max.x / bucket).floor() as i32;
            let y0 = (min.y / bucket).floor() as i32;
            let y1 = (max.y / bucket).floor() as i32;
            for cx in x0..=x1 {
                for cy in y0..=y1 {
                    cells.entry((cx, cy)).or_default().push(index);
                }
            }
        }

        let mut seen: FxHashSet<(usize, usize)> = FxHashSet::default();
        for members in cells.values() {
            for (slot, &i) in members.iter().enumerate() {
                for &j in &members[slot + 1..] {
                    let pair = if i < j { (i, j) } else { (j, i) };
                    seen.insert(pair);
                }
            }
        }

        let mut pairs: Vec<(usize, usize)> = seen.into_iter().collect();
        pairs.sort_unstable();
        pairs
    }
}

/// Apply an impulse and positional correction to one contact
fn resolve(a: &mut Body, b: &mut Body, contact: Contact, restitution: f32) {
    let inv_a = a.inverse_mass();
    let inv_b = b.inverse_mass();
    let inv_sum = inv_a + inv_b;
    if inv_sum == 0.0 {
        // Two fixed bodies never move
        return;
    }

    let normal = contact.normal;
    let approach = (b.velocity - a.velocity).dot(normal);
    if approach < 0.0 {
        let impulse = -(1.0 + restitution) * approach / inv_sum;
        a.velocity = a.velocity - normal * (impulse * inv_a);
        b.velocity = b.velocity + normal * (impulse * inv_b);
    }

    // Push overlapping bodies apart even when velocities already separate,
    // weighted so the lighter body yields
    let correction = normal * (contact.depth / inv_sum);
    a.position = a.position - correction * inv_a;
    b.position = b.position + correction * inv_b;
}
