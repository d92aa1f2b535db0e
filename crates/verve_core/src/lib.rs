//! Verve Core Primitives
//!
//! This crate provides the host-facing primitives shared by the Verve motion
//! engine and the applications embedding it:
//!
//! - **Geometry**: 2D vectors and rectangles for positions, velocities, and
//!   bounds
//! - **Reduced Motion**: the accessibility signal hosts hand to the engine
//!
//! # Example
//!
//! ```rust
//! use verve_core::{ReducedMotion, Vec2};
//!
//! let v = Vec2::new(3.0, 4.0);
//! assert_eq!(v.length(), 5.0);
//!
//! let reduced = ReducedMotion::new(false);
//! let engine_copy = reduced.clone();
//! reduced.set(true);
//! assert!(engine_copy.is_enabled());
//! ```

pub mod geometry;
pub mod reduce;

pub use geometry::{Rect, Vec2};
pub use reduce::ReducedMotion;
