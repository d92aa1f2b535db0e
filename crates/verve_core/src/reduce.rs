//! Reduced-motion accessibility signal
//!
//! Hosts surface the platform's "prefers reduced motion" setting through a
//! [`ReducedMotion`] handle. The handle is cheap to clone and safe to share:
//! the host writes it when the platform setting changes, the engine reads it
//! every time it starts or retargets an animation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle to the host's reduced-motion setting
///
/// All clones observe the same flag. Flipping the flag affects animations
/// started (or retargeted) afterwards as well as those already running.
#[derive(Clone, Debug, Default)]
pub struct ReducedMotion {
    flag: Arc<AtomicBool>,
}

impl ReducedMotion {
    pub fn new(enabled: bool) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        let was = self.flag.swap(enabled, Ordering::Release);
        if was != enabled {
            tracing::debug!(enabled, "reduced motion setting changed");
        }
    }
}
