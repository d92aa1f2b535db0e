//! Reduced-motion gate
//!
//! Adapts engine behavior to the host's reduced-motion setting while
//! preserving the callback contract: the same lifecycle events fire in the
//! same order, compressed in time. Consumers never branch on the setting.
//!
//! | Behavior           | Normal                 | Reduced             |
//! |--------------------|------------------------|---------------------|
//! | Spring retarget    | solver runs to target  | completes next tick |
//! | Composite retarget | channels run together  | completes next tick |
//! | Sequence stagger   | configured delay       | zero                |
//! | Delay step         | configured duration    | completes next tick |
//! | Collision contacts | configured restitution | restitution 0       |
//!
//! Collision overlap is still resolved under the gate; only the cosmetic
//! bounce is removed.

use std::time::Duration;

use verve_core::ReducedMotion;

/// The scheduler's view of the host's reduced-motion setting
///
/// Read once at the start of every tick; the result is carried on the tick
/// so all units stepped in one frame observe the same setting.
#[derive(Clone, Debug, Default)]
pub struct MotionGate {
    signal: ReducedMotion,
}

impl MotionGate {
    /// Gate driven by the host's accessibility signal
    pub fn new(signal: ReducedMotion) -> Self {
        Self { signal }
    }

    /// Gate that never activates (hosts without an accessibility source)
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.signal.is_enabled()
    }

    pub fn signal(&self) -> &ReducedMotion {
        &self.signal
    }
}

/// Stagger delay with the gate applied
pub fn effective_stagger(reduced: bool, configured: Duration) -> Duration {
    if reduced {
        Duration::ZERO
    } else {
        configured
    }
}

/// Contact restitution with the gate applied
pub fn effective_restitution(reduced: bool, configured: f32) -> f32 {
    if reduced {
        0.0
    } else {
        configured
    }
}
