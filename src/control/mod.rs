//! Fleet autoscaling.
//!
//! Two independent loops read the same observables (request queue depth,
//! fleet membership) and act on the same fleet:
//!
//! ```text
//! scale-out, every tick:
//!     if pending > 0                               -> hold
//!     if depth == 0 or running + pending >= max    -> hold
//!     launch min(max - (running + pending), depth)
//!
//! scale-in, every tick:
//!     window.push(depth)            // last 3 samples
//!     if window not full or avg != 0 -> hold (streak = 0 when avg != 0)
//!     running == min: streak += 1, terminate one when streak reaches 3
//!     running >  min: streak = 0, terminate one
//! ```

pub mod scale_in;
pub mod scale_out;
pub mod window;

pub use scale_in::{ScaleInController, ScaleInDecision, ScaleInPolicy};
pub use scale_out::{HoldReason, ScaleOutController, ScaleOutDecision};
pub use window::MovingAverageWindow;
