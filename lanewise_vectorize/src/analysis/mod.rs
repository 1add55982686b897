//! Analyses run before rewriting.
//!
//! All analyses are read-only over the function they are given and are
//! recomputed whenever the function changes shape.

pub mod address;
pub mod control_flow;
pub mod liveness;
pub mod packetization;
pub mod stride;
pub mod uniformity;

pub use control_flow::{analyze_control_flow, Convergence};
pub use liveness::{Liveness, WidthAdvice};
pub use packetization::{MemoryForm, PacketizationPlan, ValuePlan};
pub use stride::{Stride, StrideInfo};
pub use uniformity::{Uniformity, UniformityInfo};
