//! Analyses over `Code` units: control flow, dominance, liveness and
//! traversal orders.

pub mod cfg;
pub mod liveness;
pub mod visitor;

pub use cfg::{Cfg, DominanceGraph};
pub use liveness::LivenessIntervals;
