pub mod policy;

pub use policy::{evaluate, PolicyContext, RiskLimits};
