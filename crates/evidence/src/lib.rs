pub mod economics;
pub mod event_study;
pub mod stats;

pub use economics::{assess, CostModel};
pub use event_study::{EventStudy, EvidenceConfig};
