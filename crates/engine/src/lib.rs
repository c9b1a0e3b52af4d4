//! The decision desk: runs one full cycle per ticker, from catalyst detection
//! through evidence, economics, arm selection, planning and guardrails, and
//! records the resulting contracts.

pub mod config;
pub mod contract;
pub mod cycle;
pub mod file_data;
pub mod journal;

pub use config::{default_arms, CycleConfig, DeskConfig};
pub use contract::{ContractMetadata, DecisionContract, EvidenceEntry, PlanBlock};
pub use cycle::{CycleReport, DecisionCycle, ReplayReport};
pub use file_data::FileMarketData;
pub use journal::DecisionJournal;
