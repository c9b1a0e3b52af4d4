//! Paper execution: simulated fills against forward bars, the reward loop
//! that feeds realized outcomes back to the strategy selector, and a seeded
//! synthetic market for paper runs.

pub mod reward;
pub mod simulator;
pub mod synthetic;

pub use reward::{RewardLoop, Settlement};
pub use simulator::{ExecutionSimulator, SimulatedExit};
pub use synthetic::{SyntheticMarket, SyntheticProfile};
