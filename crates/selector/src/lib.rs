//! Contextual strategy selection.
//!
//! A disjoint LinUCB bandit picks one [`common::ArmSpec`] per decision from
//! the cycle's [`common::ContextVector`], and learns from the realized
//! reward once the decision settles.

pub mod linucb;
pub mod store;

pub use linucb::{features, ArmSnapshot, ArmState, DIM};
pub use store::{BanditConfig, BanditStore};
