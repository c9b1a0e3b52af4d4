pub mod fallback;
pub mod generator;
pub mod http;
pub mod schema;

pub use fallback::{fallback_plan, position_size};
pub use generator::{PlanGenerator, PlanOutcome, PlanRequest, PlannerConfig};
pub use http::HttpTextGenerator;
