pub mod fetch;
pub mod metrics_defs;
pub mod policy;
pub mod refresher;

pub use fetch::{FetchError, HttpPolicyFetcher, PolicyFetcher};
pub use policy::{SamplingDecision, SamplingPolicy, decide, random_draw};
pub use refresher::PolicyHandle;
