//! Access control for the bridge: static allow-lists and a sliding-window
//! rate limiter. Both are pure predicates consulted by the orchestrator
//! before any state mutation.

mod allow_list;
mod rate_limit;

pub use allow_list::AllowList;
pub use rate_limit::RateLimiter;
