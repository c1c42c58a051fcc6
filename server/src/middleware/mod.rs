pub mod auth;
pub mod rate_limit;

pub use auth::{AuthDecision, AuthFailure, AuthorizationGate, Principal};
pub use rate_limit::RateLimiter;
