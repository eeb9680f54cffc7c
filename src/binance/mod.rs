//! Exchange integration: REST client, wire types, and the shared API
//! weight limiter.

pub mod client;
pub mod rate_limiter;
pub mod types;

pub use client::FuturesClient;
pub use rate_limiter::RateLimiter;
