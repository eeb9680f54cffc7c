// Library exports for volscalp

pub mod error;

pub mod binance; // REST client, wire types, rate limiter
pub mod config; // Settings and credentials
pub mod engine; // Event dispatcher / orchestrator
pub mod market; // Volume bars and indicator kernels
pub mod oms; // Order state machine and gateway seam
pub mod risk; // Circuit breaker and position sizing
pub mod signal; // Signal engine, regime, sweep, CVD
pub mod transport; // Market and user WebSocket streams
