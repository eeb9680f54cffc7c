//! Configuration management
//!
//! Environment-driven settings and API credential handling.

pub mod credentials;
pub mod settings;

// Re-export
pub use credentials::{Credentials, Secret};
pub use settings::{EntryMode, Settings};
