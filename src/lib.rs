//! Content gateway library
//!
//! Authentication, rate-limiting, and permission-scoped dispatch in front
//! of a content store.

pub mod audit;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod content;
pub mod dispatch;
pub mod errors;
pub mod identity;
pub mod metrics;
pub mod rate_limit;
pub mod server;

// Re-export commonly used types for external use
pub use config::GatewayConfig;
pub use dispatch::Dispatcher;
pub use errors::{Envelope, GatewayError};
pub use identity::{Capability, CapabilitySet, Identity, IdentityDirectory};
pub use rate_limit::RateLimiter;
