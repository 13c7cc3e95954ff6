//! HTTP interfaces
//!
//! - `health`: liveness plus hub counters
//! - `metrics`: Prometheus scrape endpoint and request metrics middleware
//! - `router`: routes, Swagger documentation and middleware stack

pub mod health;
pub mod metrics;
pub mod router;

pub use router::{create_router, ApiDoc, RouterState};
