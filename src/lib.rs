//! # CSMS Realtime
//!
//! Real-time change notifications for a multi-tenant EV charging
//! management system.
//!
//! ## Architecture
//!
//! - **domain**: notification types and their deduplication identities
//! - **application**: the coalescing buffer and the producer façade
//! - **infrastructure**: the outbound WebSocket client that reconnects itself
//! - **interfaces**: tenant broadcast hub, subscriber WebSocket endpoint, HTTP routes
//! - **auth**: JWT verification binding subscribers to their tenant
//! - **support**: errors and shutdown coordination

pub mod application;
pub mod auth;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod server;
pub mod support;

pub use config::{config_path_from_env, default_config_path, AppConfig};

pub use application::notifications::{ChangeNotifier, NotificationBuffer, SessionHashInvalidator};
pub use domain::notification::{Action, Entity, NotificationData};
pub use infrastructure::ws_client::{ConnectionEvent, EventKind, ReconnectPolicy, ReconnectingConnection};
pub use interfaces::ws::{SharedHub, TenantBroadcastHub};
