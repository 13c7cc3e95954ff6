//! WebSocket interfaces
//!
//! - `hub`: tenant rooms and the timed flush of buffered notifications
//! - `subscriber`: upgrade endpoint that binds a socket to its tenant room

pub mod hub;
pub mod subscriber;

pub use hub::{HubConfig, SharedHub, Subscriber, TenantBroadcastHub};
pub use subscriber::{ws_subscriber_handler, ConnectParams, SubscriberState};
