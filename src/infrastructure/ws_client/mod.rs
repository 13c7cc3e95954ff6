//! Outbound WebSocket client that survives connection drops

pub mod connection;
pub mod handlers;
pub mod policy;

pub use connection::{ClientOptions, ConnectionState, ReconnectingConnection, DEFAULT_LOG_TENANT};
pub use handlers::{ConnectionEvent, DisconnectCause, EventKind, HandlerRegistry, Subscription};
pub use policy::{is_normal_closure, ReconnectDecision, ReconnectPolicy, NORMAL_CLOSURE_CODES, RECONNECT_UNLIMITED};
