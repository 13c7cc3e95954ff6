//! External concerns: outbound WebSocket transport

pub mod ws_client;

pub use ws_client::{ClientOptions, ReconnectPolicy, ReconnectingConnection};
