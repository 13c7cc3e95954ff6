//! Change notification buffering
//!
//! `NotificationBuffer` holds the two deduplicating queues, `ChangeNotifier`
//! is the façade producers enqueue through. Draining and delivery live in
//! `interfaces::ws::hub`.

pub mod buffer;
pub mod notifier;

pub use buffer::{Enqueued, NotificationBuffer};
pub use notifier::{ChangeNotifier, SessionHashInvalidator};
