pub mod notifications;

// Re-export key types for convenience
pub use notifications::{ChangeNotifier, Enqueued, NotificationBuffer, SessionHashInvalidator};
