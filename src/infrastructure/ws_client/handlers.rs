//! Caller handler registry
//!
//! Handlers belong to the logical session, not to one physical socket.
//! Every underlying connection dispatches through the same registry, so a
//! reconnect never requires callers to subscribe again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_tungstenite::tungstenite::Message;

use crate::support::errors::ConnectionError;

/// Events a caller can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Error,
    Close,
    Message,
    /// A scheduled reconnect fired, right before the new open
    Reconnect,
    /// The retry budget is consumed
    Maximum,
}

/// Why a reconnect was attempted
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectCause {
    Refused(ConnectionError),
    Closed { code: u16, reason: String },
}

impl std::fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Refused(err) => write!(f, "{err}"),
            Self::Closed { code, reason } if reason.is_empty() => write!(f, "closed with code {code}"),
            Self::Closed { code, reason } => write!(f, "closed with code {code}: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Open,
    Error(ConnectionError),
    Close { code: u16, reason: String },
    Message(Message),
    Reconnect(DisconnectCause),
    Maximum(DisconnectCause),
}

impl ConnectionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Error(_) => EventKind::Error,
            Self::Close { .. } => EventKind::Close,
            Self::Message(_) => EventKind::Message,
            Self::Reconnect(_) => EventKind::Reconnect,
            Self::Maximum(_) => EventKind::Maximum,
        }
    }
}

pub type Handler = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Handle returned by registration, needed to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    kind: EventKind,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(Subscription, Handler)>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        let subscription = Subscription {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
        };
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((subscription, Arc::new(handler)));
        subscription
    }

    /// Returns false if the subscription was already removed.
    pub fn off(&self, subscription: &Subscription) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(s, _)| s != subscription);
        handlers.len() != before
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(s, _)| s.kind == kind)
            .count()
    }

    /// Invoke every handler registered for the event's kind, in
    /// registration order. Handlers run outside the registry lock and may
    /// register or unregister handlers themselves.
    pub fn emit(&self, event: &ConnectionEvent) {
        let kind = event.kind();
        let matching: Vec<Handler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(s, _)| s.kind == kind)
            .map(|(_, h)| h.clone())
            .collect();
        for handler in matching {
            handler(event);
        }
    }
}
