//! Deduplicating notification buffer
//!
//! Producers push change notifications here; the hub drains each queue on
//! its own timer. A notification whose dedup key is already queued is
//! merged into the earlier entry, which keeps its position.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::domain::notification::{
    ListChangeNotification, NotificationKind, SingleChangeNotification,
};

/// Result of pushing a notification into a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Appended,
    Merged,
}

/// The two queues fed by producers and drained by the flush loops.
///
/// The duplicate scan is linear in the queue length. Flush intervals keep
/// the steady-state length small, but a producer burst between two ticks
/// grows the queue without bound.
#[derive(Debug, Default)]
pub struct NotificationBuffer {
    list: Mutex<Vec<ListChangeNotification>>,
    single: Mutex<Vec<SingleChangeNotification>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl NotificationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_list_change(&self, notification: ListChangeNotification) -> Enqueued {
        let mut queue = lock(&self.list);
        let key = notification.dedup_key();
        if queue.iter().any(|queued| queued.dedup_key() == key) {
            trace!(tenant_id = %notification.tenant_id, entity = %notification.entity, "List notification merged");
            metrics::counter!("notifications_merged_total", "kind" => "list").increment(1);
            return Enqueued::Merged;
        }
        queue.push(notification);
        metrics::counter!("notifications_enqueued_total", "kind" => "list").increment(1);
        Enqueued::Appended
    }

    pub fn add_single_change(&self, notification: SingleChangeNotification) -> Enqueued {
        let mut queue = lock(&self.single);
        let key = notification.dedup_key();
        if queue.iter().any(|queued| queued.dedup_key() == key) {
            trace!(
                tenant_id = %notification.tenant_id,
                entity = %notification.entity,
                id = %notification.data.id,
                "Single notification merged"
            );
            metrics::counter!("notifications_merged_total", "kind" => "single").increment(1);
            return Enqueued::Merged;
        }
        queue.push(notification);
        metrics::counter!("notifications_enqueued_total", "kind" => "single").increment(1);
        Enqueued::Appended
    }

    /// Take every queued list notification, in insertion order.
    ///
    /// Adds racing with delivery land in the fresh queue and wait for the
    /// next tick.
    pub fn flush_list(&self) -> Vec<ListChangeNotification> {
        std::mem::take(&mut *lock(&self.list))
    }

    /// Take every queued single-record notification, in insertion order.
    pub fn flush_single(&self) -> Vec<SingleChangeNotification> {
        std::mem::take(&mut *lock(&self.single))
    }

    pub fn len(&self, kind: NotificationKind) -> usize {
        match kind {
            NotificationKind::List => lock(&self.list).len(),
            NotificationKind::Single => lock(&self.single).len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len(NotificationKind::List) == 0 && self.len(NotificationKind::Single) == 0
    }

    /// Drop everything still queued. Used on hub shutdown.
    pub fn discard(&self) -> usize {
        lock(&self.list).drain(..).count() + lock(&self.single).drain(..).count()
    }
}
