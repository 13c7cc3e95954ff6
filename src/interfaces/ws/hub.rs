//! Tenant broadcast hub
//!
//! Owns the notification buffer, drains it on two independent timers and
//! delivers every drained notification to the room of its tenant. A room
//! is the exact set of subscribers bound to one tenant, so delivery never
//! looks at connections of another tenant.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::notifications::{ChangeNotifier, NotificationBuffer};
use crate::domain::notification::{Entity, NotificationKind};
use crate::support::shutdown::ShutdownSignal;

/// Frames a subscriber may have queued before new ones are dropped for it
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Flush periods of the two queues and the per-subscriber queue bound
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub list_interval: Duration,
    pub single_interval: Duration,
    pub subscriber_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            list_interval: Duration::from_secs(2),
            single_interval: Duration::from_secs(1),
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

/// Frame sent to subscribers: the event name plus the notification
#[derive(Debug, Serialize)]
struct Delivery<'a, T> {
    event: &'a str,
    data: &'a T,
}

type Room = HashMap<Uuid, mpsc::Sender<Arc<str>>>;

/// tenant id -> bound subscribers
#[derive(Default)]
struct Rooms {
    rooms: DashMap<String, Room>,
}

impl Rooms {
    fn join(&self, tenant_id: &str, connection_id: Uuid, sender: mpsc::Sender<Arc<str>>) {
        self.rooms
            .entry(tenant_id.to_string())
            .or_default()
            .insert(connection_id, sender);
        metrics::gauge!("notification_subscribers").set(self.subscriber_count() as f64);
    }

    fn leave(&self, tenant_id: &str, connection_id: Uuid) -> bool {
        let removed = match self.rooms.get_mut(tenant_id) {
            Some(mut room) => room.remove(&connection_id).is_some(),
            None => false,
        };
        self.rooms.remove_if(tenant_id, |_, room| room.is_empty());
        metrics::gauge!("notification_subscribers").set(self.subscriber_count() as f64);
        removed
    }

    fn subscriber_count(&self) -> usize {
        self.rooms.iter().map(|room| room.len()).sum()
    }
}

/// Membership of one connection in its tenant room. Dropping it leaves
/// the room.
pub struct Subscriber {
    connection_id: Uuid,
    tenant_id: String,
    receiver: mpsc::Receiver<Arc<str>>,
    rooms: Arc<Rooms>,
}

impl Subscriber {
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Next serialized frame; `None` once the hub has shut down.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if self.rooms.leave(&self.tenant_id, self.connection_id) {
            debug!(tenant_id = %self.tenant_id, connection_id = %self.connection_id, "Subscriber left room");
        }
    }
}

pub struct TenantBroadcastHub {
    config: HubConfig,
    buffer: Arc<NotificationBuffer>,
    rooms: Arc<Rooms>,
    flush_tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Shared, reference-counted hub
pub type SharedHub = Arc<TenantBroadcastHub>;

impl TenantBroadcastHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            buffer: Arc::new(NotificationBuffer::new()),
            rooms: Arc::new(Rooms::default()),
            flush_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn shared(config: HubConfig) -> SharedHub {
        Arc::new(Self::new(config))
    }

    /// Producer façade writing into this hub's buffer
    pub fn notifier(&self) -> ChangeNotifier {
        ChangeNotifier::new(self.buffer.clone())
    }

    pub fn pending(&self, kind: NotificationKind) -> usize {
        self.buffer.len(kind)
    }

    /// Bind a new connection to the room of `tenant_id`. Its queue holds
    /// at most `subscriber_buffer` frames.
    pub fn join(&self, tenant_id: &str) -> Subscriber {
        let connection_id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(self.config.subscriber_buffer.max(1));
        self.rooms.join(tenant_id, connection_id, sender);
        debug!(tenant_id, %connection_id, "Subscriber joined room");
        Subscriber {
            connection_id,
            tenant_id: tenant_id.to_string(),
            receiver,
            rooms: self.rooms.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.rooms.subscriber_count()
    }

    pub fn tenant_count(&self) -> usize {
        self.rooms.rooms.len()
    }

    pub fn room_size(&self, tenant_id: &str) -> usize {
        self.rooms.rooms.get(tenant_id).map_or(0, |room| room.len())
    }

    /// Send `payload` as event `event` to every subscriber of `tenant_id`.
    /// Returns the number of subscribers reached. A subscriber whose queue
    /// is full misses this frame; the others still get it.
    pub fn emit<T: Serialize>(&self, tenant_id: &str, event: &str, payload: &T) -> Result<usize, serde_json::Error> {
        let frame: Arc<str> = serde_json::to_string(&Delivery { event, data: payload })?.into();
        let Some(room) = self.rooms.rooms.get(tenant_id) else {
            return Ok(0);
        };
        let mut reached = 0;
        for (connection_id, sender) in room.iter() {
            match sender.try_send(frame.clone()) {
                Ok(()) => reached += 1,
                Err(TrySendError::Full(_)) => {
                    metrics::counter!("notifications_dropped_total").increment(1);
                    warn!(tenant_id, %connection_id, event, "Slow subscriber, frame dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(tenant_id, %connection_id, "Subscriber channel closed");
                }
            }
        }
        Ok(reached)
    }

    /// Deliver a drained batch in order. A notification that fails to
    /// serialize is logged and skipped.
    fn deliver_all<'a, T, I>(&self, kind: NotificationKind, batch: I)
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = (&'a str, Entity, &'a T)>,
    {
        for (tenant_id, entity, payload) in batch {
            self.deliver(tenant_id, entity, payload, kind);
        }
    }

    fn deliver<T: Serialize>(&self, tenant_id: &str, entity: Entity, payload: &T, kind: NotificationKind) {
        match self.emit(tenant_id, entity.as_str(), payload) {
            Ok(0) => {
                debug!(tenant_id, %entity, kind = kind.as_str(), "No subscribers for notification");
            }
            Ok(reached) => {
                metrics::counter!("notifications_delivered_total", "kind" => kind.as_str()).increment(1);
                debug!(tenant_id, %entity, reached, kind = kind.as_str(), "Notification delivered");
            }
            Err(e) => {
                error!(tenant_id, %entity, error = %e, "Failed to deliver notification");
            }
        }
    }

    /// Drain one queue and deliver its content. A failure on one
    /// notification does not stop the others.
    pub fn flush(&self, kind: NotificationKind) -> usize {
        match kind {
            NotificationKind::List => {
                let drained = self.buffer.flush_list();
                self.deliver_all(kind, drained.iter().map(|n| (n.tenant_id.as_str(), n.entity, n)));
                drained.len()
            }
            NotificationKind::Single => {
                let drained = self.buffer.flush_single();
                self.deliver_all(kind, drained.iter().map(|n| (n.tenant_id.as_str(), n.entity, n)));
                drained.len()
            }
        }
    }

    /// Start both flush loops. They stop on `shutdown` or [`stop`](Self::stop).
    pub fn start(self: &Arc<Self>, shutdown: ShutdownSignal) {
        let list = self.spawn_flush_loop(NotificationKind::List, self.config.list_interval, shutdown.clone());
        let single = self.spawn_flush_loop(NotificationKind::Single, self.config.single_interval, shutdown);
        let mut tasks = self.flush_tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.extend([list, single]);
        info!(
            list_interval_ms = self.config.list_interval.as_millis() as u64,
            single_interval_ms = self.config.single_interval.as_millis() as u64,
            "🔔 Notification flush loops started"
        );
    }

    fn spawn_flush_loop(
        self: &Arc<Self>,
        kind: NotificationKind,
        period: Duration,
        shutdown: ShutdownSignal,
    ) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            let stopped = shutdown.wait();
            tokio::pin!(stopped);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let flushed = hub.flush(kind);
                        if flushed > 0 {
                            debug!(kind = kind.as_str(), flushed, "Flushed notifications");
                        }
                    }
                    _ = &mut stopped => break,
                }
            }
            debug!(kind = kind.as_str(), "Flush loop stopped");
        })
    }

    /// Stop the flush loops, discard whatever is still queued and release
    /// every subscriber. Queued notifications are not flushed.
    pub fn stop(&self) {
        for task in self.flush_tasks.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
            task.abort();
        }
        let dropped = self.buffer.discard();
        if dropped > 0 {
            warn!(dropped, "Discarded undelivered notifications on shutdown");
        }
        self.rooms.rooms.clear();
        metrics::gauge!("notification_subscribers").set(0.0);
        info!("✅ Notification hub stopped");
    }
}
