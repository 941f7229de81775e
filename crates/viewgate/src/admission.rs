//! Admission controller - registry of per-resource queues.
//!
//! Every operation runs under the mutex of exactly one resource queue, so
//! unrelated resources never contend. Mutations return a [`Transition`]: the
//! outcome plus the notifications it produced. Callers pass the notifications
//! to a [`NotificationDispatcher`](crate::dispatch::NotificationDispatcher)
//! once the lock has been released.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::channel::ChannelHandle;
use crate::dispatch::Notifications;
use crate::protocol::{ChannelId, ClientId, ServerMessage};
use crate::queue::{Admission, QueueStatus, Removal, ResourceKey, ResourceQueue};

/// Outcome reported to a client that asked for admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionResult {
    pub granted: bool,
    pub position: usize,
    pub message: String,
}

impl From<Admission> for AdmissionResult {
    fn from(admission: Admission) -> Self {
        let message = match admission {
            Admission::Entered => "You entered the page.".to_string(),
            Admission::Rebound { position: 0 } => "You are already viewing this page.".to_string(),
            Admission::Rebound { position } => format!("Position {position} in queue."),
            Admission::Queued { position } => {
                format!("Someone else is viewing this page. Position {position} in queue.")
            }
        };
        Self {
            granted: admission.granted(),
            position: admission.position(),
            message,
        }
    }
}

impl<K> From<&AdmissionResult> for ServerMessage<K> {
    fn from(result: &AdmissionResult) -> Self {
        ServerMessage::Init {
            granted: result.granted,
            position: result.position,
            message: result.message.clone(),
        }
    }
}

/// Result of a state mutation together with the notifications it requires.
#[derive(Debug)]
#[must_use = "notifications must be dispatched"]
pub struct Transition<T, K> {
    pub outcome: T,
    pub notifications: Notifications<K>,
}

impl<T, K> Transition<T, K> {
    fn quiet(outcome: T) -> Self {
        Self {
            outcome,
            notifications: Notifications::new(),
        }
    }

    pub fn into_parts(self) -> (T, Notifications<K>) {
        (self.outcome, self.notifications)
    }
}

/// An occupant removed for exceeding the hold limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction<K> {
    pub resource_key: K,
    pub client_id: ClientId,
    pub promoted: Option<ClientId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Release,
    Disconnect,
}

impl Exit {
    fn as_str(&self) -> &'static str {
        match self {
            Exit::Release => "release",
            Exit::Disconnect => "disconnect",
        }
    }
}

fn lock<K>(slot: &Mutex<ResourceQueue<K>>) -> MutexGuard<'_, ResourceQueue<K>> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("Resource queue mutex poisoned - continuing with last state");
            poisoned.into_inner()
        }
    }
}

/// Process-wide registry of resource queues.
///
/// Queues are created lazily on first admission. Construct one per server and
/// share it by reference.
pub struct AdmissionController<K: ResourceKey> {
    queues: DashMap<K, Mutex<ResourceQueue<K>>>,
}

impl<K: ResourceKey> Default for AdmissionController<K> {
    fn default() -> Self {
        Self {
            queues: DashMap::new(),
        }
    }
}

impl<K: ResourceKey> AdmissionController<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` on the queue for `key`, creating it if missing.
    ///
    /// The map shard stays read-locked for the duration, so `prune_empty`
    /// cannot drop a queue that an operation is still using.
    fn with_queue<R>(&self, key: &K, f: impl FnOnce(&mut ResourceQueue<K>) -> R) -> R {
        let slot = match self.queues.get(key) {
            Some(slot) => slot,
            None => self
                .queues
                .entry(key.clone())
                .or_insert_with(|| Mutex::new(ResourceQueue::new(key.clone())))
                .downgrade(),
        };
        let mut queue = lock(slot.value());
        f(&mut queue)
    }

    fn with_existing<R>(&self, key: &K, f: impl FnOnce(&mut ResourceQueue<K>) -> R) -> Option<R> {
        let slot = self.queues.get(key)?;
        let mut queue = lock(slot.value());
        Some(f(&mut queue))
    }

    /// Admit `client_id` to `key`, or report its queue position.
    ///
    /// A client already present keeps its slot; only its channel is replaced.
    pub fn request_admission(
        &self,
        key: &K,
        client_id: ClientId,
        channel: ChannelHandle<K>,
    ) -> Transition<AdmissionResult, K> {
        let now = Utc::now();
        self.with_queue(key, |queue| {
            let admission = queue.admit(client_id.clone(), channel, now);
            match admission {
                Admission::Entered => {
                    info!(resource = %key, client_id = %client_id, "Client entered")
                }
                Admission::Queued { position } => {
                    info!(resource = %key, client_id = %client_id, position, "Client queued")
                }
                Admission::Rebound { position } => {
                    debug!(resource = %key, client_id = %client_id, position, "Client reconnected")
                }
            }

            let notifications = if admission.changes_membership() {
                queue.broadcast()
            } else {
                Notifications::new()
            };
            Transition {
                outcome: admission.into(),
                notifications,
            }
        })
    }

    /// Voluntary exit. Returns the promoted client, if the occupant left and
    /// someone was waiting. The promoted client's `enter_allowed` is included.
    pub fn release(&self, key: &K, client_id: &ClientId) -> Transition<Option<ClientId>, K> {
        self.exit(key, client_id, None, Exit::Release)
    }

    /// Exit on transport teardown. Same as [`release`](Self::release), except
    /// the caller notifies the promoted client via
    /// [`notify_promoted`](Self::notify_promoted).
    pub fn disconnect(&self, key: &K, client_id: &ClientId) -> Transition<Option<ClientId>, K> {
        self.exit(key, client_id, None, Exit::Disconnect)
    }

    /// [`disconnect`](Self::disconnect), but only if the entry is still bound
    /// to `channel`. A client that already reconnected on a newer channel is
    /// left alone.
    pub fn disconnect_channel(
        &self,
        key: &K,
        client_id: &ClientId,
        channel: ChannelId,
    ) -> Transition<Option<ClientId>, K> {
        self.exit(key, client_id, Some(channel), Exit::Disconnect)
    }

    fn exit(
        &self,
        key: &K,
        client_id: &ClientId,
        channel: Option<ChannelId>,
        exit: Exit,
    ) -> Transition<Option<ClientId>, K> {
        let now = Utc::now();
        self.with_existing(key, |queue| {
            if let Some(channel) = channel
                && !queue.is_bound_to(client_id, channel)
            {
                debug!(resource = %key, client_id = %client_id, %channel, "Stale channel, skipping exit");
                return Transition::quiet(None);
            }

            match queue.remove(client_id, now) {
                Removal::Absent => Transition::quiet(None),
                Removal::Waiter { position, .. } => {
                    info!(resource = %key, client_id = %client_id, position, exit = exit.as_str(), "Waiter left");
                    Transition {
                        outcome: None,
                        notifications: queue.broadcast(),
                    }
                }
                Removal::Occupant { promoted, .. } => {
                    info!(
                        resource = %key,
                        client_id = %client_id,
                        promoted = ?promoted.as_ref().map(ClientId::as_str),
                        exit = exit.as_str(),
                        "Occupant left"
                    );
                    let mut notifications = queue.broadcast();
                    if exit == Exit::Release
                        && let Some(next) = promoted.as_ref()
                    {
                        notifications.append(queue.enter_allowed(next));
                    }
                    Transition {
                        outcome: promoted,
                        notifications,
                    }
                }
            }
        })
        .unwrap_or_else(|| Transition::quiet(None))
    }

    /// `enter_allowed` for `client_id` if it currently occupies `key`.
    pub fn notify_promoted(&self, key: &K, client_id: &ClientId) -> Notifications<K> {
        self.with_existing(key, |queue| queue.enter_allowed(client_id))
            .unwrap_or_default()
    }

    /// Snapshot of `key`. Unknown resources report an empty queue and are not
    /// created.
    pub fn status(&self, key: &K) -> QueueStatus<K> {
        self.with_existing(key, |queue| queue.status())
            .unwrap_or_else(|| QueueStatus::empty(key.clone()))
    }

    /// Snapshots of every known resource, in no particular order.
    pub fn all_statuses(&self) -> Vec<QueueStatus<K>> {
        self.queues
            .iter()
            .map(|slot| lock(slot.value()).status())
            .collect()
    }

    pub fn resource_count(&self) -> usize {
        self.queues.len()
    }

    /// Remove every occupant that has held its resource for at least `limit`,
    /// promoting the next waiter.
    ///
    /// The evicted client gets `evicted`, the promoted one `enter_allowed`,
    /// and every remaining member a fresh broadcast.
    pub fn evict_expired(
        &self,
        now: DateTime<Utc>,
        limit: std::time::Duration,
    ) -> Transition<Vec<Eviction<K>>, K> {
        let Ok(limit) = chrono::Duration::from_std(limit) else {
            return Transition::quiet(Vec::new());
        };

        let mut evictions = Vec::new();
        let mut notifications = Notifications::new();

        for slot in self.queues.iter() {
            let mut queue = lock(slot.value());
            if !queue.occupant_expired(now, limit) {
                continue;
            }
            let Some(client_id) = queue.occupant().map(|e| e.client_id().clone()) else {
                continue;
            };
            let Removal::Occupant { entry, promoted } = queue.remove(&client_id, now) else {
                continue;
            };

            let key = slot.key().clone();
            info!(
                resource = %key,
                client_id = %client_id,
                promoted = ?promoted.as_ref().map(ClientId::as_str),
                "Occupant evicted after hold limit"
            );

            notifications.push(
                client_id.clone(),
                entry.channel().clone(),
                ServerMessage::evicted(key.clone()),
            );
            notifications.append(queue.broadcast());
            if let Some(next) = promoted.as_ref() {
                notifications.append(queue.enter_allowed(next));
            }

            evictions.push(Eviction {
                resource_key: key,
                client_id,
                promoted,
            });
        }

        Transition {
            outcome: evictions,
            notifications,
        }
    }

    /// Drop queues with no occupant and no waiters. Returns how many were
    /// removed.
    pub fn prune_empty(&self) -> usize {
        let mut pruned = 0;
        self.queues.retain(|_, slot| {
            let empty = match slot.get_mut() {
                Ok(queue) => queue.is_empty(),
                Err(poisoned) => poisoned.into_inner().is_empty(),
            };
            if empty {
                pruned += 1;
            }
            !empty
        });
        if pruned > 0 {
            debug!(pruned, "Pruned empty resource queues");
        }
        pruned
    }
}
