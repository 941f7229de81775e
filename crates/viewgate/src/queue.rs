//! Per-resource admission state: one occupant plus a FIFO of waiters.
//!
//! Invariants after every completed transition:
//! - `occupant` is `None` only if `waiting` is empty
//! - a client id appears at most once across occupant and waiters
//! - `waiting` is never reordered

use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::channel::ChannelHandle;
use crate::dispatch::Notifications;
use crate::protocol::{ChannelId, ClientId, QueueSnapshot, ServerMessage, Viewer, ViewerStatus};

/// Identifier of a contended resource (a product id, a document path, ...).
pub trait ResourceKey:
    Clone + Eq + Hash + fmt::Debug + fmt::Display + Serialize + Send + Sync + 'static
{
}

impl<T> ResourceKey for T where
    T: Clone + Eq + Hash + fmt::Debug + fmt::Display + Serialize + Send + Sync + 'static
{
}

/// One client's admission record.
#[derive(Debug)]
pub struct QueueEntry<K> {
    client_id: ClientId,
    channel: ChannelHandle<K>,
    joined_at: DateTime<Utc>,
    occupying_since: Option<DateTime<Utc>>,
}

impl<K> QueueEntry<K> {
    fn new(client_id: ClientId, channel: ChannelHandle<K>, now: DateTime<Utc>) -> Self {
        Self {
            client_id,
            channel,
            joined_at: now,
            occupying_since: None,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn channel(&self) -> &ChannelHandle<K> {
        &self.channel
    }

    /// When this entry became the occupant, if it has.
    pub fn occupying_since(&self) -> Option<DateTime<Utc>> {
        self.occupying_since
    }

    fn rebind(&mut self, channel: ChannelHandle<K>) {
        tracing::debug!(
            client_id = %self.client_id,
            old_channel = %self.channel.id(),
            new_channel = %channel.id(),
            "Rebinding queue entry to new connection"
        );
        self.channel = channel;
    }
}

/// Result of admitting a client into a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Client was already present; only its channel changed. 0 = occupant.
    Rebound { position: usize },
    /// Queue was free; client is now the occupant.
    Entered,
    /// Appended to the waiting list at this 1-based position.
    Queued { position: usize },
}

impl Admission {
    pub fn granted(&self) -> bool {
        matches!(
            self,
            Admission::Entered | Admission::Rebound { position: 0 }
        )
    }

    pub fn position(&self) -> usize {
        match self {
            Admission::Rebound { position } | Admission::Queued { position } => *position,
            Admission::Entered => 0,
        }
    }

    pub fn changes_membership(&self) -> bool {
        !matches!(self, Admission::Rebound { .. })
    }
}

/// Result of removing a client from a queue.
#[derive(Debug)]
pub enum Removal<K> {
    Absent,
    Waiter {
        entry: QueueEntry<K>,
        /// 1-based position the waiter held.
        position: usize,
    },
    Occupant {
        entry: QueueEntry<K>,
        promoted: Option<ClientId>,
    },
}

/// Read-only snapshot of one resource queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus<K> {
    pub resource_key: K,
    pub occupied: bool,
    pub occupant_id: Option<ClientId>,
    pub waiting_count: usize,
    pub waiting_ids: Vec<ClientId>,
}

impl<K> QueueStatus<K> {
    /// Snapshot of a resource nobody has asked for yet.
    pub fn empty(resource_key: K) -> Self {
        Self {
            resource_key,
            occupied: false,
            occupant_id: None,
            waiting_count: 0,
            waiting_ids: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct ResourceQueue<K> {
    resource_key: K,
    occupant: Option<QueueEntry<K>>,
    waiting: VecDeque<QueueEntry<K>>,
}

impl<K: ResourceKey> ResourceQueue<K> {
    pub fn new(resource_key: K) -> Self {
        Self {
            resource_key,
            occupant: None,
            waiting: VecDeque::new(),
        }
    }

    pub fn occupant(&self) -> Option<&QueueEntry<K>> {
        self.occupant.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.occupant.is_none() && self.waiting.is_empty()
    }

    fn waiting_index(&self, client_id: &ClientId) -> Option<usize> {
        self.waiting.iter().position(|e| &e.client_id == client_id)
    }

    fn is_occupant(&self, client_id: &ClientId) -> bool {
        self.occupant
            .as_ref()
            .is_some_and(|e| &e.client_id == client_id)
    }

    fn entry(&self, client_id: &ClientId) -> Option<&QueueEntry<K>> {
        self.occupant
            .iter()
            .chain(self.waiting.iter())
            .find(|e| &e.client_id == client_id)
    }

    /// Whether `client_id` is present and still bound to `channel`.
    pub fn is_bound_to(&self, client_id: &ClientId, channel: ChannelId) -> bool {
        self.entry(client_id)
            .is_some_and(|e| e.channel.id() == channel)
    }

    pub fn admit(
        &mut self,
        client_id: ClientId,
        channel: ChannelHandle<K>,
        now: DateTime<Utc>,
    ) -> Admission {
        if let Some(occupant) = self.occupant.as_mut()
            && occupant.client_id == client_id
        {
            occupant.rebind(channel);
            return Admission::Rebound { position: 0 };
        }

        if let Some(index) = self.waiting_index(&client_id) {
            self.waiting[index].rebind(channel);
            return Admission::Rebound {
                position: index + 1,
            };
        }

        let mut entry = QueueEntry::new(client_id, channel, now);
        if self.occupant.is_none() {
            entry.occupying_since = Some(now);
            self.occupant = Some(entry);
            return Admission::Entered;
        }

        self.waiting.push_back(entry);
        Admission::Queued {
            position: self.waiting.len(),
        }
    }

    /// Remove `client_id` wherever it is, promoting the head waiter if the
    /// occupant left.
    pub fn remove(&mut self, client_id: &ClientId, now: DateTime<Utc>) -> Removal<K> {
        if self.is_occupant(client_id) {
            let Some(entry) = self.occupant.take() else {
                return Removal::Absent;
            };
            let promoted = self.promote(now);
            return Removal::Occupant { entry, promoted };
        }

        match self.waiting_index(client_id) {
            Some(index) => match self.waiting.remove(index) {
                Some(entry) => Removal::Waiter {
                    entry,
                    position: index + 1,
                },
                None => Removal::Absent,
            },
            None => Removal::Absent,
        }
    }

    fn promote(&mut self, now: DateTime<Utc>) -> Option<ClientId> {
        debug_assert!(self.occupant.is_none(), "promote with occupant present");
        let mut next = self.waiting.pop_front()?;
        next.occupying_since = Some(now);
        let id = next.client_id.clone();
        self.occupant = Some(next);
        Some(id)
    }

    /// Whether the occupant has held the resource for at least `limit`.
    pub fn occupant_expired(&self, now: DateTime<Utc>, limit: chrono::Duration) -> bool {
        self.occupant
            .as_ref()
            .and_then(|e| e.occupying_since)
            .is_some_and(|since| now.signed_duration_since(since) >= limit)
    }

    pub fn status(&self) -> QueueStatus<K> {
        QueueStatus {
            resource_key: self.resource_key.clone(),
            occupied: self.occupant.is_some(),
            occupant_id: self.occupant.as_ref().map(|e| e.client_id.clone()),
            waiting_count: self.waiting.len(),
            waiting_ids: self.waiting.iter().map(|e| e.client_id.clone()).collect(),
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot<K> {
        let occupant = self.occupant.iter().map(|e| (e, 0, ViewerStatus::Viewing));
        let waiters = self
            .waiting
            .iter()
            .enumerate()
            .map(|(i, e)| (e, i + 1, ViewerStatus::Waiting));

        let viewers: Vec<Viewer> = occupant
            .chain(waiters)
            .map(|(e, position, status)| Viewer {
                client_id: e.client_id.clone(),
                joined_at: e.joined_at,
                position,
                status,
            })
            .collect();

        QueueSnapshot {
            resource_key: self.resource_key.clone(),
            total_count: viewers.len(),
            viewers,
        }
    }

    /// Position update plus full listing for every current member.
    pub fn broadcast(&self) -> Notifications<K> {
        let mut notifications = Notifications::new();
        let snapshot = self.snapshot();

        let members = self
            .occupant
            .iter()
            .chain(self.waiting.iter())
            .enumerate();
        for (position, entry) in members {
            notifications.push(
                entry.client_id.clone(),
                entry.channel.clone(),
                ServerMessage::queue_update(position),
            );
            notifications.push(
                entry.client_id.clone(),
                entry.channel.clone(),
                ServerMessage::QueueList {
                    data: snapshot.clone(),
                },
            );
        }

        notifications
    }

    /// `enter_allowed` for `client_id`, if it is the current occupant.
    pub fn enter_allowed(&self, client_id: &ClientId) -> Notifications<K> {
        let mut notifications = Notifications::new();
        if let Some(occupant) = self.occupant.as_ref()
            && &occupant.client_id == client_id
        {
            notifications.push(
                occupant.client_id.clone(),
                occupant.channel.clone(),
                ServerMessage::enter_allowed(self.resource_key.clone()),
            );
        }
        notifications
    }
}
