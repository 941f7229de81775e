//! Notification fan-out.
//!
//! State transitions produce a [`Notifications`] batch while the resource lock
//! is held; the batch is handed to [`NotificationDispatcher`] after the lock is
//! released. Delivery is best-effort: failures are counted, logged and
//! returned, never raised, and never change queue membership.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::channel::{ChannelHandle, DeliveryError};
use crate::protocol::{ClientId, ServerMessage};

/// A message addressed to one queue member.
#[derive(Debug)]
pub struct Notification<K> {
    pub recipient: ClientId,
    pub channel: ChannelHandle<K>,
    pub message: ServerMessage<K>,
}

/// Ordered batch of notifications produced by a single state transition.
#[derive(Debug)]
pub struct Notifications<K>(Vec<Notification<K>>);

impl<K> Default for Notifications<K> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<K> Notifications<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, recipient: ClientId, channel: ChannelHandle<K>, message: ServerMessage<K>) {
        self.0.push(Notification {
            recipient,
            channel,
            message,
        });
    }

    pub fn append(&mut self, mut other: Notifications<K>) {
        self.0.append(&mut other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Notification<K>> {
        self.0.iter()
    }

    /// Messages addressed to `recipient`, in send order.
    pub fn for_recipient<'a>(
        &'a self,
        recipient: &'a ClientId,
    ) -> impl Iterator<Item = &'a ServerMessage<K>> + 'a {
        self.0
            .iter()
            .filter(move |n| &n.recipient == recipient)
            .map(|n| &n.message)
    }
}

impl<K> IntoIterator for Notifications<K> {
    type Item = Notification<K>;
    type IntoIter = std::vec::IntoIter<Notification<K>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Outcome of dispatching one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: Vec<(ClientId, DeliveryError)>,
}

impl DispatchReport {
    pub fn is_degraded(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Cumulative delivery counters since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
pub struct NotificationDispatcher {
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch<K>(&self, notifications: Notifications<K>) -> DispatchReport {
        let mut report = DispatchReport::default();

        for Notification {
            recipient,
            channel,
            message,
        } in notifications
        {
            match channel.send(message) {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    tracing::debug!(
                        client_id = %recipient,
                        channel = %channel.id(),
                        %error,
                        "Notification not delivered"
                    );
                    report.failed.push((recipient, error));
                }
            }
        }

        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        if report.is_degraded() {
            self.failed
                .fetch_add(report.failed.len() as u64, Ordering::Relaxed);
            tracing::warn!(
                delivered = report.delivered,
                failed = report.failed.len(),
                "Degraded notification delivery"
            );
        }

        report
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
