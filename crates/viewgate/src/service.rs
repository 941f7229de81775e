//! QueueService: transport-agnostic product queue.
//!
//! This service owns:
//! - The admission controller (per-product queues)
//! - The notification dispatcher (best-effort fan-out)
//! - Shutdown coordination
//!
//! Every mutating call dispatches the notifications its transition produced
//! after the per-product lock has been released. Transports (WebSocket, HTTP
//! status) delegate here.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::admission::{AdmissionController, AdmissionResult, Eviction};
use crate::channel::{ChannelHandle, ChannelReceiver};
use crate::dispatch::NotificationDispatcher;
use crate::health::{Health, HealthSnapshot};
use crate::protocol::{ChannelId, ClientId};
use crate::queue::QueueStatus;
use crate::version::VersionInfo;

/// Resource key used by the product queue.
pub type ProductId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// Undelivered control frames (`enter_allowed`, `evicted`) buffered per
    /// connection. Position updates and listings never count against it.
    pub channel_capacity: usize,
    /// Evict an occupant after holding a product this long. `None` disables
    /// eviction: an occupant that never leaves blocks its queue.
    pub hold_limit: Option<Duration>,
    /// How often the sweeper evicts expired occupants and prunes empty queues.
    pub sweep_interval: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            hold_limit: None,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

pub struct QueueService {
    controller: AdmissionController<ProductId>,
    dispatcher: NotificationDispatcher,
    config: AdmissionConfig,
    version: VersionInfo,
    shutdown: CancellationToken,
}

impl QueueService {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            controller: AdmissionController::new(),
            dispatcher: NotificationDispatcher::new(),
            config,
            version: VersionInfo::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Outbound channel for a new connection.
    pub fn open_channel(
        &self,
    ) -> (ChannelHandle<ProductId>, ChannelReceiver<ProductId>) {
        ChannelHandle::open(self.config.channel_capacity)
    }

    pub fn enter(
        &self,
        product: ProductId,
        client_id: ClientId,
        channel: ChannelHandle<ProductId>,
    ) -> AdmissionResult {
        let (result, notifications) = self
            .controller
            .request_admission(&product, client_id, channel)
            .into_parts();
        self.dispatcher.dispatch(notifications);
        result
    }

    /// Explicit leave. The promoted client, if any, is told it may enter.
    pub fn leave(&self, product: ProductId, client_id: &ClientId) -> Option<ClientId> {
        let (promoted, notifications) = self.controller.release(&product, client_id).into_parts();
        self.dispatcher.dispatch(notifications);
        promoted
    }

    /// Connection teardown for `channel`. No-op if the client has already
    /// reconnected on another channel.
    pub fn disconnect(
        &self,
        product: ProductId,
        client_id: &ClientId,
        channel: ChannelId,
    ) -> Option<ClientId> {
        let (promoted, notifications) = self
            .controller
            .disconnect_channel(&product, client_id, channel)
            .into_parts();
        self.dispatcher.dispatch(notifications);

        if let Some(next) = promoted.as_ref() {
            self.dispatcher
                .dispatch(self.controller.notify_promoted(&product, next));
        }
        promoted
    }

    pub fn status(&self, product: ProductId) -> QueueStatus<ProductId> {
        self.controller.status(&product)
    }

    /// Every known product, ordered by id.
    pub fn all_statuses(&self) -> Vec<QueueStatus<ProductId>> {
        let mut statuses = self.controller.all_statuses();
        statuses.sort_by_key(|s| s.resource_key);
        statuses
    }

    /// Evict expired occupants (if a hold limit is set) and prune empty queues.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<Eviction<ProductId>> {
        let evictions = match self.config.hold_limit {
            Some(limit) => {
                let (evictions, notifications) =
                    self.controller.evict_expired(now, limit).into_parts();
                self.dispatcher.dispatch(notifications);
                evictions
            }
            None => Vec::new(),
        };
        self.controller.prune_empty();
        evictions
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: if self.is_shutting_down() {
                Health::ShuttingDown
            } else {
                Health::Ready
            },
            version: self.version.clone(),
            delivery: self.dispatcher.stats(),
            resources: self.controller.resource_count(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request shutdown; the server and sweeper observe this token.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerMessage;

    fn service() -> QueueService {
        QueueService::new(AdmissionConfig::default())
    }

    fn drain(rx: &mut ChannelReceiver<ProductId>) -> Vec<ServerMessage<ProductId>> {
        let mut out = Vec::new();
        while let Some(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn enter_dispatches_broadcast() {
        let service = service();
        let (ch, mut rx) = service.open_channel();

        let result = service.enter(1, ClientId::from("u1"), ch);
        assert!(result.granted);

        let messages = drain(&mut rx);
        assert_eq!(messages[0], ServerMessage::queue_update(0));
        assert!(matches!(messages[1], ServerMessage::QueueList { .. }));
        assert_eq!(service.dispatcher().stats().delivered, 2);
    }

    #[test]
    fn leave_sends_enter_allowed_to_promoted() {
        let service = service();
        let (ch1, _rx1) = service.open_channel();
        let (ch2, mut rx2) = service.open_channel();
        service.enter(1, ClientId::from("u1"), ch1);
        service.enter(1, ClientId::from("u2"), ch2);
        drain(&mut rx2);

        assert_eq!(
            service.leave(1, &ClientId::from("u1")),
            Some(ClientId::from("u2"))
        );
        let messages = drain(&mut rx2);
        assert_eq!(messages.last(), Some(&ServerMessage::enter_allowed(1)));
        assert_eq!(
            messages
                .iter()
                .filter(|m| matches!(m, ServerMessage::EnterAllowed { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn disconnect_sends_enter_allowed_once() {
        let service = service();
        let (ch1, _rx1) = service.open_channel();
        let ch1_id = ch1.id();
        let (ch2, mut rx2) = service.open_channel();
        service.enter(1, ClientId::from("u1"), ch1);
        service.enter(1, ClientId::from("u2"), ch2);
        drain(&mut rx2);

        assert_eq!(
            service.disconnect(1, &ClientId::from("u1"), ch1_id),
            Some(ClientId::from("u2"))
        );
        let messages = drain(&mut rx2);
        assert_eq!(messages.last(), Some(&ServerMessage::enter_allowed(1)));
        assert_eq!(
            messages
                .iter()
                .filter(|m| matches!(m, ServerMessage::EnterAllowed { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn promotion_reaches_waiter_that_stopped_reading() {
        let service = service();
        let (ch1, _rx1) = service.open_channel();
        let (ch2, mut rx2) = service.open_channel();
        service.enter(1, ClientId::from("u1"), ch1);
        service.enter(1, ClientId::from("u2"), ch2);

        // Far more broadcasts than the control buffer holds, none read by u2.
        let mut others = Vec::new();
        for i in 0..40 {
            let (ch, rx) = service.open_channel();
            service.enter(1, ClientId::new(format!("w{i}")), ch);
            others.push(rx);
        }

        assert_eq!(
            service.leave(1, &ClientId::from("u1")),
            Some(ClientId::from("u2"))
        );

        let messages = drain(&mut rx2);
        assert_eq!(messages[0], ServerMessage::queue_update(0));
        match &messages[1] {
            ServerMessage::QueueList { data } => assert_eq!(data.total_count, 41),
            other => panic!("expected queue_list, got {other:?}"),
        }
        assert_eq!(messages[2..], [ServerMessage::enter_allowed(1)]);
        assert_eq!(service.dispatcher().stats().failed, 0);
    }

    #[test]
    fn all_statuses_sorted_by_product() {
        let service = service();
        for product in [9, 3, 5] {
            let (ch, _rx) = service.open_channel();
            service.enter(product, ClientId::from("u"), ch);
        }
        let keys: Vec<_> = service
            .all_statuses()
            .iter()
            .map(|s| s.resource_key)
            .collect();
        assert_eq!(keys, vec![3, 5, 9]);
    }

    #[test]
    fn sweep_without_hold_limit_only_prunes() {
        let service = service();
        let (ch1, _rx1) = service.open_channel();
        let (ch2, _rx2) = service.open_channel();
        service.enter(1, ClientId::from("u1"), ch1);
        service.enter(2, ClientId::from("u2"), ch2);
        service.leave(2, &ClientId::from("u2"));

        let far_future = Utc::now() + chrono::Duration::days(365);
        assert!(service.sweep(far_future).is_empty());
        assert_eq!(service.health().resources, 1);
        assert!(service.status(1).occupied);
    }

    #[test]
    fn sweep_with_hold_limit_evicts() {
        let service = QueueService::new(AdmissionConfig {
            hold_limit: Some(Duration::from_secs(60)),
            ..AdmissionConfig::default()
        });
        let (ch1, mut rx1) = service.open_channel();
        let (ch2, mut rx2) = service.open_channel();
        service.enter(1, ClientId::from("u1"), ch1);
        service.enter(1, ClientId::from("u2"), ch2);
        drain(&mut rx1);
        drain(&mut rx2);

        let evictions = service.sweep(Utc::now() + chrono::Duration::seconds(61));
        assert_eq!(evictions.len(), 1);
        assert_eq!(drain(&mut rx1), vec![ServerMessage::evicted(1)]);
        assert_eq!(
            drain(&mut rx2).last(),
            Some(&ServerMessage::enter_allowed(1))
        );
        assert_eq!(service.status(1).occupant_id, Some(ClientId::from("u2")));
    }

    #[test]
    fn health_reflects_shutdown() {
        let service = service();
        assert!(service.health().is_ready());
        service.shutdown();
        assert_eq!(service.health().status, Health::ShuttingDown);
        assert!(service.shutdown_token().is_cancelled());
    }
}
