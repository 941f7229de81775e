//! Outbound half of a client connection.
//!
//! The admission core never touches sockets. Each connection owns an outbox
//! the transport drains onto the wire. Position updates and queue listings
//! are state, not events: only the latest of each is kept, so a slow reader
//! skips superseded frames instead of losing newer ones. Control frames
//! (`enter_allowed`, `evicted`, ...) are queued in order on their own bounded
//! buffer that position traffic never consumes. Sends never block.

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::protocol::{ChannelId, ServerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,
    #[error("connection control buffer full")]
    Full,
}

type Slot<K> = Option<ServerMessage<K>>;

/// Best-effort sender bound to a single connection.
pub struct ChannelHandle<K> {
    id: ChannelId,
    position: watch::Sender<Slot<K>>,
    listing: watch::Sender<Slot<K>>,
    control: mpsc::Sender<ServerMessage<K>>,
}

impl<K> Clone for ChannelHandle<K> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            position: self.position.clone(),
            listing: self.listing.clone(),
            control: self.control.clone(),
        }
    }
}

impl<K> std::fmt::Debug for ChannelHandle<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("id", &self.id)
            .field("closed", &self.control.is_closed())
            .finish()
    }
}

impl<K> ChannelHandle<K> {
    /// Open a channel buffering up to `capacity` undelivered control frames.
    pub fn open(capacity: usize) -> (Self, ChannelReceiver<K>) {
        let (position_tx, position_rx) = watch::channel(None);
        let (listing_tx, listing_rx) = watch::channel(None);
        let (control_tx, control_rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: ChannelId::new(),
                position: position_tx,
                listing: listing_tx,
                control: control_tx,
            },
            ChannelReceiver {
                position: position_rx,
                listing: listing_rx,
                control: control_rx,
            },
        )
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn send(&self, message: ServerMessage<K>) -> Result<(), DeliveryError> {
        let slot = match message {
            ServerMessage::QueueUpdate { .. } => &self.position,
            ServerMessage::QueueList { .. } => &self.listing,
            _ => {
                return self.control.try_send(message).map_err(|e| match e {
                    TrySendError::Full(_) => DeliveryError::Full,
                    TrySendError::Closed(_) => DeliveryError::Closed,
                });
            }
        };
        slot.send(Some(message))
            .map_err(|_| DeliveryError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }
}

/// Receiving half, drained by the connection's writer.
#[derive(Debug)]
pub struct ChannelReceiver<K> {
    position: watch::Receiver<Slot<K>>,
    listing: watch::Receiver<Slot<K>>,
    control: mpsc::Receiver<ServerMessage<K>>,
}

fn take_latest<K: Clone>(slot: &mut watch::Receiver<Slot<K>>) -> Option<ServerMessage<K>> {
    if slot.has_changed().unwrap_or(false) {
        slot.borrow_and_update().clone()
    } else {
        None
    }
}

impl<K: Clone> ChannelReceiver<K> {
    /// Next frame without waiting: latest position, then latest listing, then
    /// the oldest control frame.
    pub fn try_recv(&mut self) -> Option<ServerMessage<K>> {
        take_latest(&mut self.position)
            .or_else(|| take_latest(&mut self.listing))
            .or_else(|| self.control.try_recv().ok())
    }

    /// Wait for the next frame. Returns `None` once every handle is dropped
    /// and nothing is left to deliver.
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<ServerMessage<K>> {
        loop {
            if let Some(message) = self.try_recv() {
                return Some(message);
            }

            tokio::select! {
                biased;
                Ok(()) = self.position.changed() => {
                    if let Some(message) = self.position.borrow_and_update().clone() {
                        return Some(message);
                    }
                }
                Ok(()) = self.listing.changed() => {
                    if let Some(message) = self.listing.borrow_and_update().clone() {
                        return Some(message);
                    }
                }
                message = self.control.recv() => return message,
            }
        }
    }
}
