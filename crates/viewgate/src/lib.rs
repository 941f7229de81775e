//! viewgate: exclusive, one-at-a-time access to shared resource pages.
//!
//! Each resource has at most one occupant and a FIFO of waiters. Clients hold
//! a realtime channel on which they learn whether they were admitted, their
//! queue position, and when it is their turn.

mod health;
mod sweeper;
mod version;

pub mod admission;
pub mod channel;
pub mod dispatch;
pub mod protocol;
pub mod queue;
pub mod service;
pub mod transport;

pub use admission::{AdmissionController, AdmissionResult, Eviction, Transition};
pub use channel::{ChannelHandle, ChannelReceiver, DeliveryError};
pub use dispatch::{DeliveryStats, DispatchReport, NotificationDispatcher, Notifications};
pub use health::{Health, HealthSnapshot};
pub use protocol::{ChannelId, ClientId, ClientMessage, ServerMessage};
pub use queue::{QueueStatus, ResourceKey, ResourceQueue};
pub use service::{AdmissionConfig, ProductId, QueueService};
pub use sweeper::spawn_sweeper;
pub use version::{VIEWGATE_VERSION, VersionInfo};
