//! Wire protocol types for queue clients.
//!
//! Every frame is a JSON object tagged by `type`:
//! - **Server → client**: init, queue_update, queue_list, enter_allowed, evicted, left, heartbeat
//! - **Client → server**: heartbeat, leave

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque client identity, unique per connecting client per resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for one physical connection.
///
/// A client that reconnects keeps its `ClientId` but gets a fresh `ChannelId`,
/// which lets teardown of the stale connection be told apart from the live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(uuid::Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewerStatus {
    Viewing,
    Waiting,
}

/// One line of a queue listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Viewer {
    pub client_id: ClientId,
    pub joined_at: DateTime<Utc>,
    /// 0 for the occupant, 1-based for waiters.
    pub position: usize,
    pub status: ViewerStatus,
}

/// Full listing of a resource queue, occupant first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSnapshot<K> {
    pub resource_key: K,
    pub total_count: usize,
    pub viewers: Vec<Viewer>,
}

/// Messages from server to client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage<K> {
    /// First frame on every connection: the admission outcome.
    Init {
        granted: bool,
        position: usize,
        message: String,
    },

    /// Position of the recipient after a membership change (0 = occupying).
    QueueUpdate { position: usize, message: String },

    QueueList { data: QueueSnapshot<K> },

    /// The recipient was promoted and may now view the resource.
    EnterAllowed { resource_key: K, message: String },

    /// The recipient held the resource past the configured hold limit.
    Evicted { resource_key: K, message: String },

    /// Acknowledges an explicit leave.
    Left { message: String },

    Heartbeat { status: &'static str },
}

impl<K> ServerMessage<K> {
    pub fn queue_update(position: usize) -> Self {
        let message = if position == 0 {
            "You are viewing this page.".to_string()
        } else {
            format!("Position {position} in queue.")
        };
        Self::QueueUpdate { position, message }
    }

    pub fn enter_allowed(resource_key: K) -> Self {
        Self::EnterAllowed {
            resource_key,
            message: "It's your turn. You may enter now.".to_string(),
        }
    }

    pub fn evicted(resource_key: K) -> Self {
        Self::Evicted {
            resource_key,
            message: "Your viewing time is over.".to_string(),
        }
    }

    pub fn left() -> Self {
        Self::Left {
            message: "You left the page.".to_string(),
        }
    }

    pub fn heartbeat_ok() -> Self {
        Self::Heartbeat { status: "ok" }
    }
}

/// Messages from client to server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Liveness check; answered with a heartbeat ack, no queue effect.
    Heartbeat,
    /// Voluntary release of the current slot or queue position.
    Leave,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed client frame: {0}")]
    Malformed(#[from] serde_json::Error),
}
