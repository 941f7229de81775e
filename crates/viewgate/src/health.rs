//! Health status types for the viewgate service.

use serde::{Deserialize, Serialize};

use crate::dispatch::DeliveryStats;
use crate::version::VersionInfo;

/// Health status of the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    /// Accepting connections
    #[default]
    Ready,
    /// Shutdown requested, draining connections
    ShuttingDown,
}

/// Snapshot of service health for transports to query.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: Health,
    pub version: VersionInfo,
    /// Cumulative best-effort delivery counters.
    pub delivery: DeliveryStats,
    /// Resources with a live queue.
    pub resources: usize,
}

impl HealthSnapshot {
    pub fn is_ready(&self) -> bool {
        self.status == Health::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_value(Health::ShuttingDown).unwrap(),
            serde_json::json!("SHUTTING_DOWN")
        );
        assert_eq!(
            serde_json::to_value(Health::Ready).unwrap(),
            serde_json::json!("READY")
        );
    }

    #[test]
    fn snapshot_serializes() {
        let snapshot = HealthSnapshot {
            status: Health::Ready,
            version: VersionInfo { viewgate: "0.1.0" },
            delivery: DeliveryStats {
                delivered: 12,
                failed: 1,
            },
            resources: 3,
        };
        insta::assert_json_snapshot!(snapshot, @r#"
        {
          "status": "READY",
          "version": {
            "viewgate": "0.1.0"
          },
          "delivery": {
            "delivered": 12,
            "failed": 1
          },
          "resources": 3
        }
        "#);
    }
}
