//! RealtimeHub - WebSocket Distribution
//!
//! ## Responsibilities
//!
//! - WebSocket connection management
//! - Broadcasting occupancy updates, zone changes, mode changes, and events
//! - Initial-state delivery on attach
//!
//! Delivery is best-effort: each client has its own unbounded queue, so a
//! slow consumer never blocks producers; a closed queue just drops sends.

use crate::event_log::ParkingEvent;
use crate::zone_store::Zone;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Hub message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    /// Snapshot of all known zones, sent to each newly attached subscriber
    InitialState(InitialStateMessage),
    /// A zone's occupancy count was recomputed
    OccupancyUpdate(OccupancyUpdateMessage),
    /// The active detection mode changed
    ModeChanged(ModeChangedMessage),
    ZoneCreated(ZoneMessage),
    ZoneUpdated(ZoneMessage),
    ZoneDeleted(ZoneDeletedMessage),
    /// An entry/exit/occupancy_change event was logged
    ParkingEvent(ParkingEventMessage),
}

/// Initial state payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialStateMessage {
    pub zones: Vec<ZoneStateSummary>,
}

/// Per-zone summary inside the initial state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneStateSummary {
    pub zone_id: String,
    pub zone_name: String,
    pub count: u32,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Occupancy update payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccupancyUpdateMessage {
    pub zone_id: String,
    pub zone_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_id: Option<String>,
    pub count: u32,
    pub alarm: bool,
    pub timestamp: DateTime<Utc>,
}

/// Mode change payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeChangedMessage {
    pub mode: String,
}

/// Zone created/updated payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneMessage {
    pub zone: Zone,
}

/// Zone deleted payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneDeletedMessage {
    pub zone_id: String,
}

/// Logged event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParkingEventMessage {
    pub event: ParkingEvent,
}

/// Client connection
struct ClientConnection {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

/// RealtimeHub instance
pub struct RealtimeHub {
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    connection_count: AtomicU64,
}

impl RealtimeHub {
    /// Create new RealtimeHub
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register a new client
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut connections = self.connections.write().await;
            connections.insert(id, ClientConnection { id, tx });
        }
        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(connection_id = %id, "Client connected");

        (id, rx)
    }

    /// Unregister a client
    pub async fn unregister(&self, id: &Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, "Client disconnected");
        }
    }

    /// Broadcast a message to all clients
    pub async fn broadcast(&self, message: HubMessage) {
        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize hub message");
                return;
            }
        };

        let connections = self.connections.read().await;
        for conn in connections.values() {
            if let Err(e) = conn.tx.send(json.clone()) {
                tracing::warn!(connection_id = %conn.id, error = %e, "Failed to queue message");
            }
        }
    }

    /// Send a message to one client
    pub async fn send_to(&self, id: &Uuid, message: HubMessage) {
        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize hub message");
                return;
            }
        };

        let connections = self.connections.read().await;
        if let Some(conn) = connections.get(id) {
            if let Err(e) = conn.tx.send(json) {
                tracing::warn!(connection_id = %id, error = %e, "Failed to queue message");
            }
        }
    }

    /// Get connection count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_registered_clients() {
        let hub = RealtimeHub::new();
        let (_id, mut rx) = hub.register().await;

        hub.broadcast(HubMessage::ModeChanged(ModeChangedMessage {
            mode: "blob".to_string(),
        }))
        .await;

        let raw = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["type"], "mode_changed");
        assert_eq!(parsed["data"]["mode"], "blob");
    }

    #[tokio::test]
    async fn unregistered_client_stops_receiving() {
        let hub = RealtimeHub::new();
        let (id, mut rx) = hub.register().await;
        hub.unregister(&id).await;

        hub.broadcast(HubMessage::ZoneDeleted(ZoneDeletedMessage {
            zone_id: "z1".to_string(),
        }))
        .await;

        assert!(rx.try_recv().is_err());
        assert_eq!(hub.connection_count(), 0);
    }
}
