//! # Presence Directory
//!
//! Tracks which live client connections belong to which (user, dashboard)
//! tenant and fans provider events out to them. Bindings are process-local
//! and die with the connection; nothing here is persisted. This registry is
//! the explicit seam where a multi-instance deployment would swap in a
//! shared broker behind the same interface.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::VerifiedIdentity;

/// Dashboard sentinel matching every dashboard of a user
pub const ALL_DASHBOARDS: &str = "all";

/// Frame pushed to bound connections, serialized once per route call
#[derive(Debug, Clone, Serialize)]
pub struct PushFrame {
    pub event: String,
    pub payload: serde_json::Value,
}

#[derive(Debug)]
struct ConnectionBinding {
    user_id: String,
    dashboard_id: String,
    /// Channel for sending serialized frames to this connection's write loop
    sender: mpsc::UnboundedSender<String>,
}

impl ConnectionBinding {
    fn matches(&self, user_id: &str, dashboard_id: &str) -> bool {
        if self.user_id != user_id {
            return false;
        }
        dashboard_id == ALL_DASHBOARDS
            || self.dashboard_id == ALL_DASHBOARDS
            || self.dashboard_id == dashboard_id
    }
}

/// Live-connection registry; safe under concurrent bind/unbind/route
#[derive(Default)]
pub struct PresenceDirectory {
    bindings: RwLock<HashMap<Uuid, ConnectionBinding>>,
}

impl PresenceDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
        }
    }

    /// Binds a connection to a tenant. Requires a [`VerifiedIdentity`], which
    /// only the handshake verification can produce, so unverified connections
    /// cannot reach this point. Many connections may bind to the same tenant.
    pub fn bind(
        &self,
        connection_id: Uuid,
        identity: &VerifiedIdentity,
        dashboard_id: &str,
        sender: mpsc::UnboundedSender<String>,
    ) {
        let binding = ConnectionBinding {
            user_id: identity.user_id().to_string(),
            dashboard_id: dashboard_id.to_string(),
            sender,
        };

        debug!(
            connection_id = %connection_id,
            user_id = %binding.user_id,
            dashboard_id = %binding.dashboard_id,
            "Bound connection"
        );

        self.bindings
            .write()
            .expect("presence lock never poisoned")
            .insert(connection_id, binding);
    }

    /// Removes a connection binding; returns whether one existed
    pub fn unbind(&self, connection_id: Uuid) -> bool {
        self.bindings
            .write()
            .expect("presence lock never poisoned")
            .remove(&connection_id)
            .is_some()
    }

    /// Number of currently bound connections
    pub fn connection_count(&self) -> usize {
        self.bindings
            .read()
            .expect("presence lock never poisoned")
            .len()
    }

    /// Delivers an event to every connection bound to the tenant. The
    /// sentinel `"all"` widens matching to every connection of the user.
    /// Returns the number of connections the frame was delivered to.
    pub fn route(
        &self,
        user_id: &str,
        dashboard_id: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> usize {
        let frame = PushFrame {
            event: event.to_string(),
            payload,
        };
        let serialized = match serde_json::to_string(&frame) {
            Ok(serialized) => serialized,
            Err(err) => {
                warn!(error = %err, "Failed to serialize push frame");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let bindings = self.bindings.read().expect("presence lock never poisoned");
            for (connection_id, binding) in bindings.iter() {
                if !binding.matches(user_id, dashboard_id) {
                    continue;
                }
                if binding.sender.send(serialized.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*connection_id);
                }
            }
        }

        // Receivers dropped without an unbind (abrupt disconnect); sweep them
        if !dead.is_empty() {
            let mut bindings = self.bindings.write().expect("presence lock never poisoned");
            for connection_id in dead {
                bindings.remove(&connection_id);
            }
        }

        delivered
    }
}
