//! Server Health Monitor
//!
//! Probes the detection server once at startup and on a fixed interval
//! thereafter, publishing the latest observation through a watch channel.
//! Advisory only - submission pre-flight does its own live probe.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::protocol::HealthResponse;
use crate::transport::DetectionTransport;

/// Cadence of the background health probe
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

// =============================================================================
// Server Health Snapshot
// =============================================================================

/// Latest observed health of the detection server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHealth {
    pub online: bool,
    pub model_loaded: bool,
    pub device: String,
    pub current_model: Option<String>,
}

impl ServerHealth {
    /// The offline snapshot, also the initial state before the first probe
    pub fn offline() -> Self {
        Self {
            online: false,
            model_loaded: false,
            device: "N/A".to_string(),
            current_model: None,
        }
    }

    fn from_response(resp: &HealthResponse) -> Self {
        Self {
            online: resp.is_running(),
            model_loaded: resp.model_loaded,
            device: resp.device.clone(),
            current_model: resp.current_model.clone(),
        }
    }

    /// Human-readable status line for the connection indicator
    pub fn status_line(&self) -> String {
        if self.online {
            let model = if self.model_loaded {
                "Loaded"
            } else {
                "Not Loaded"
            };
            match &self.current_model {
                Some(name) => format!(
                    "Server Online | Model: {} ({}) | Device: {}",
                    model, name, self.device
                ),
                None => format!("Server Online | Model: {} | Device: {}", model, self.device),
            }
        } else {
            "Server Offline - Please start the backend server".to_string()
        }
    }
}

impl Default for ServerHealth {
    fn default() -> Self {
        Self::offline()
    }
}

// =============================================================================
// Health Monitor
// =============================================================================

/// Background health prober
pub struct HealthMonitor {
    rx: watch::Receiver<ServerHealth>,
    task: tokio::task::JoinHandle<()>,
}

impl HealthMonitor {
    /// Starts the monitor: one immediate probe, then one every `interval`.
    pub fn spawn(transport: Arc<dyn DetectionTransport>, interval: Duration) -> Self {
        let (tx, rx) = watch::channel(ServerHealth::offline());

        let task = tokio::spawn(async move {
            loop {
                let health = Self::probe(transport.as_ref()).await;
                tx.send_replace(health);
                tokio::time::sleep(interval).await;
            }
        });

        Self { rx, task }
    }

    /// One-shot health probe; any failure or non-running status is offline.
    pub async fn probe(transport: &dyn DetectionTransport) -> ServerHealth {
        match transport.health().await {
            Ok(resp) if resp.is_running() => ServerHealth::from_response(&resp),
            Ok(resp) => {
                warn!("Detection server reported status '{}'", resp.status);
                ServerHealth::offline()
            }
            Err(e) => {
                debug!("Health probe failed: {}", e);
                ServerHealth::offline()
            }
        }
    }

    /// Subscribes to health changes
    pub fn subscribe(&self) -> watch::Receiver<ServerHealth> {
        self.rx.clone()
    }

    /// Latest observation
    pub fn latest(&self) -> ServerHealth {
        self.rx.borrow().clone()
    }

    /// Stops the background probe
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::ScriptedTransport;

    #[test]
    fn test_status_line_wording() {
        let offline = ServerHealth::offline();
        assert_eq!(
            offline.status_line(),
            "Server Offline - Please start the backend server"
        );

        let online = ServerHealth {
            online: true,
            model_loaded: true,
            device: "cuda".to_string(),
            current_model: Some("yolov8s.pt".to_string()),
        };
        assert_eq!(
            online.status_line(),
            "Server Online | Model: Loaded (yolov8s.pt) | Device: cuda"
        );
    }

    #[tokio::test]
    async fn test_probe_maps_running_response() {
        let transport = ScriptedTransport::new();
        transport.push_health_ok();

        let health = HealthMonitor::probe(&transport).await;
        assert!(health.online);
        assert!(health.model_loaded);
        assert_eq!(health.device, "cuda");
    }

    #[tokio::test]
    async fn test_probe_treats_non_running_status_as_offline() {
        let transport = ScriptedTransport::new();
        // Health endpoint reachable, but the server is not in "running" state.
        transport.push_health(HealthResponse {
            status: "starting".to_string(),
            model_loaded: false,
            device: "N/A".to_string(),
            current_model: None,
        });

        let health = HealthMonitor::probe(&transport).await;
        assert!(!health.online);
    }

    #[tokio::test]
    async fn test_probe_treats_transport_failure_as_offline() {
        let transport = ScriptedTransport::new();
        transport.push_health_err("connection refused");

        let health = HealthMonitor::probe(&transport).await;
        assert!(!health.online);
        assert!(!health.model_loaded);
    }

    #[tokio::test]
    async fn test_monitor_probes_on_interval() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_health_ok();
        transport.push_health_err("connection refused");
        for _ in 0..20 {
            transport.push_health_ok();
        }

        // Short cadence keeps the test fast.
        let monitor = HealthMonitor::spawn(transport.clone(), Duration::from_millis(20));
        let mut rx = monitor.subscribe();

        // Startup probe
        rx.changed().await.unwrap();
        assert!(rx.borrow().online);

        // One interval later the outage is observed, one more and the server
        // is back. Watch updates may coalesce, so scan rather than count.
        while rx.borrow().online {
            rx.changed().await.unwrap();
        }
        while !rx.borrow().online {
            rx.changed().await.unwrap();
        }

        assert!(transport.calls().health >= 3);
        monitor.stop();
    }
}
