//! Operator notifications.
//!
//! Events are informational: reconcilers never read them back, so a dropped
//! event (lagging subscriber, no subscriber) never affects convergence.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{
    error::Result,
    model::{ImageHash, ReportKey, ScanJobKey, WorkloadKey},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorEvent {
    ScanDispatched {
        workload: WorkloadKey,
        container: String,
        job: ScanJobKey,
        attempt: u16,
    },
    ReportWritten {
        report: ReportKey,
        image_hash: ImageHash,
        revision: u64,
        findings: usize,
    },
    /// `terminal` failures park the target until its image changes.
    ScanFailed {
        workload: WorkloadKey,
        container: String,
        image_hash: Option<ImageHash>,
        reason: String,
        terminal: bool,
    },
    OrphanJobDeleted {
        job: ScanJobKey,
        workload: WorkloadKey,
    },
    StaleJobDeleted {
        job: ScanJobKey,
        workload: WorkloadKey,
        container: String,
    },
    WorkloadCollected {
        workload: WorkloadKey,
        jobs: usize,
        reports: usize,
    },
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: OperatorEvent) -> Result<()>;
}

/// In-process fan-out of operator events to observers inside the runtime.
pub struct InProcEventBus {
    sender: broadcast::Sender<OperatorEvent>,
    capacity: usize,
}

impl fmt::Debug for InProcEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl Default for InProcEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl InProcEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OperatorEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for InProcEventBus {
    async fn publish(&self, event: OperatorEvent) -> Result<()> {
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishing_without_subscribers_is_ok() {
        let bus = InProcEventBus::new(4);
        bus.publish(OperatorEvent::OrphanJobDeleted {
            job: ScanJobKey::new("vulnwatch", "scan-x"),
            workload: WorkloadKey::new("ns", "x"),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = InProcEventBus::new(4);
        let mut rx = bus.subscribe();
        let event = OperatorEvent::WorkloadCollected {
            workload: WorkloadKey::new("ns", "web-1"),
            jobs: 1,
            reports: 2,
        };
        bus.publish(event.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), event);
    }
}
