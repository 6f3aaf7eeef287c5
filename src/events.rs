//! Push channel for analysis events.
//!
//! Events serialize as single JSON objects tagged by `type`:
//! ```json
//! {"type":"snapshot_created","snapshot_id":"0001700000000-1a2b3c4d","file_count":12}
//! ```
//!
//! Subscribers may restrict delivery to a set of file paths; events that name
//! no file (snapshot creation) are always delivered.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::index::RiskLevel;

pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChange {
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImpactEvent {
    FileChanged {
        path: String,
        change: FileChange,
    },
    SnapshotCreated {
        snapshot_id: String,
        file_count: usize,
    },
    BreakingChangeDetected {
        file_path: String,
        risk_level: RiskLevel,
        risk_score: f64,
        snapshot_id: String,
    },
}

impl ImpactEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ImpactEvent::FileChanged { .. } => "file_changed",
            ImpactEvent::SnapshotCreated { .. } => "snapshot_created",
            ImpactEvent::BreakingChangeDetected { .. } => "breaking_change_detected",
        }
    }

    pub fn file_path(&self) -> Option<&str> {
        match self {
            ImpactEvent::FileChanged { path, .. } => Some(path),
            ImpactEvent::BreakingChangeDetected { file_path, .. } => Some(file_path),
            ImpactEvent::SnapshotCreated { .. } => None,
        }
    }
}

/// Path filter for a subscriber
#[derive(Debug, Clone, Default)]
pub struct Subscription {
    paths: Option<BTreeSet<String>>,
}

impl Subscription {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: Some(paths.into_iter().map(Into::into).collect()),
        }
    }

    pub fn matches(&self, event: &ImpactEvent) -> bool {
        match (&self.paths, event.file_path()) {
            (Some(paths), Some(path)) => paths.contains(path),
            _ => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ImpactEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns the number of subscribers reached; zero when nobody listens
    pub fn publish(&self, event: ImpactEvent) -> usize {
        tracing::debug!("Event {}", event.event_type());
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self, subscription: Subscription) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
            subscription,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub struct EventSubscriber {
    receiver: broadcast::Receiver<ImpactEvent>,
    subscription: Subscription,
}

impl EventSubscriber {
    /// Next matching event; `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<ImpactEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.subscription.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event subscriber lagged, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already queued, without waiting
    pub fn try_recv(&mut self) -> Option<ImpactEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.subscription.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("Event subscriber lagged, {} events dropped", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}
