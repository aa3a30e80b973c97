//! Channel-backed audit sink and event fan-out.
//!
//! Both adapters accept events without waiting. When a bounded buffer is
//! full the event is dropped with a warning.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::queue::ports::{
    AuditEvent, AuditLog, AuditLogError, AuditSink, EventBroadcaster, TaskEvent,
};

/// Audit sink that forwards events to a durable log through a bounded
/// channel drained by a dedicated task.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    sender: mpsc::Sender<AuditEvent>,
}

impl ChannelAuditSink {
    /// Spawns the drain task on the current runtime.
    ///
    /// The task ends once every sink clone has been dropped and the buffer
    /// is empty.
    #[must_use]
    pub fn spawn(log: Arc<dyn AuditLog>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<AuditEvent>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let task_id = event.task_id;
                let action = event.action;
                if let Err(err) = log.append(event).await {
                    warn!(%task_id, %action, error = %err, "failed to persist audit event");
                }
            }
            debug!("audit drain stopped");
        });
        (Self { sender }, handle)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, event: AuditEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    task_id = %dropped.task_id,
                    action = %dropped.action,
                    "audit channel full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                warn!(
                    task_id = %dropped.task_id,
                    action = %dropped.action,
                    "audit channel closed, dropping event"
                );
            }
        }
    }
}

/// Audit log that writes events to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn append(&self, event: AuditEvent) -> Result<(), AuditLogError> {
        info!(
            target: "simqueue::audit",
            task_id = %event.task_id,
            entity_id = %event.entity_id,
            action = %event.action,
            actor = %event.actor,
            detail = event.detail.as_deref().unwrap_or_default(),
            provider_response_ms = event.provider_response_ms,
            "audit"
        );
        Ok(())
    }
}

/// Bounded fan-out of task events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastEventHub {
    sender: broadcast::Sender<TaskEvent>,
}

impl BroadcastEventHub {
    /// Creates a hub buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Registers a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventBroadcaster for BroadcastEventHub {
    fn emit(&self, event: TaskEvent) {
        if self.sender.receiver_count() == 0 {
            debug!(task_id = %event.task_id, "no event subscribers");
            return;
        }
        if let Err(err) = self.sender.send(event) {
            warn!(task_id = %err.0.task_id, "event hub closed, dropping event");
        }
    }
}
