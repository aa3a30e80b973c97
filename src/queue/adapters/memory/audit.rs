//! In-memory audit log and event recorder.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::queue::ports::{
    AuditAction, AuditEvent, AuditLog, AuditLogError, AuditSink, EventBroadcaster, TaskEvent,
};

/// Audit log that keeps events in memory.
///
/// Implements both [`AuditSink`] and [`AuditLog`] so tests can use it
/// directly or behind a channel sink.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuditLog {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every recorded event in order. A poisoned lock yields the
    /// events recorded before the panic.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Returns the recorded events with the given action.
    #[must_use]
    pub fn with_action(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.action == action)
            .collect()
    }

    fn push(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, event: AuditEvent) {
        self.push(event);
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, event: AuditEvent) -> Result<(), AuditLogError> {
        self.push(event);
        Ok(())
    }
}

/// Event broadcaster that records every emitted event.
#[derive(Debug, Clone, Default)]
pub struct RecordingEventBroadcaster {
    events: Arc<Mutex<Vec<TaskEvent>>>,
}

impl RecordingEventBroadcaster {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every emitted event in order.
    #[must_use]
    pub fn events(&self) -> Vec<TaskEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventBroadcaster for RecordingEventBroadcaster {
    fn emit(&self, event: TaskEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
