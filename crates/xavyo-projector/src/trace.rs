//! Trace sink collaborator.
//!
//! The projector reports what it does to an injected [`TraceSink`]. Sinks are
//! purely observational: a failing sink never fails a projection.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;
use xavyo_delta::Oid;

use crate::types::{PolicyDecision, ProjectionKey};

/// Structured trace event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    /// `project()` started.
    ProjectionStarted {
        focus_oid: Oid,
        projections: usize,
    },
    /// Projections were sorted into waves.
    WavesDetermined { max_waves: u32 },
    WaveStarted { wave: u32 },
    WaveFinished { wave: u32 },
    /// One iteration of the uniqueness loop was tried.
    IterationAttempt {
        iteration: u32,
        token: String,
        conflict: Option<String>,
    },
    /// A projection was processed in a wave.
    ProjectionProcessed {
        key: ProjectionKey,
        wave: u32,
        decision: Option<PolicyDecision>,
    },
    /// A projection was excluded from further waves.
    ProjectionBroken { key: ProjectionKey, reason: String },
    /// A conflicting projection was found and queued for the next wave.
    ConflictDetected {
        key: ProjectionKey,
        existing_oid: Oid,
    },
    /// `project()` finished.
    ProjectionFinished {
        success: bool,
        error: Option<String>,
    },
}

/// A recorded trace event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: TraceEvent,
}

/// Receives trace events.
#[async_trait]
pub trait TraceSink: Send + Sync {
    /// Record an event.
    async fn record(&self, tenant_id: Uuid, event: TraceEvent);
}

/// Sink discarding every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTraceSink;

#[async_trait]
impl TraceSink for NoopTraceSink {
    async fn record(&self, _tenant_id: Uuid, _event: TraceEvent) {}
}

/// In-memory trace sink for testing.
#[derive(Debug, Default)]
pub struct InMemoryTraceSink {
    records: Arc<RwLock<Vec<TraceRecord>>>,
}

impl InMemoryTraceSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the count of recorded events.
    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Clear all events (for testing).
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }

    /// Recorded events in order.
    pub async fn events(&self) -> Vec<TraceEvent> {
        self.records
            .read()
            .await
            .iter()
            .map(|r| r.event.clone())
            .collect()
    }

    /// Recorded events of one tenant in order.
    pub async fn records_for_tenant(&self, tenant_id: Uuid) -> Vec<TraceRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TraceSink for InMemoryTraceSink {
    async fn record(&self, tenant_id: Uuid, event: TraceEvent) {
        self.records.write().await.push(TraceRecord {
            id: Uuid::new_v4(),
            tenant_id,
            timestamp: Utc::now(),
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_sink_records_in_order() {
        let sink = InMemoryTraceSink::new();
        let tenant = Uuid::new_v4();
        sink.record(tenant, TraceEvent::WaveStarted { wave: 0 }).await;
        sink.record(tenant, TraceEvent::WaveFinished { wave: 0 }).await;
        sink.record(Uuid::new_v4(), TraceEvent::WaveStarted { wave: 0 })
            .await;

        assert_eq!(sink.count().await, 3);
        let records = sink.records_for_tenant(tenant).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].event, TraceEvent::WaveFinished { wave: 0 });

        sink.clear().await;
        assert_eq!(sink.count().await, 0);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(TraceEvent::WaveStarted { wave: 2 }).unwrap();
        assert_eq!(json["event"], "wave_started");
        assert_eq!(json["wave"], 2);
    }
}
