//! Analytics events. Transport is left to the sink implementation.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::engine::types::{AdaptationState, ConceptId, PathStatus, ResourceId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    #[serde(rename_all = "camelCase")]
    MasteryUpdated {
        user_id: String,
        concept_id: ConceptId,
        mastery: f64,
        attempts: usize,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    AttemptRejected {
        user_id: String,
        concept_id: ConceptId,
        reason: String,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    PathGenerated {
        user_id: String,
        path_id: String,
        steps: usize,
        total_minutes: f64,
        status: PathStatus,
        degraded: bool,
        latency_ms: u64,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    PathAdapted {
        user_id: String,
        path_id: String,
        from: AdaptationState,
        to: AdaptationState,
        steps: usize,
        latency_ms: u64,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    RewardRecorded {
        resource_id: ResourceId,
        success: bool,
        timestamp: i64,
    },
}

impl TelemetryEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            TelemetryEvent::MasteryUpdated { .. } => "mastery_updated",
            TelemetryEvent::AttemptRejected { .. } => "attempt_rejected",
            TelemetryEvent::PathGenerated { .. } => "path_generated",
            TelemetryEvent::PathAdapted { .. } => "path_adapted",
            TelemetryEvent::RewardRecorded { .. } => "reward_recorded",
        }
    }
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Writes every event as JSON through `tracing` under the `telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => {
                tracing::info!(target: "telemetry", event_type = event.event_type(), %payload)
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize telemetry event"),
        }
    }
}

/// Keeps events in memory. Useful for embedders that batch their own exports.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    pub fn drain(&self) -> Vec<TelemetryEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

impl TelemetrySink for MemoryTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}
