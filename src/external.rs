//! Seams to the collaborators outside the core: the alternative-room
//! search/pricing service and the audit sink. Both are narrow by design —
//! the engine never depends on their availability to decide anything.

use async_trait::async_trait;

use crate::model::{AlternativeRoom, Event, Span};

/// Transient failure of the external ranker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchUnavailable(pub String);

impl std::fmt::Display for SearchUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "alternative search unavailable: {}", self.0)
    }
}

impl std::error::Error for SearchUnavailable {}

/// Ranks candidate rooms (by price, distance, whatever the collaborator
/// knows). The engine finds the overlap-free candidates itself; the
/// collaborator only orders them.
#[async_trait]
pub trait AlternativeSearch: Send + Sync {
    async fn rank(
        &self,
        span: Span,
        candidates: Vec<AlternativeRoom>,
    ) -> Result<Vec<AlternativeRoom>, SearchUnavailable>;
}

/// Default ranker: keeps the engine's candidate order.
pub struct UnrankedSearch;

#[async_trait]
impl AlternativeSearch for UnrankedSearch {
    async fn rank(
        &self,
        _span: Span,
        candidates: Vec<AlternativeRoom>,
    ) -> Result<Vec<AlternativeRoom>, SearchUnavailable> {
        Ok(candidates)
    }
}

/// Write-only sink for the audit trail. Fire-and-forget: a sink failure
/// never propagates into the mutating call.
pub trait AuditSink: Send + Sync {
    fn append(&self, record: serde_json::Value);
}

/// Default sink: structured log line per committed event.
pub struct LogSink;

impl AuditSink for LogSink {
    fn append(&self, record: serde_json::Value) {
        tracing::info!(target: "vacancy::audit", %record, "audit");
    }
}

/// Serialize an event for the audit trail.
pub fn audit_record(event: &Event) -> serde_json::Value {
    serde_json::to_value(event).unwrap_or_else(|e| {
        serde_json::json!({ "error": format!("unserializable event: {e}") })
    })
}
