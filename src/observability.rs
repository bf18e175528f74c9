use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub name: String,
    pub request_id: String,
    pub user_id: Option<String>,
    pub outcome: Option<String>,
    pub attributes: Vec<(String, String)>,
}

impl AuditEvent {
    pub fn new(name: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request_id: request_id.into(),
            user_id: None,
            outcome: None,
            attributes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Default sink: structured tracing output under the `memoria.audit` target.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        tracing::info!(
            target: "memoria.audit",
            event = %event.name,
            request_id = %event.request_id,
            user_id = event.user_id.as_deref().unwrap_or(""),
            outcome = event.outcome.as_deref().unwrap_or("success"),
            attributes = ?event.attributes,
            "audit",
        );
    }
}

/// Test sink that retains every event for assertions.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[derive(Clone)]
pub struct Observability {
    sink: Arc<dyn AuditSink>,
    counters: Arc<Mutex<HashMap<String, u64>>>,
}

impl Default for Observability {
    fn default() -> Self {
        Self::with_sink(Arc::new(TracingAuditSink))
    }
}

impl Observability {
    pub fn with_sink(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            counters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn audit(&self, event: AuditEvent) {
        self.sink.record(&event);
    }

    pub fn increment_counter(&self, name: &str, request_id: &str) {
        let total = {
            let mut counters = match self.counters.lock() {
                Ok(counters) => counters,
                Err(_) => return,
            };
            let entry = counters.entry(name.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        tracing::debug!(
            target: "memoria.metrics",
            counter = %name,
            total,
            request_id = %request_id,
            "counter incremented",
        );
    }

    pub fn counter_value(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .ok()
            .and_then(|counters| counters.get(name).copied())
            .unwrap_or(0)
    }
}
