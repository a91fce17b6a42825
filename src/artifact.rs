//! Artifact export seam.
//!
//! Export is an external collaborator: the engine hands over the event
//! history and receives a locator back, never inspecting document content.
//! Export failures are swallowed into a failed-status event and are never
//! fatal to a debate.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::events::types::EventRecord;

#[derive(Debug, Clone, thiserror::Error)]
#[error("artifact export failed: {0}")]
pub struct ArtifactError(pub String);

/// Exports the current event history to a durable document, returning a
/// locator for it.
#[async_trait]
pub trait ArtifactExporter: Send + Sync {
    async fn export(
        &self,
        session_id: &str,
        history: &[EventRecord],
    ) -> Result<String, ArtifactError>;
}

/// In-memory exporter for tests and embedded use.
#[derive(Default)]
pub struct MemoryExporter {
    exported: Mutex<Vec<(String, usize)>>,
    fail: AtomicBool,
}

impl MemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_exports(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// (session_id, event count) pairs for each successful export.
    pub fn exported(&self) -> Vec<(String, usize)> {
        self.exported.lock().expect("exporter poisoned").clone()
    }
}

#[async_trait]
impl ArtifactExporter for MemoryExporter {
    async fn export(
        &self,
        session_id: &str,
        history: &[EventRecord],
    ) -> Result<String, ArtifactError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ArtifactError("injected export failure".to_string()));
        }
        self.exported
            .lock()
            .expect("exporter poisoned")
            .push((session_id.to_string(), history.len()));
        Ok(format!("memory://artifacts/{session_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_exporter_returns_locator() {
        let exporter = MemoryExporter::new();
        let locator = exporter.export("s-1", &[]).await.unwrap();
        assert_eq!(locator, "memory://artifacts/s-1");
        assert_eq!(exporter.exported(), vec![("s-1".to_string(), 0)]);
    }

    #[tokio::test]
    async fn test_memory_exporter_failure_injection() {
        let exporter = MemoryExporter::new();
        exporter.fail_exports(true);
        assert!(exporter.export("s-1", &[]).await.is_err());
        assert!(exporter.exported().is_empty());
    }
}
