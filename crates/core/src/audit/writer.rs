use std::sync::Arc;

use tokio::sync::mpsc;

use super::{AuditEventEnvelope, AuditHandle, AuditRecord, AuditStore};

/// Background task that receives audit events and writes them to storage
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditEventEnvelope>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    /// Create a new audit writer
    pub fn new(rx: mpsc::Receiver<AuditEventEnvelope>, store: Arc<dyn AuditStore>) -> Self {
        Self { rx, store }
    }

    /// Run the writer, consuming events until the channel is closed
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        tracing::debug!("Audit writer started");

        while let Some(envelope) = self.rx.recv().await {
            let record = AuditRecord {
                id: 0, // Will be set by database
                timestamp: envelope.timestamp,
                event_type: envelope.event.event_type().to_string(),
                run_id: envelope.event.run_id().map(String::from),
                deck_id: envelope.event.deck_id().map(String::from),
                data: envelope.event,
            };

            if let Err(e) = self.store.insert(&record) {
                tracing::error!("Failed to write audit event: {}", e);
            }
        }

        tracing::debug!("Audit writer shutting down");
    }
}

/// Create a complete audit system
///
/// Returns:
/// - `AuditHandle` - for emitting events (clone this to share across tasks)
/// - `AuditWriter` - spawn this as a background task with `tokio::spawn(writer.run())`
///
/// # Arguments
/// * `store` - The audit store to write events to
/// * `buffer_size` - Size of the channel buffer (events will block if full)
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let handle = AuditHandle::new(tx);
    let writer = AuditWriter::new(rx, store);
    (handle, writer)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::audit::{AuditError, AuditEvent, AuditFilter};

    /// Mock store that records insert calls
    struct MockStore {
        records: Mutex<Vec<AuditRecord>>,
        should_fail: bool,
    }

    impl MockStore {
        fn new() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                should_fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                should_fail: true,
            }
        }

        fn get_records(&self) -> Vec<AuditRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    impl AuditStore for MockStore {
        fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError> {
            if self.should_fail {
                return Err(AuditError::Database("Mock failure".to_string()));
            }
            let mut records = self.records.lock().unwrap();
            let id = records.len() as i64 + 1;
            let mut stored = record.clone();
            stored.id = id;
            records.push(stored);
            Ok(id)
        }

        fn query(&self, _filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
            Ok(self.records.lock().unwrap().clone())
        }

        fn count(&self, _filter: &AuditFilter) -> Result<i64, AuditError> {
            Ok(self.records.lock().unwrap().len() as i64)
        }
    }

    fn run_created(run_id: &str) -> AuditEvent {
        AuditEvent::RunCreated {
            run_id: run_id.to_string(),
            source: "archidekt".to_string(),
            search_back_to: None,
        }
    }

    #[tokio::test]
    async fn test_writer_receives_and_stores_events() {
        let store = Arc::new(MockStore::new());
        let store_dyn: Arc<dyn AuditStore> = Arc::clone(&store) as Arc<dyn AuditStore>;
        let (handle, writer) = create_audit_system(store_dyn, 10);

        let writer_handle = tokio::spawn(writer.run());

        handle.emit(run_created("run-1")).await;

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        drop(handle);
        writer_handle.await.unwrap();

        let records = store.get_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "run_created");
    }

    #[tokio::test]
    async fn test_writer_handles_multiple_events() {
        let store = Arc::new(MockStore::new());
        let store_dyn: Arc<dyn AuditStore> = Arc::clone(&store) as Arc<dyn AuditStore>;
        let (handle, writer) = create_audit_system(store_dyn, 10);

        let writer_handle = tokio::spawn(writer.run());

        for i in 0..5 {
            handle.emit(run_created(&format!("run-{}", i))).await;
        }

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        drop(handle);
        writer_handle.await.unwrap();

        let records = store.get_records();
        assert_eq!(records.len(), 5);
    }

    #[tokio::test]
    async fn test_writer_continues_on_insert_failure() {
        let store = Arc::new(MockStore::failing());
        let store_dyn: Arc<dyn AuditStore> = Arc::clone(&store) as Arc<dyn AuditStore>;
        let (handle, writer) = create_audit_system(store_dyn, 10);

        let writer_handle = tokio::spawn(writer.run());

        // This should not cause the writer to crash
        handle.emit(run_created("run-1")).await;

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        drop(handle);

        // Writer should complete normally
        writer_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_extracts_run_and_deck_ids() {
        let store = Arc::new(MockStore::new());
        let store_dyn: Arc<dyn AuditStore> = Arc::clone(&store) as Arc<dyn AuditStore>;
        let (handle, writer) = create_audit_system(store_dyn, 10);

        let writer_handle = tokio::spawn(writer.run());

        handle.emit(run_created("run-123")).await;
        handle
            .emit(AuditEvent::DeckFetchFailed {
                deck_id: "deck-456".to_string(),
                url: "https://example.com/deck/456".to_string(),
                error: "404".to_string(),
            })
            .await;

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        drop(handle);
        writer_handle.await.unwrap();

        let records = store.get_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].run_id, Some("run-123".to_string()));
        assert_eq!(records[0].deck_id, None);
        assert_eq!(records[1].run_id, None);
        assert_eq!(records[1].deck_id, Some("deck-456".to_string()));
    }

    #[tokio::test]
    async fn test_writer_waits_for_all_handles_to_drop() {
        // Multiple components hold cloned handles; the writer must
        // keep running until every one is dropped.
        let store = Arc::new(MockStore::new());
        let store_dyn: Arc<dyn AuditStore> = Arc::clone(&store) as Arc<dyn AuditStore>;
        let (main_handle, writer) = create_audit_system(store_dyn, 10);

        let crawler_handle = main_handle.clone();
        let reconciler_handle = main_handle.clone();

        let writer_handle = tokio::spawn(writer.run());

        crawler_handle.emit(run_created("run-1")).await;

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        // Drop only some handles, the writer should NOT exit yet
        drop(main_handle);

        assert!(
            !writer_handle.is_finished(),
            "Writer should still be running with handles alive"
        );

        drop(crawler_handle);
        drop(reconciler_handle);

        let result = tokio::time::timeout(tokio::time::Duration::from_secs(1), writer_handle).await;

        assert!(
            result.is_ok(),
            "Writer should have exited after all handles dropped"
        );

        let records = store.get_records();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_events_emitted_just_before_drop_are_captured() {
        // Events emitted immediately before dropping the last handle
        // must still reach storage.
        let store = Arc::new(MockStore::new());
        let store_dyn: Arc<dyn AuditStore> = Arc::clone(&store) as Arc<dyn AuditStore>;
        let (handle, writer) = create_audit_system(store_dyn, 100);

        let writer_handle = tokio::spawn(writer.run());

        handle
            .emit(AuditEvent::RunStateChanged {
                run_id: "run-1".to_string(),
                source: "archidekt".to_string(),
                from_state: "fetching_decks".to_string(),
                to_state: "complete".to_string(),
                reason: None,
            })
            .await;
        drop(handle);

        writer_handle.await.unwrap();

        let records = store.get_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "run_state_changed");
    }
}
