//! Event log: append-only, tenant-scoped audit trail. Deliberately
//! a separate sink from `log` output — this is tenant-facing
//! history, not operator diagnostics.

use std::sync::Arc;

use chrono::Utc;

use crate::error::Result;
use crate::store::PersistentStore;
use crate::types::{EventRecord, Id, Severity};

pub struct EventLog {
    backend: Arc<dyn PersistentStore>,
}

impl EventLog {
    pub fn new(backend: Arc<dyn PersistentStore>) -> Self {
        Self { backend }
    }

    pub async fn append(&self, tenant_id: Id, severity: Severity, message: String) -> Result<()> {
        let record = EventRecord {
            timestamp: Utc::now(),
            tenant_id,
            severity,
            message,
        };
        self.backend.append_event(&record).await?;
        Ok(())
    }

    pub async fn read_all(&self, tenant_id: &str) -> Result<Vec<EventRecord>> {
        Ok(self.backend.load_events(tenant_id).await?)
    }

    pub async fn clear(&self, tenant_id: &str) -> Result<()> {
        self.backend.clear_events(tenant_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn append_then_read_all_returns_scoped_records() {
        let log = EventLog::new(Arc::new(MemoryStore::new()));
        log.append("t1".into(), Severity::Info, "created".into()).await.unwrap();
        log.append("t2".into(), Severity::Error, "other tenant".into()).await.unwrap();

        let records = log.read_all("t1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "created");
    }

    #[tokio::test]
    async fn clear_removes_only_that_tenants_records() {
        let log = EventLog::new(Arc::new(MemoryStore::new()));
        log.append("t1".into(), Severity::Warn, "a".into()).await.unwrap();
        log.append("t2".into(), Severity::Warn, "b".into()).await.unwrap();
        log.clear("t1").await.unwrap();

        assert!(log.read_all("t1").await.unwrap().is_empty());
        assert_eq!(log.read_all("t2").await.unwrap().len(), 1);
    }
}
