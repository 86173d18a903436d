//! Quota service: a thin, deliberately uncached wrapper over the
//! backend's quota table. Reads always go straight to the backend so
//! callers never see a stale limit; this module performs no
//! enforcement, only storage.

use std::sync::Arc;

use crate::error::Result;
use crate::store::PersistentStore;
use crate::types::{Id, QuotaDetail};

pub struct QuotaService {
    backend: Arc<dyn PersistentStore>,
}

impl QuotaService {
    pub fn new(backend: Arc<dyn PersistentStore>) -> Self {
        Self { backend }
    }

    /// `value == -1` denotes unlimited.
    pub async fn update_quota(&self, tenant_id: Id, name: String, value: i64) -> Result<()> {
        self.backend
            .upsert_quota(&QuotaDetail { tenant_id, name, value })
            .await?;
        Ok(())
    }

    pub async fn get_quotas(&self, tenant_id: &str) -> Result<Vec<QuotaDetail>> {
        Ok(self.backend.load_quotas(tenant_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn update_then_get_round_trips() {
        let service = QuotaService::new(Arc::new(MemoryStore::new()));
        service
            .update_quota("t1".into(), "max_instances".into(), 10)
            .await
            .unwrap();
        let quotas = service.get_quotas("t1").await.unwrap();
        assert_eq!(quotas.len(), 1);
        assert_eq!(quotas[0].value, 10);
    }

    #[tokio::test]
    async fn unlimited_sentinel_is_negative_one() {
        let service = QuotaService::new(Arc::new(MemoryStore::new()));
        service
            .update_quota("t1".into(), "max_volumes".into(), QuotaDetail::UNLIMITED)
            .await
            .unwrap();
        let quotas = service.get_quotas("t1").await.unwrap();
        assert_eq!(quotas[0].value, -1);
    }
}
