//! VIP lock manager.

use std::sync::Arc;

use async_trait::async_trait;
use domain::Vip;
use resource_store::{ResourceStore, StoreError};

use crate::error::{LoadBalancerError, Result};

/// Claims and releases VIPs on behalf of a network service.
#[async_trait]
pub trait VipManager: Send + Sync {
    /// Marks the VIP as used by `use_for`. Fails if another service holds it.
    async fn lock(&self, vip: &Vip, use_for: &str) -> Result<()>;

    /// Releases the VIP. Releasing a VIP that no longer exists succeeds.
    async fn unlock(&self, vip: &Vip) -> Result<()>;
}

/// VIP lock kept in the VIP's `use_for` column.
#[derive(Clone)]
pub struct StoreVipManager {
    store: Arc<dyn ResourceStore>,
}

impl StoreVipManager {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl VipManager for StoreVipManager {
    async fn lock(&self, vip: &Vip, use_for: &str) -> Result<()> {
        // The caller's copy may be stale; the stored row decides.
        let current = self
            .store
            .find_vip(vip.id)
            .await?
            .ok_or_else(|| LoadBalancerError::not_found("Vip", vip.id))?;

        if !current.is_available_for(use_for) {
            return Err(LoadBalancerError::VipInUse {
                vip_id: vip.id,
                use_for: current.use_for.unwrap_or_default(),
            });
        }

        self.store.update_vip_use_for(vip.id, Some(use_for)).await?;
        tracing::debug!(vip_id = %vip.id, use_for, "VIP locked");
        Ok(())
    }

    async fn unlock(&self, vip: &Vip) -> Result<()> {
        match self.store.update_vip_use_for(vip.id, None).await {
            Ok(()) | Err(StoreError::NotFound { .. }) => {
                tracing::debug!(vip_id = %vip.id, "VIP unlocked");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
