//! Medallion tier manager.
//!
//! Records enter as [`Tier::Bronze`] and may only move forward
//! (bronze → silver → gold, skipping allowed). Promotions go through the
//! store's compare-and-set so two concurrent promotions can never leave a
//! record at a lower tier than one of them already reached.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use crate::error::{StoreError, TierError};
use crate::models::{Record, Tier};
use crate::store::{Store, TierUpdate};

/// Actor name used by [`TierManager::promote`].
pub const SYSTEM_ACTOR: &str = "system";

/// Allows `actor` to promote records up to and including `max_tier`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PromotionGrant {
    pub actor: String,
    pub max_tier: Tier,
}

pub struct TierManager {
    store: Arc<dyn Store>,
    /// `None` means every actor may promote to any tier.
    grants: Option<Vec<PromotionGrant>>,
}

impl TierManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            grants: None,
        }
    }

    /// Restrict non-system actors to their granted ceilings.
    pub fn with_grants(mut self, grants: Vec<PromotionGrant>) -> Self {
        self.grants = Some(grants);
        self
    }

    /// Promote as the unrestricted system actor.
    pub async fn promote(&self, record_id: &str, target: Tier) -> Result<Record, TierError> {
        self.promote_as(SYSTEM_ACTOR, record_id, target).await
    }

    pub async fn promote_as(
        &self,
        actor: &str,
        record_id: &str,
        target: Tier,
    ) -> Result<Record, TierError> {
        self.check_grant(actor, target)?;

        let mut current = self
            .store
            .get_record(record_id)
            .await
            .map_err(TierError::Store)?
            .ok_or_else(|| TierError::NotFound(record_id.to_string()))?;

        loop {
            if target <= current.tier {
                return Err(TierError::InvalidTransition {
                    record_id: record_id.to_string(),
                    from: current.tier,
                    to: target,
                });
            }
            let update = self
                .store
                .update_tier(record_id, current.tier, target, Utc::now())
                .await
                .map_err(|e| match e {
                    StoreError::NotFound(id) => TierError::NotFound(id),
                    other => TierError::Store(other),
                })?;
            match update {
                TierUpdate::Applied(record) => {
                    tracing::info!(
                        record_id = %record_id,
                        actor = %actor,
                        from = %current.tier,
                        to = %target,
                        "record promoted"
                    );
                    return Ok(record);
                }
                // Someone else moved it; re-check against the fresh tier.
                TierUpdate::Conflict(fresh) => current = fresh,
            }
        }
    }

    fn check_grant(&self, actor: &str, target: Tier) -> Result<(), TierError> {
        let Some(ref grants) = self.grants else {
            return Ok(());
        };
        if actor == SYSTEM_ACTOR {
            return Ok(());
        }
        let allowed = grants
            .iter()
            .any(|g| g.actor == actor && target <= g.max_tier);
        if allowed {
            Ok(())
        } else {
            Err(TierError::NotPermitted {
                actor: actor.to_string(),
                to: target,
            })
        }
    }
}
