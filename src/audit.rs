use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{ManualOverride, Tier};
use crate::store::EventStore;

/// Records manual tier overrides with actor and comment.
///
/// The backend keeps one current record per individual (last write wins);
/// this log additionally journals every accepted write in order, so the
/// trail of changes stays inspectable. Clearing an override writes a record
/// with no tier, which reverts display to the computed tier.
pub struct OverrideAuditLog<S> {
    store: Arc<S>,
    journal: Mutex<Vec<ManualOverride>>,
}

impl<S: EventStore> OverrideAuditLog<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Validates, persists, and journals one override write. An override
    /// with no tier and no comment is rejected before any network call.
    pub async fn record(
        &self,
        individual_id: Uuid,
        tier: Option<Tier>,
        comment: &str,
        actor: &str,
    ) -> Result<ManualOverride, EngineError> {
        if tier.is_none() && comment.trim().is_empty() {
            return Err(EngineError::Validation(
                "an override needs a tier or a comment".to_string(),
            ));
        }

        let record = ManualOverride {
            individual_id,
            tier,
            comment: comment.trim().to_string(),
            set_by: actor.to_string(),
            set_at: Utc::now(),
        };
        self.store.set_override(&record).await?;
        self.journal.lock().await.push(record.clone());

        tracing::info!(
            individual_id = %individual_id,
            tier = ?tier,
            actor,
            "override recorded"
        );
        Ok(record)
    }

    /// Derived projection: the latest journaled write for an individual.
    pub async fn current(&self, individual_id: Uuid) -> Option<ManualOverride> {
        self.journal
            .lock()
            .await
            .iter()
            .rev()
            .find(|record| record.individual_id == individual_id)
            .cloned()
    }

    /// Ordered trail of journaled writes for an individual.
    pub async fn history(&self, individual_id: Uuid) -> Vec<ManualOverride> {
        self.journal
            .lock()
            .await
            .iter()
            .filter(|record| record.individual_id == individual_id)
            .cloned()
            .collect()
    }
}
