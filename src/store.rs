use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    ActivityEvent, CohortAggregate, FilterScope, ManualOverride, PeriodRange, TrackedIndividual,
};

/// Pre-aggregated cohort views the backend may serve directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SummaryView {
    Promotions,
    FamilyGroups,
    Services,
}

impl SummaryView {
    pub fn path_segment(&self) -> &'static str {
        match self {
            SummaryView::Promotions => "promotions",
            SummaryView::FamilyGroups => "family-groups",
            SummaryView::Services => "services",
        }
    }
}

/// Typed access to attendance/activity records, membership records, and
/// manual overrides.
///
/// All operations are asynchronous and may fail with a `StoreError`.
/// Implementations perform no retries; retry policy, if any, belongs to
/// the caller. Scope filtering is pushed to the backend; no implementation
/// silently drops records client-side.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn list_individuals(
        &self,
        scope: &FilterScope,
    ) -> Result<Vec<TrackedIndividual>, StoreError>;

    async fn list_activity_events(
        &self,
        individual_id: Uuid,
        range: &PeriodRange,
    ) -> Result<Vec<ActivityEvent>, StoreError>;

    async fn get_override(&self, individual_id: Uuid)
        -> Result<Option<ManualOverride>, StoreError>;

    /// Replaces the individual's current override record (last write wins).
    async fn set_override(&self, record: &ManualOverride) -> Result<(), StoreError>;

    /// Backend pre-aggregated slice for a view; `Ok(None)` means the
    /// backend does not provide it and the caller recomputes client-side.
    async fn fetch_summary(
        &self,
        view: SummaryView,
        scope: &FilterScope,
    ) -> Result<Option<CohortAggregate>, StoreError>;
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use crate::models::Period;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// In-memory store with programmable latency and failure modes, shared
    /// by orchestrator and audit tests.
    #[derive(Default)]
    pub struct InMemoryStore {
        pub individuals: Vec<TrackedIndividual>,
        pub events: HashMap<Uuid, Vec<ActivityEvent>>,
        pub overrides: Mutex<HashMap<Uuid, ManualOverride>>,
        pub summaries: HashMap<SummaryView, CohortAggregate>,
        /// Latency applied to scope-carrying calls, keyed by scope city.
        pub delays_by_city: HashMap<String, Duration>,
        pub reject_credentials: bool,
        pub fail_summaries: bool,
    }

    impl InMemoryStore {
        fn check_credentials(&self) -> Result<(), StoreError> {
            if self.reject_credentials {
                Err(StoreError::Auth(401))
            } else {
                Ok(())
            }
        }

        async fn delay_for(&self, scope: &FilterScope) {
            if let Some(delay) = scope
                .city
                .as_deref()
                .and_then(|city| self.delays_by_city.get(city))
            {
                tokio::time::sleep(*delay).await;
            }
        }
    }

    #[async_trait]
    impl EventStore for InMemoryStore {
        async fn list_individuals(
            &self,
            scope: &FilterScope,
        ) -> Result<Vec<TrackedIndividual>, StoreError> {
            self.check_credentials()?;
            self.delay_for(scope).await;
            Ok(self
                .individuals
                .iter()
                .filter(|individual| scope.matches(individual))
                .cloned()
                .collect())
        }

        async fn list_activity_events(
            &self,
            individual_id: Uuid,
            range: &PeriodRange,
        ) -> Result<Vec<ActivityEvent>, StoreError> {
            self.check_credentials()?;
            Ok(self
                .events
                .get(&individual_id)
                .map(|events| {
                    events
                        .iter()
                        .filter(|event| range.contains(Period::from_date(event.occurred_at)))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn get_override(
            &self,
            individual_id: Uuid,
        ) -> Result<Option<ManualOverride>, StoreError> {
            self.check_credentials()?;
            Ok(self.overrides.lock().await.get(&individual_id).cloned())
        }

        async fn set_override(&self, record: &ManualOverride) -> Result<(), StoreError> {
            self.check_credentials()?;
            self.overrides
                .lock()
                .await
                .insert(record.individual_id, record.clone());
            Ok(())
        }

        async fn fetch_summary(
            &self,
            view: SummaryView,
            scope: &FilterScope,
        ) -> Result<Option<CohortAggregate>, StoreError> {
            self.check_credentials()?;
            self.delay_for(scope).await;
            if self.fail_summaries {
                return Err(StoreError::Transport("connection reset by peer".to_string()));
            }
            Ok(self.summaries.get(&view).cloned())
        }
    }
}
