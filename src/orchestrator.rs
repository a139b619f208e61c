use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::cohort;
use crate::error::{EngineError, StoreError};
use crate::models::{
    CohortAggregate, FilterScope, IndividualAssessment, Period, PeriodRange,
};
use crate::scoring;
use crate::store::{EventStore, SummaryView};

/// How long the visible loading flag outlives the last arriving result, so
/// near-instant cycles do not flicker. Never defers cancellation: a
/// superseded cycle is discarded immediately.
pub const LOADING_CLEAR_DELAY: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Fetching,
}

/// One render-ready result of a query cycle. Everything a dashboard view
/// needs, merged from the cycle's sub-queries.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSnapshot {
    pub cycle: u64,
    pub scope: FilterScope,
    pub assessments: Vec<IndividualAssessment>,
    pub promotion_summary: CohortAggregate,
    pub family_summary: CohortAggregate,
    pub service_summary: CohortAggregate,
}

/// Externally visible orchestrator output, published through a watch cell.
#[derive(Debug, Clone, Default)]
pub struct SnapshotState {
    pub loading: bool,
    pub snapshot: Option<DashboardSnapshot>,
}

struct CycleState {
    phase: Phase,
    cycle: u64,
    token: CancellationToken,
}

/// Fans out the independent aggregate queries a dashboard view needs and
/// publishes a single consistent snapshot, never a stale one.
///
/// The current cycle (number, cancellation token, phase) is the only shared
/// mutable state; it is read and written under a mutex held for
/// non-blocking critical sections only. A filter change supersedes the
/// in-flight cycle by cancelling its token; results arriving for a
/// cancelled token are discarded without touching published state.
pub struct QueryOrchestrator<S> {
    store: Arc<S>,
    state: Mutex<CycleState>,
    publication: watch::Sender<SnapshotState>,
}

impl<S: EventStore> QueryOrchestrator<S> {
    pub fn new(store: Arc<S>) -> Self {
        let (publication, _) = watch::channel(SnapshotState::default());
        Self {
            store,
            state: Mutex::new(CycleState {
                phase: Phase::Idle,
                cycle: 0,
                token: CancellationToken::new(),
            }),
            publication,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SnapshotState> {
        self.publication.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    fn state(&self) -> MutexGuard<'_, CycleState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs one query cycle for `scope`.
    ///
    /// Returns `Ok(None)` when a newer cycle superseded this one while it
    /// was fetching and its results were discarded. Sub-query failures
    /// degrade to empty defaults; only credential loss is fatal, halting
    /// the cycle with no partial update.
    pub async fn refresh(
        &self,
        scope: FilterScope,
    ) -> Result<Option<DashboardSnapshot>, EngineError> {
        let (token, cycle) = {
            let mut state = self.state();
            state.token.cancel();
            state.token = CancellationToken::new();
            state.cycle += 1;
            state.phase = Phase::Fetching;
            (state.token.clone(), state.cycle)
        };
        self.publication
            .send_modify(|published| published.loading = true);
        tracing::debug!(cycle, "query cycle started");

        let (assessments, promotions, families, services) = tokio::join!(
            self.fetch_assessments(&scope),
            self.fetch_summary(SummaryView::Promotions, &scope),
            self.fetch_summary(SummaryView::FamilyGroups, &scope),
            self.fetch_summary(SummaryView::Services, &scope),
        );

        let mut fatal = None;
        let assessments = settle(assessments, "assessments", &mut fatal);
        let promotion_summary = settle(promotions, "promotion summary", &mut fatal);
        let family_summary = settle(families, "family summary", &mut fatal);
        let service_summary = settle(services, "service summary", &mut fatal);

        if let Some(status) = fatal {
            let mut state = self.state();
            if state.cycle == cycle {
                state.phase = Phase::Idle;
                drop(state);
                self.publication
                    .send_modify(|published| published.loading = false);
            }
            return Err(EngineError::Auth(status));
        }

        if token.is_cancelled() {
            tracing::debug!(cycle, "cycle superseded; results discarded");
            return Ok(None);
        }

        let snapshot = DashboardSnapshot {
            cycle,
            scope,
            assessments,
            promotion_summary,
            family_summary,
            service_summary,
        };

        {
            // Currency check and publication are one critical section, so a
            // cycle superseded mid-check can never overwrite a newer
            // snapshot.
            let state = self.state();
            if state.cycle != cycle {
                tracing::debug!(cycle, "cycle superseded; results discarded");
                return Ok(None);
            }
            self.publication
                .send_modify(|published| published.snapshot = Some(snapshot.clone()));
        }
        tracing::debug!(cycle, "snapshot published");

        // The flag drop waits out the flicker window; a newer cycle owns
        // the flag from the moment it starts.
        tokio::time::sleep(LOADING_CLEAR_DELAY).await;
        let mut state = self.state();
        if state.cycle == cycle {
            state.phase = Phase::Idle;
            drop(state);
            self.publication
                .send_modify(|published| published.loading = false);
        }

        Ok(Some(snapshot))
    }

    /// Individual dashboard rows: membership list, then events and override
    /// per member, scored by the engine. The whole sub-query degrades as
    /// one unit on failure.
    async fn fetch_assessments(
        &self,
        scope: &FilterScope,
    ) -> Result<Vec<IndividualAssessment>, StoreError> {
        let individuals = self.store.list_individuals(scope).await?;
        let mut assessments = Vec::with_capacity(individuals.len());

        for individual in individuals {
            let events = self
                .store
                .list_activity_events(individual.id, &PeriodRange::default())
                .await?;
            let manual = self.store.get_override(individual.id).await?;
            let assessment = scoring::assess(&events, manual.as_ref());
            assessments.push(IndividualAssessment {
                individual_id: individual.id,
                display_name: individual.display_name,
                tier: assessment.tier,
                average_score: assessment.average_score,
                months_count: assessment.months_count,
                is_manual: assessment.is_manual,
            });
        }

        Ok(assessments)
    }

    /// One cohort summary: the backend's pre-aggregated view when it serves
    /// the slice, otherwise recomputed client-side from the same slice.
    async fn fetch_summary(
        &self,
        view: SummaryView,
        scope: &FilterScope,
    ) -> Result<CohortAggregate, StoreError> {
        let scope = view_scope(view, scope);
        if let Some(aggregate) = self.store.fetch_summary(view, &scope).await? {
            return Ok(aggregate);
        }

        let individuals = self.store.list_individuals(&scope).await?;
        let reference_month = Period::from_date(scope.reference_date);
        let mut presence_events = Vec::new();
        for individual in &individuals {
            let events = self
                .store
                .list_activity_events(individual.id, &PeriodRange::single(reference_month))
                .await?;
            presence_events.extend(events);
        }

        Ok(cohort::aggregate(&scope, &individuals, &presence_events))
    }
}

/// Settle-all: a failed sub-query yields its default value and the cycle
/// continues; credential loss is recorded as fatal instead.
fn settle<T: Default>(
    result: Result<T, StoreError>,
    sub_query: &str,
    fatal: &mut Option<u16>,
) -> T {
    match result {
        Ok(value) => value,
        Err(StoreError::Auth(status)) => {
            *fatal = Some(status);
            T::default()
        }
        Err(error) => {
            tracing::warn!(sub_query, error = %error, "sub-query failed; substituting empty result");
            T::default()
        }
    }
}

/// Narrows the filter scope to the slice a view is about, so the client
/// fallback computes the same slice the backend would have served.
fn view_scope(view: SummaryView, scope: &FilterScope) -> FilterScope {
    let mut scoped = FilterScope::for_date(scope.reference_date);
    scoped.city = scope.city.clone();
    match view {
        SummaryView::Promotions => scoped.period = scope.period,
        SummaryView::FamilyGroups => {
            scoped.sector_id = scope.sector_id;
            scoped.family_group_id = scope.family_group_id;
        }
        SummaryView::Services => {}
    }
    scoped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityEvent, CohortKind, TrackedIndividual};
    use crate::store::fakes::InMemoryStore;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn reference_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 15).unwrap()
    }

    fn city_scope(city: &str) -> FilterScope {
        let mut scope = FilterScope::for_date(reference_date());
        scope.city = Some(city.to_string());
        scope
    }

    fn member(city: &str) -> TrackedIndividual {
        TrackedIndividual {
            id: Uuid::new_v4(),
            display_name: format!("{city} member"),
            cohort_kind: CohortKind::Newcomer,
            city: city.to_string(),
            sector_id: None,
            family_group_id: None,
            assigned_period: None,
            joined_at: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
        }
    }

    fn presence(individual_id: Uuid, satisfied: bool) -> ActivityEvent {
        ActivityEvent {
            individual_id,
            occurred_at: reference_date(),
            kind: "sunday_attendance".to_string(),
            satisfied,
        }
    }

    #[tokio::test]
    async fn newer_cycle_wins_even_when_older_resolves_later() {
        let mut store = InMemoryStore::default();
        store.individuals = vec![member("Lyon"), member("Paris")];
        store
            .delays_by_city
            .insert("Lyon".to_string(), Duration::from_millis(100));
        store
            .delays_by_city
            .insert("Paris".to_string(), Duration::from_millis(5));

        let orchestrator = Arc::new(QueryOrchestrator::new(Arc::new(store)));

        let slow = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.refresh(city_scope("Lyon")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fast = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.refresh(city_scope("Paris")).await })
        };

        let slow_result = slow.await.unwrap().unwrap();
        let fast_result = fast.await.unwrap().unwrap();

        // The older cycle's late results were discarded silently.
        assert!(slow_result.is_none());
        let fast_snapshot = fast_result.expect("newer cycle publishes");
        assert_eq!(fast_snapshot.scope.city.as_deref(), Some("Paris"));

        let published = orchestrator.subscribe().borrow().clone();
        let published_snapshot = published.snapshot.expect("snapshot published");
        assert_eq!(published_snapshot.scope.city.as_deref(), Some("Paris"));
        assert!(!published.loading);
        assert_eq!(orchestrator.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn failed_sub_query_degrades_without_aborting_the_cycle() {
        let mut store = InMemoryStore::default();
        let congregant = member("Paris");
        store
            .events
            .insert(congregant.id, vec![presence(congregant.id, true)]);
        store.individuals = vec![congregant];
        store.fail_summaries = true;

        let orchestrator = QueryOrchestrator::new(Arc::new(store));
        let snapshot = orchestrator
            .refresh(city_scope("Paris"))
            .await
            .unwrap()
            .expect("cycle publishes despite summary failures");

        assert_eq!(snapshot.assessments.len(), 1);
        assert_eq!(snapshot.promotion_summary, CohortAggregate::default());
        assert_eq!(snapshot.service_summary, CohortAggregate::default());
    }

    #[tokio::test]
    async fn credential_loss_halts_the_cycle_with_no_partial_update() {
        let mut store = InMemoryStore::default();
        store.individuals = vec![member("Paris")];
        store.reject_credentials = true;

        let orchestrator = QueryOrchestrator::new(Arc::new(store));
        let error = orchestrator
            .refresh(city_scope("Paris"))
            .await
            .expect_err("auth loss is fatal");
        assert!(matches!(error, EngineError::Auth(401)));

        let published = orchestrator.subscribe().borrow().clone();
        assert!(published.snapshot.is_none());
        assert!(!published.loading);
        assert_eq!(orchestrator.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn backend_summary_is_consumed_as_is() {
        let mut store = InMemoryStore::default();
        store.individuals = vec![member("Paris")];
        store.summaries.insert(
            SummaryView::Promotions,
            CohortAggregate {
                total_members: 42,
                present_count: 30,
                absent_count: 5,
                new_members_count: 3,
                fidelisation_rate: 71.4,
            },
        );

        let orchestrator = QueryOrchestrator::new(Arc::new(store));
        let snapshot = orchestrator
            .refresh(city_scope("Paris"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(snapshot.promotion_summary.total_members, 42);
        assert_eq!(snapshot.promotion_summary.fidelisation_rate, 71.4);
    }

    #[tokio::test]
    async fn missing_backend_summary_is_recomputed_client_side() {
        let mut store = InMemoryStore::default();
        let faithful = member("Paris");
        let absent = member("Paris");
        store
            .events
            .insert(faithful.id, vec![presence(faithful.id, true)]);
        store
            .events
            .insert(absent.id, vec![presence(absent.id, false)]);
        store.individuals = vec![faithful, absent];

        let orchestrator = QueryOrchestrator::new(Arc::new(store));
        let snapshot = orchestrator
            .refresh(city_scope("Paris"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(snapshot.service_summary.total_members, 2);
        assert_eq!(snapshot.service_summary.present_count, 1);
        assert_eq!(snapshot.service_summary.absent_count, 1);
        assert_eq!(snapshot.service_summary.fidelisation_rate, 50.0);
    }

    #[tokio::test]
    async fn loading_flag_drops_after_the_clear_delay() {
        let mut store = InMemoryStore::default();
        store.individuals = vec![member("Paris")];

        let orchestrator = Arc::new(QueryOrchestrator::new(Arc::new(store)));
        let receiver = orchestrator.subscribe();

        let cycle = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.refresh(city_scope("Paris")).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Results have settled by now; only the flicker window keeps the
        // flag up.
        assert!(receiver.borrow().loading);

        cycle.await.unwrap().unwrap();
        assert!(!receiver.borrow().loading);
    }
}
