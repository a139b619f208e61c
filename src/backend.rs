use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    ActivityEvent, CohortAggregate, FilterScope, ManualOverride, PeriodRange, TrackedIndividual,
};
use crate::store::{EventStore, SummaryView};

const USER_AGENT: &str = concat!("impact-engagement-engine/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// REST implementation of the event store.
///
/// Carries the opaque bearer credential on every request. Performs no
/// retries; a timeout surfaces as a plain transport error for the caller to
/// handle. HTTP 401/403 map to the fatal auth error unmodified.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, bearer_token: &str) -> Result<Self, StoreError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {bearer_token}")).map_err(|_| {
            StoreError::Transport("bearer token is not a valid header value".to_string())
        })?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|error| StoreError::Transport(error.to_string()))?;

        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Ok(Self { http, base_url })
    }

    async fn request(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, StoreError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, "querying engagement backend");
        self.http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|error| StoreError::Transport(error.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, StoreError> {
        let response = check_status(self.request(path, query).await?).await?;
        response
            .json()
            .await
            .map_err(|error| StoreError::Decode(error.to_string()))
    }

    /// As `get_json`, with 404 mapped to `None` for optional resources.
    async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, StoreError> {
        let response = self.request(path, query).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map(Some)
            .map_err(|error| StoreError::Decode(error.to_string()))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(StoreError::Auth(status.as_u16()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StoreError::Api(status.as_u16(), body));
    }
    Ok(response)
}

/// Optional filters become query parameters only when set, so that unset
/// filters match everything server-side.
fn scope_query(scope: &FilterScope) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(city) = &scope.city {
        query.push(("city", city.clone()));
    }
    if let Some(sector_id) = scope.sector_id {
        query.push(("sector_id", sector_id.to_string()));
    }
    if let Some(group_id) = scope.family_group_id {
        query.push(("family_group_id", group_id.to_string()));
    }
    if let Some(period) = scope.period {
        query.push(("assigned_period", period.to_string()));
    }
    query
}

#[async_trait]
impl EventStore for ApiClient {
    async fn list_individuals(
        &self,
        scope: &FilterScope,
    ) -> Result<Vec<TrackedIndividual>, StoreError> {
        self.get_json("/individuals", &scope_query(scope)).await
    }

    async fn list_activity_events(
        &self,
        individual_id: Uuid,
        range: &PeriodRange,
    ) -> Result<Vec<ActivityEvent>, StoreError> {
        let mut query = Vec::new();
        if let Some(from) = range.from {
            query.push(("from", from.to_string()));
        }
        if let Some(to) = range.to {
            query.push(("to", to.to_string()));
        }
        self.get_json(
            &format!("/individuals/{individual_id}/activity-events"),
            &query,
        )
        .await
    }

    async fn get_override(
        &self,
        individual_id: Uuid,
    ) -> Result<Option<ManualOverride>, StoreError> {
        self.get_optional(&format!("/individuals/{individual_id}/override"), &[])
            .await
    }

    async fn set_override(&self, record: &ManualOverride) -> Result<(), StoreError> {
        let url = format!(
            "{}/individuals/{}/override",
            self.base_url, record.individual_id
        );
        let response = self
            .http
            .post(&url)
            .json(record)
            .send()
            .await
            .map_err(|error| StoreError::Transport(error.to_string()))?;
        check_status(response).await?;

        tracing::info!(
            individual_id = %record.individual_id,
            tier = ?record.tier,
            set_by = %record.set_by,
            "manual override persisted"
        );
        Ok(())
    }

    async fn fetch_summary(
        &self,
        view: SummaryView,
        scope: &FilterScope,
    ) -> Result<Option<CohortAggregate>, StoreError> {
        let mut query = scope_query(scope);
        query.push(("reference_date", scope.reference_date.to_string()));
        self.get_optional(&format!("/summaries/{}", view.path_segment()), &query)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Period;
    use chrono::NaiveDate;

    #[test]
    fn client_builds_and_trims_trailing_slash() {
        let client = ApiClient::new("https://backend.example/api/", "token-abc").unwrap();
        assert_eq!(client.base_url, "https://backend.example/api");
    }

    #[test]
    fn scope_query_includes_only_set_filters() {
        let mut scope = FilterScope::for_date(NaiveDate::from_ymd_opt(2026, 3, 15).unwrap());
        assert!(scope_query(&scope).is_empty());

        scope.city = Some("Goma".to_string());
        scope.period = Some(Period { year: 2026, month: 3 });
        let query = scope_query(&scope);
        assert_eq!(query.len(), 2);
        assert!(query.contains(&("city", "Goma".to_string())));
        assert!(query.contains(&("assigned_period", "2026-03".to_string())));
    }
}
