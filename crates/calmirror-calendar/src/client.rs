//! Google Calendar API client.

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{RequestBuilder, Response};
use tracing::instrument;

use crate::error::CalendarError;
use crate::retry::{with_retry, RetryConfig};
use crate::types::*;

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Google caps `maxResults` for events.list at 2500.
pub const MAX_PAGE_SIZE: u32 = 2500;

/// Parameters for `events.list`.
///
/// The service rejects a sync token combined with time bounds or property
/// filters, so build queries through the constructors.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub time_min: Option<DateTime<Utc>>,
    pub time_max: Option<DateTime<Utc>>,
    pub sync_token: Option<String>,
    pub page_token: Option<String>,
    pub max_results: Option<u32>,
    pub private_properties: Vec<(String, String)>,
    pub show_deleted: Option<bool>,
}

impl EventQuery {
    /// Changes since `sync_token`.
    pub fn changes_since(sync_token: &str) -> Self {
        Self {
            sync_token: Some(sync_token.to_string()),
            max_results: Some(MAX_PAGE_SIZE),
            ..Self::default()
        }
    }

    /// Events overlapping `[time_min, time_max)`.
    pub fn window(time_min: DateTime<Utc>, time_max: DateTime<Utc>) -> Self {
        Self {
            time_min: Some(time_min),
            time_max: Some(time_max),
            max_results: Some(MAX_PAGE_SIZE),
            ..Self::default()
        }
    }

    /// Live events carrying every given private extended property.
    pub fn tagged(properties: &[(&str, &str)]) -> Self {
        Self {
            private_properties: properties
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            show_deleted: Some(false),
            ..Self::default()
        }
    }

    pub fn page(mut self, page_token: Option<String>) -> Self {
        self.page_token = page_token;
        self
    }

    fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(t) = &self.time_min {
            params.push(("timeMin", t.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }
        if let Some(t) = &self.time_max {
            params.push(("timeMax", t.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }
        if let Some(token) = &self.sync_token {
            params.push(("syncToken", token.clone()));
        }
        if let Some(token) = &self.page_token {
            params.push(("pageToken", token.clone()));
        }
        if let Some(max) = self.max_results {
            params.push(("maxResults", max.to_string()));
        }
        for (key, value) in &self.private_properties {
            params.push(("privateExtendedProperty", format!("{}={}", key, value)));
        }
        if let Some(show) = self.show_deleted {
            params.push(("showDeleted", show.to_string()));
        }
        params
    }
}

pub struct CalendarClient {
    client: reqwest::Client,
    access_token: String,
    base_url: String,
    retry: RetryConfig,
}

impl CalendarClient {
    pub fn new(access_token: &str) -> Self {
        Self::new_with_base_url(access_token, CALENDAR_API_BASE)
    }

    /// Client against a different API root (mock servers, proxies).
    pub fn new_with_base_url(access_token: &str, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token: access_token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id)
        )
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> String {
        format!(
            "{}/{}",
            self.events_url(calendar_id),
            urlencoding::encode(event_id)
        )
    }

    async fn send<F>(&self, build: F) -> Result<Response, CalendarError>
    where
        F: Fn() -> RequestBuilder,
    {
        self.send_with(&self.retry, build).await
    }

    async fn send_with<F>(&self, retry: &RetryConfig, build: F) -> Result<Response, CalendarError>
    where
        F: Fn() -> RequestBuilder,
    {
        let response = with_retry(retry, || {
            build().header("Authorization", self.auth_header()).send()
        })
        .await?;
        Ok(response)
    }

    /// List all calendars on the user's calendar list.
    #[instrument(skip(self), level = "info")]
    pub async fn list_calendars(&self) -> Result<Vec<Calendar>, CalendarError> {
        let url = format!("{}/users/me/calendarList", self.base_url);
        let mut calendars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let response = self
                .send(|| {
                    let request = self.client.get(&url);
                    match &page_token {
                        Some(token) => request.query(&[("pageToken", token)]),
                        None => request,
                    }
                })
                .await?;

            let resp: CalendarListResponse = self.handle_response(response).await?;
            calendars.extend(resp.items.into_iter().map(Calendar::from));

            match resp.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(calendars)
    }

    /// Fetch one page of events.
    #[instrument(skip(self, query), level = "debug")]
    pub async fn list_events(
        &self,
        calendar_id: &str,
        query: &EventQuery,
    ) -> Result<EventListResponse, CalendarError> {
        let url = self.events_url(calendar_id);
        let params = query.to_params();

        let response = self.send(|| self.client.get(&url).query(&params)).await?;
        self.handle_response(response).await
    }

    /// Get a single event.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_event(&self, calendar_id: &str, event_id: &str) -> Result<Event, CalendarError> {
        let url = self.event_url(calendar_id, event_id);

        let response = self.send(|| self.client.get(&url)).await?;
        self.handle_response(response).await
    }

    /// Insert a new event. Guests are never notified.
    ///
    /// A server error or timeout is not retried, since the event may already
    /// exist; the caller's next lookup finds it.
    #[instrument(skip(self, event), fields(summary = event.label()), level = "info")]
    pub async fn insert_event(&self, calendar_id: &str, event: &Event) -> Result<Event, CalendarError> {
        let url = self.events_url(calendar_id);

        let response = self
            .send_with(&self.retry.non_idempotent(), || {
                self.client
                    .post(&url)
                    .query(&[("sendUpdates", "none")])
                    .json(event)
            })
            .await?;
        self.handle_response(response).await
    }

    /// Replace an existing event. Guests are never notified.
    #[instrument(skip(self, event), fields(summary = event.label()), level = "info")]
    pub async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &Event,
    ) -> Result<Event, CalendarError> {
        let url = self.event_url(calendar_id, event_id);

        let response = self
            .send(|| {
                self.client
                    .put(&url)
                    .query(&[("sendUpdates", "none")])
                    .json(event)
            })
            .await?;
        self.handle_response(response).await
    }

    /// Delete an event. An event that is already gone counts as deleted.
    #[instrument(skip(self), level = "info")]
    pub async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), CalendarError> {
        let url = self.event_url(calendar_id, event_id);

        let response = self
            .send(|| self.client.delete(&url).query(&[("sendUpdates", "none")]))
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.as_u16() == 404 || status.as_u16() == 410 {
            tracing::debug!("Event {} already deleted ({})", event_id, status);
            Ok(())
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<T, CalendarError> {
        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| CalendarError::ApiError(format!("JSON parse error: {}", e)))
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    async fn error_from_response(response: Response) -> CalendarError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        let text = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 => CalendarError::TokenExpired,
            // Google reports quota exhaustion as 403 with a rate-limit reason
            403 if text.contains("ateLimitExceeded") => {
                CalendarError::RateLimited(retry_after.unwrap_or(60))
            }
            403 => CalendarError::AuthRequired,
            404 => CalendarError::NotFound(text),
            409 | 412 => CalendarError::Conflict,
            410 => CalendarError::SyncTokenInvalid,
            429 => CalendarError::RateLimited(retry_after.unwrap_or(60)),
            _ => CalendarError::ApiError(format!("{}: {}", status, text)),
        }
    }
}
