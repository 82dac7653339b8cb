//! Remote calendar adapter.
//!
//! Wraps the Google Calendar v3 REST API behind the [`CalendarProvider`]
//! trait so route handlers and tests never talk to Google directly.
//! Credentials are passed into every call rather than held on the client;
//! when the adapter has to refresh an expired access token it reports the
//! rotated fields back to the caller through [`TokenRotation`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::AppConfig;
use crate::models::User;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const API_BASE: &str = "https://www.googleapis.com/calendar/v3";

const CALENDAR_SCOPES: &str =
    "https://www.googleapis.com/auth/calendar https://www.googleapis.com/auth/calendar.events";

/// Per-call credential context for one user's calendar.
///
/// Built fresh from the user row for every adapter call; nothing is cached
/// on the client, so concurrent requests for different users cannot step on
/// each other's tokens.
#[derive(Debug, Clone)]
pub struct CalendarCredentials {
    pub calendar_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expiry: Option<DateTime<Utc>>,
}

impl CalendarCredentials {
    /// Both tokens are a hard precondition for any calendar operation.
    pub fn for_user(user: &User) -> Result<Self> {
        let access_token = user
            .google_access_token
            .clone()
            .context("user has no Google Calendar access token")?;
        let refresh_token = user
            .google_refresh_token
            .clone()
            .context("user has no Google Calendar refresh token")?;
        Ok(Self {
            calendar_id: user
                .google_calendar_id
                .clone()
                .unwrap_or_else(|| "primary".to_string()),
            access_token,
            refresh_token,
            expiry: user.google_token_expiry,
        })
    }
}

/// Token fields rotated by the provider during a call. Any subset may be
/// present; each field must be persisted independently as soon as received.
#[derive(Debug, Clone, Default)]
pub struct TokenRotation {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
}

impl TokenRotation {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.expiry.is_none()
    }
}

/// Result of a provider call plus any token rotation that happened while
/// performing it.
#[derive(Debug)]
pub struct ProviderResponse<T> {
    pub value: T,
    pub rotation: TokenRotation,
}

/// Tokens returned by the one-time authorization-code exchange.
#[derive(Debug, Clone)]
pub struct GoogleTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expiry: DateTime<Utc>,
}

/// Event fields we mirror into the remote calendar.
#[derive(Debug, Clone)]
pub struct EventPayload {
    pub title: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventTime {
    #[serde(rename = "dateTime", skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<Utc>>,
    /// All-day events carry a bare date instead of an instant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalendarEvent {
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
}

#[async_trait]
pub trait CalendarProvider: Send + Sync + 'static {
    /// Consent URL the browser client sends the user to.
    fn auth_url(&self) -> String;

    /// Exchange an authorization code for a token set.
    async fn exchange_code(&self, code: &str) -> Result<GoogleTokens>;

    /// Create a mirrored event; returns the remote event identifier.
    async fn create_event(
        &self,
        creds: &CalendarCredentials,
        event: &EventPayload,
    ) -> Result<ProviderResponse<String>>;

    async fn update_event(
        &self,
        creds: &CalendarCredentials,
        event_id: &str,
        event: &EventPayload,
    ) -> Result<ProviderResponse<()>>;

    async fn delete_event(
        &self,
        creds: &CalendarCredentials,
        event_id: &str,
    ) -> Result<ProviderResponse<()>>;

    /// List events intersecting [start, end), expanded to single events and
    /// ordered by start time.
    async fn list_events(
        &self,
        creds: &CalendarCredentials,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ProviderResponse<Vec<CalendarEvent>>>;
}

/// Advisory free/busy check over already-fetched remote events.
///
/// Half-open interval semantics: a query that starts exactly when an event
/// ends (or ends exactly when one starts) does not overlap. Events without
/// concrete instants (all-day events) are skipped.
pub fn range_is_free(events: &[CalendarEvent], start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    for event in events {
        let event_start = event.start.as_ref().and_then(|t| t.date_time);
        let event_end = event.end.as_ref().and_then(|t| t.date_time);
        let (Some(event_start), Some(event_end)) = (event_start, event_end) else {
            continue;
        };

        let overlaps = (start >= event_start && start < event_end)
            || (end > event_start && end <= event_end)
            || (start <= event_start && end >= event_end);
        if overlaps {
            return false;
        }
    }
    true
}

pub struct GoogleCalendar {
    http: reqwest::Client,
    api_base: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl GoogleCalendar {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: API_BASE.to_string(),
            token_url: TOKEN_URL.to_string(),
            client_id: config.google_client_id.clone(),
            client_secret: config.google_client_secret.clone(),
            redirect_uri: config.google_redirect_uri.clone(),
        }
    }

    /// Refresh the access token when the stored one has expired.
    ///
    /// Returns the token to use for the call plus the rotation to persist.
    async fn ensure_access(
        &self,
        creds: &CalendarCredentials,
    ) -> Result<(String, TokenRotation)> {
        let expired = creds.expiry.map_or(true, |expiry| expiry <= Utc::now());
        if !expired {
            return Ok((creds.access_token.clone(), TokenRotation::default()));
        }

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", creds.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .context("token refresh request failed")?;
        let refreshed: TokenResponse = check_json(response).await?;

        let access_token = refreshed
            .access_token
            .context("token refresh response carried no access token")?;
        let rotation = TokenRotation {
            access_token: Some(access_token.clone()),
            refresh_token: refreshed.refresh_token,
            expiry: refreshed
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        };
        Ok((access_token, rotation))
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!("{}/calendars/{}/events", self.api_base, calendar_id)
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendar {
    fn auth_url(&self) -> String {
        let url = Url::parse_with_params(
            AUTH_URL,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", CALENDAR_SCOPES),
                ("access_type", "offline"),
                // Force a refresh token on every connect.
                ("prompt", "consent"),
            ],
        )
        .expect("static auth URL must parse");
        url.to_string()
    }

    async fn exchange_code(&self, code: &str) -> Result<GoogleTokens> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .context("authorization code exchange failed")?;
        let tokens: TokenResponse = check_json(response).await?;

        Ok(GoogleTokens {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expiry: Utc::now() + Duration::seconds(tokens.expires_in.unwrap_or(0)),
        })
    }

    async fn create_event(
        &self,
        creds: &CalendarCredentials,
        event: &EventPayload,
    ) -> Result<ProviderResponse<String>> {
        let (access_token, rotation) = self.ensure_access(creds).await?;

        let response = self
            .http
            .post(self.events_url(&creds.calendar_id))
            .bearer_auth(&access_token)
            .json(&event_body(event))
            .send()
            .await
            .context("event create request failed")?;
        let created: CreatedEvent = check_json(response).await?;

        let id = created.id.context("event create response carried no id")?;
        Ok(ProviderResponse {
            value: id,
            rotation,
        })
    }

    async fn update_event(
        &self,
        creds: &CalendarCredentials,
        event_id: &str,
        event: &EventPayload,
    ) -> Result<ProviderResponse<()>> {
        let (access_token, rotation) = self.ensure_access(creds).await?;

        let url = format!("{}/{}", self.events_url(&creds.calendar_id), event_id);
        let response = self
            .http
            .put(url)
            .bearer_auth(&access_token)
            .json(&event_body(event))
            .send()
            .await
            .context("event update request failed")?;
        check_status(response).await?;

        Ok(ProviderResponse {
            value: (),
            rotation,
        })
    }

    async fn delete_event(
        &self,
        creds: &CalendarCredentials,
        event_id: &str,
    ) -> Result<ProviderResponse<()>> {
        let (access_token, rotation) = self.ensure_access(creds).await?;

        let url = format!("{}/{}", self.events_url(&creds.calendar_id), event_id);
        let response = self
            .http
            .delete(url)
            .bearer_auth(&access_token)
            .send()
            .await
            .context("event delete request failed")?;
        check_status(response).await?;

        Ok(ProviderResponse {
            value: (),
            rotation,
        })
    }

    async fn list_events(
        &self,
        creds: &CalendarCredentials,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ProviderResponse<Vec<CalendarEvent>>> {
        let (access_token, rotation) = self.ensure_access(creds).await?;

        let response = self
            .http
            .get(self.events_url(&creds.calendar_id))
            .bearer_auth(&access_token)
            .query(&[
                ("timeMin", start.to_rfc3339()),
                ("timeMax", end.to_rfc3339()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ])
            .send()
            .await
            .context("event list request failed")?;
        let listing: EventListing = check_json(response).await?;

        Ok(ProviderResponse {
            value: listing.items,
            rotation,
        })
    }
}

fn event_body(event: &EventPayload) -> serde_json::Value {
    let mut body = serde_json::json!({
        "summary": event.title,
        "description": event.description,
        "start": { "dateTime": event.start_time.to_rfc3339(), "timeZone": "UTC" },
        "end": { "dateTime": event.end_time.to_rfc3339(), "timeZone": "UTC" },
    });
    if let Some(location) = &event.location {
        body["location"] = serde_json::Value::String(location.clone());
    }
    body
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct CreatedEvent {
    id: Option<String>,
}

#[derive(Deserialize, Default)]
struct EventListing {
    #[serde(default)]
    items: Vec<CalendarEvent>,
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("Google Calendar API returned {status}: {body}");
}

async fn check_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let response = check_status(response).await?;
    response
        .json()
        .await
        .context("failed to decode Google Calendar API response")
}
