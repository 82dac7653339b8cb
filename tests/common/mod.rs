// Each integration test binary compiles its own copy of this module and
// uses a different slice of the helpers.
#![allow(dead_code)]

use std::env;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use appointment_calendar::calendar::{
    CalendarCredentials, CalendarEvent, CalendarProvider, EventPayload, EventTime, GoogleTokens,
    ProviderResponse, TokenRotation,
};
use appointment_calendar::config::AppConfig;
use appointment_calendar::db::{self, PgPool};
use appointment_calendar::models::{NewUser, User};
use appointment_calendar::routes;
use appointment_calendar::schema::users;
use appointment_calendar::state::AppState;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// In-memory stand-in for the Google Calendar adapter.
///
/// Events pushed onto `busy` come back from `list_events`; created events
/// are recorded so tests can assert on what was mirrored.
#[derive(Default)]
pub struct FakeCalendar {
    created: Mutex<Vec<EventPayload>>,
    deleted: Mutex<Vec<String>>,
    updated: Mutex<Vec<String>>,
    listed: Mutex<Vec<CalendarEvent>>,
    rotation: Mutex<Option<TokenRotation>>,
    fail_events: AtomicBool,
    event_calls: AtomicUsize,
    next_id: AtomicUsize,
}

impl FakeCalendar {
    pub async fn push_busy(&self, start: DateTime<Utc>, end: DateTime<Utc>) {
        let mut listed = self.listed.lock().await;
        let id = format!("busy-{}", listed.len());
        listed.push(CalendarEvent {
            id: Some(id),
            summary: None,
            start: Some(EventTime {
                date_time: Some(start),
                date: None,
            }),
            end: Some(EventTime {
                date_time: Some(end),
                date: None,
            }),
        });
    }

    pub async fn push_all_day(&self, date: &str) {
        let mut listed = self.listed.lock().await;
        let id = format!("allday-{}", listed.len());
        listed.push(CalendarEvent {
            id: Some(id),
            summary: None,
            start: Some(EventTime {
                date_time: None,
                date: Some(date.to_string()),
            }),
            end: Some(EventTime {
                date_time: None,
                date: Some(date.to_string()),
            }),
        });
    }

    pub async fn set_rotation(&self, rotation: TokenRotation) {
        *self.rotation.lock().await = Some(rotation);
    }

    pub fn fail_event_operations(&self, fail: bool) {
        self.fail_events.store(fail, Ordering::SeqCst);
    }

    pub fn event_call_count(&self) -> usize {
        self.event_calls.load(Ordering::SeqCst)
    }

    pub async fn created_events(&self) -> Vec<EventPayload> {
        self.created.lock().await.clone()
    }

    pub async fn deleted_events(&self) -> Vec<String> {
        self.deleted.lock().await.clone()
    }

    pub async fn updated_events(&self) -> Vec<String> {
        self.updated.lock().await.clone()
    }

    async fn take_rotation(&self) -> TokenRotation {
        self.rotation.lock().await.take().unwrap_or_default()
    }

    fn record_call(&self) -> Result<()> {
        self.event_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_events.load(Ordering::SeqCst) {
            bail!("fake calendar is unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl CalendarProvider for FakeCalendar {
    fn auth_url(&self) -> String {
        "https://accounts.google.com/o/oauth2/v2/auth?client_id=fake".to_string()
    }

    async fn exchange_code(&self, code: &str) -> Result<GoogleTokens> {
        match code {
            "no-refresh-code" => Ok(GoogleTokens {
                access_token: Some("fake-access".to_string()),
                refresh_token: None,
                expiry: Utc::now() + Duration::hours(1),
            }),
            _ => Ok(GoogleTokens {
                access_token: Some("fake-access".to_string()),
                refresh_token: Some("fake-refresh".to_string()),
                expiry: Utc::now() + Duration::hours(1),
            }),
        }
    }

    async fn create_event(
        &self,
        _creds: &CalendarCredentials,
        event: &EventPayload,
    ) -> Result<ProviderResponse<String>> {
        self.record_call()?;
        self.created.lock().await.push(event.clone());
        let id = format!("fake-event-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        Ok(ProviderResponse {
            value: id,
            rotation: self.take_rotation().await,
        })
    }

    async fn update_event(
        &self,
        _creds: &CalendarCredentials,
        event_id: &str,
        _event: &EventPayload,
    ) -> Result<ProviderResponse<()>> {
        self.record_call()?;
        self.updated.lock().await.push(event_id.to_string());
        Ok(ProviderResponse {
            value: (),
            rotation: self.take_rotation().await,
        })
    }

    async fn delete_event(
        &self,
        _creds: &CalendarCredentials,
        event_id: &str,
    ) -> Result<ProviderResponse<()>> {
        self.record_call()?;
        self.deleted.lock().await.push(event_id.to_string());
        Ok(ProviderResponse {
            value: (),
            rotation: self.take_rotation().await,
        })
    }

    async fn list_events(
        &self,
        _creds: &CalendarCredentials,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<ProviderResponse<Vec<CalendarEvent>>> {
        self.record_call()?;
        Ok(ProviderResponse {
            value: self.listed.lock().await.clone(),
            rotation: self.take_rotation().await,
        })
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    calendar: Arc<FakeCalendar>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: 2,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            cors_allowed_origin: None,
            google_client_id: "test-client".to_string(),
            google_client_secret: "test-secret".to_string(),
            google_redirect_uri: "http://localhost/callback".to_string(),
        };

        let pool = db::init_pool(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let calendar = Arc::new(FakeCalendar::default());
        let calendar_for_state: Arc<dyn CalendarProvider> = calendar.clone();
        let state = AppState::new(pool, config, calendar_for_state);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            calendar,
        })
    }

    pub fn calendar(&self) -> Arc<FakeCalendar> {
        self.calendar.clone()
    }

    pub async fn insert_user(&self, email: &str, name: &str) -> Result<Uuid> {
        let email = email.to_string();
        let name = name.to_string();
        self.with_conn(move |conn| {
            let user = NewUser {
                id: Uuid::new_v4(),
                email,
                name,
            };
            diesel::insert_into(users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    /// Mark a user as having a linked calendar, the way a completed OAuth
    /// exchange would.
    pub async fn connect_user(&self, user_id: Uuid) -> Result<()> {
        self.with_conn(move |conn| {
            diesel::update(users::table.find(user_id))
                .set((
                    users::google_calendar_id.eq("primary"),
                    users::google_access_token.eq("stored-access"),
                    users::google_refresh_token.eq("stored-refresh"),
                    users::google_token_expiry.eq(Utc::now() + Duration::hours(1)),
                    users::is_calendar_connected.eq(true),
                ))
                .execute(conn)
                .context("failed to connect user")?;
            Ok(())
        })
        .await
    }

    pub async fn load_user(&self, user_id: Uuid) -> Result<User> {
        self.with_conn(move |conn| {
            users::table
                .find(user_id)
                .first(conn)
                .context("failed to load user")
        })
        .await
    }

    pub async fn appointment_count_for(&self, user_id: Uuid) -> Result<i64> {
        use appointment_calendar::schema::appointments;
        self.with_conn(move |conn| {
            appointments::table
                .filter(appointments::user_id.eq(user_id))
                .count()
                .get_result(conn)
                .context("failed to count appointments")
        })
        .await
    }

    pub async fn availability_count_for(&self, user_id: Uuid) -> Result<i64> {
        use appointment_calendar::schema::availability;
        self.with_conn(move |conn| {
            availability::table
                .filter(availability::user_id.eq(user_id))
                .count()
                .get_result(conn)
                .context("failed to count availability rows")
        })
        .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        self.request_json(Method::POST, path, payload).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        self.request_json(Method::PUT, path, payload).await
    }

    pub async fn get(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn delete(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::DELETE)
            .uri(path)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn request_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        conn.batch_execute("TRUNCATE TABLE availability, appointments, users CASCADE;")
            .context("failed to truncate tables")?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}
