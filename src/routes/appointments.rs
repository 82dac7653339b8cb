use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calendar::{range_is_free, CalendarCredentials, CalendarEvent};
use crate::error::{AppError, AppResult};
use crate::models::{Appointment, NewAppointment, User};
use crate::schema::{appointments, users};
use crate::state::AppState;
use crate::sync;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentRequest {
    pub user_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub location: Option<String>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAppointmentRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub location: Option<String>,
    pub status: Option<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = appointments)]
struct UpdateAppointmentChangeset {
    title: Option<String>,
    description: Option<Option<String>>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    location: Option<Option<String>>,
    status: Option<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRangeQuery {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAvailabilityResponse {
    pub is_available: bool,
}

pub async fn get_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
) -> AppResult<Json<Appointment>> {
    let mut conn = state.db()?;
    let appointment: Option<Appointment> = appointments::table
        .find(appointment_id)
        .first(&mut conn)
        .optional()?;
    appointment
        .map(Json)
        .ok_or_else(|| AppError::not_found("Appointment not found"))
}

pub async fn get_appointments_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Vec<Appointment>>> {
    let mut conn = state.db()?;
    let rows: Vec<Appointment> = appointments::table
        .filter(appointments::user_id.eq(user_id))
        .load(&mut conn)?;
    Ok(Json(rows))
}

pub async fn get_appointments_by_date_range(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<DateRangeQuery>,
) -> AppResult<Json<Vec<Appointment>>> {
    let (Some(start_date), Some(end_date)) = (query.start_date, query.end_date) else {
        return Err(AppError::bad_request("Start date and end date are required"));
    };
    let start = parse_instant(&start_date)?;
    let end = parse_instant(&end_date)?;

    let mut conn = state.db()?;
    let rows: Vec<Appointment> = appointments::table
        .filter(appointments::user_id.eq(user_id))
        .filter(appointments::start_time.ge(start))
        .filter(appointments::end_time.le(end))
        .load(&mut conn)?;
    Ok(Json(rows))
}

pub async fn create_appointment(
    State(state): State<AppState>,
    Json(payload): Json<CreateAppointmentRequest>,
) -> AppResult<(StatusCode, Json<Appointment>)> {
    let (Some(user_id), Some(title), Some(start_time), Some(end_time)) = (
        payload.user_id,
        payload.title,
        payload.start_time,
        payload.end_time,
    ) else {
        return Err(AppError::bad_request(
            "User ID, title, start time, and end time are required",
        ));
    };
    let user_id = Uuid::parse_str(&user_id)
        .map_err(|_| AppError::bad_request("User ID must be a valid UUID"))?;
    let start_time = parse_instant(&start_time)?;
    let end_time = parse_instant(&end_time)?;

    let mut conn = state.db()?;
    let new_appointment = NewAppointment {
        id: Uuid::new_v4(),
        user_id,
        title,
        description: payload.description,
        start_time,
        end_time,
        location: payload.location,
        status: payload.status.unwrap_or_else(|| "pending".to_string()),
    };
    diesel::insert_into(appointments::table)
        .values(&new_appointment)
        .execute(&mut conn)?;
    let appointment: Appointment = appointments::table
        .find(new_appointment.id)
        .first(&mut conn)?;
    drop(conn);

    // Best-effort mirror; a failure leaves the local row authoritative.
    let mirrored = sync::mirror_create(&state, appointment).await;

    Ok((StatusCode::CREATED, Json(mirrored.appointment)))
}

pub async fn update_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Json(payload): Json<UpdateAppointmentRequest>,
) -> AppResult<Json<Appointment>> {
    let mut conn = state.db()?;

    // Missing rows surface as a generic failure on the mutation paths,
    // unlike direct lookups.
    let existing: Option<Appointment> = appointments::table
        .find(appointment_id)
        .first(&mut conn)
        .optional()?;
    existing.ok_or_else(|| AppError::internal("Appointment not found"))?;

    let start_time = payload
        .start_time
        .as_deref()
        .map(parse_instant)
        .transpose()?;
    let end_time = payload.end_time.as_deref().map(parse_instant).transpose()?;

    // Absent description and location clear the stored values, and an absent
    // status resets to "pending"; only title and the instants are partial.
    let changeset = UpdateAppointmentChangeset {
        title: payload.title,
        description: Some(payload.description),
        start_time,
        end_time,
        location: Some(payload.location),
        status: Some(payload.status.unwrap_or_else(|| "pending".to_string())),
        updated_at: Utc::now(),
    };
    diesel::update(appointments::table.find(appointment_id))
        .set(&changeset)
        .execute(&mut conn)?;

    let updated: Appointment = appointments::table.find(appointment_id).first(&mut conn)?;
    drop(conn);

    let outcome = sync::mirror_update(&state, &updated).await;
    tracing::debug!(appointment_id = %updated.id, outcome = ?outcome, "appointment update sync");

    Ok(Json(updated))
}

pub async fn delete_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;

    let existing: Option<Appointment> = appointments::table
        .find(appointment_id)
        .first(&mut conn)
        .optional()?;
    let existing = existing.ok_or_else(|| AppError::internal("Appointment not found"))?;
    drop(conn);

    // Remote removal first, but the local delete goes ahead either way.
    let outcome = sync::mirror_delete(&state, &existing).await;
    tracing::debug!(appointment_id = %existing.id, outcome = ?outcome, "appointment delete sync");

    let mut conn = state.db()?;
    diesel::delete(appointments::table.find(appointment_id)).execute(&mut conn)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_google_events(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<DateRangeQuery>,
) -> AppResult<Json<Vec<CalendarEvent>>> {
    let (Some(start_date), Some(end_date)) = (query.start_date, query.end_date) else {
        return Err(AppError::bad_request("Start date and end date are required"));
    };
    let start = parse_instant(&start_date)?;
    let end = parse_instant(&end_date)?;

    let mut conn = state.db()?;
    let user = connected_user(&mut conn, user_id)?;
    let creds = CalendarCredentials::for_user(&user)?;

    let response = state.calendar.list_events(&creds, start, end).await?;
    sync::apply_token_rotation(&mut conn, user.id, &response.rotation)?;

    Ok(Json(response.value))
}

/// Advisory free/busy check against the mirrored remote calendar only;
/// local appointment rows are not consulted and nothing enforces the
/// result at booking time.
pub async fn check_availability(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<TimeRangeQuery>,
) -> AppResult<Json<CheckAvailabilityResponse>> {
    let (Some(start_time), Some(end_time)) = (query.start_time, query.end_time) else {
        return Err(AppError::bad_request("Start time and end time are required"));
    };
    let start = parse_instant(&start_time)?;
    let end = parse_instant(&end_time)?;

    let mut conn = state.db()?;
    let user = connected_user(&mut conn, user_id)?;
    let creds = CalendarCredentials::for_user(&user)?;

    let response = state.calendar.list_events(&creds, start, end).await?;
    sync::apply_token_rotation(&mut conn, user.id, &response.rotation)?;

    Ok(Json(CheckAvailabilityResponse {
        is_available: range_is_free(&response.value, start, end),
    }))
}

fn connected_user(conn: &mut PgConnection, user_id: Uuid) -> AppResult<User> {
    let user: Option<User> = users::table.find(user_id).first(conn).optional()?;
    user.filter(|user| user.is_calendar_connected)
        .ok_or_else(|| AppError::bad_request("User has no connected Google Calendar"))
}

/// Accepts full RFC 3339 instants as well as the date-only form the
/// browser client sends for range queries.
fn parse_instant(raw: &str) -> Result<DateTime<Utc>, AppError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(parsed.and_utc());
    }
    if let Ok(parsed) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(parsed.and_time(chrono::NaiveTime::MIN).and_utc());
    }
    Err(AppError::bad_request(format!("invalid date: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::parse_instant;
    use chrono::{TimeZone, Utc};

    #[test]
    fn parses_rfc3339_with_zulu_suffix() {
        let parsed = parse_instant("2024-03-13T10:00:00Z").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 13, 10, 0, 0).unwrap());
    }

    #[test]
    fn parses_offset_instants_into_utc() {
        let parsed = parse_instant("2024-03-13T12:00:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 13, 10, 0, 0).unwrap());
    }

    #[test]
    fn parses_bare_dates_at_midnight() {
        let parsed = parse_instant("2024-03-13").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 13, 0, 0, 0).unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_instant("not a date").is_err());
    }
}
