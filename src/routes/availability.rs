use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Availability, NewAvailability};
use crate::schema::availability;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAvailabilityRequest {
    pub user_id: Option<String>,
    pub day_of_week: Option<i32>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub is_available: Option<bool>,
}

#[derive(Deserialize)]
pub struct BulkCreateRequest {
    pub items: Option<Vec<CreateAvailabilityRequest>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAvailabilityRequest {
    pub day_of_week: Option<i32>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub is_available: Option<bool>,
}

#[derive(AsChangeset)]
#[diesel(table_name = availability)]
struct UpdateAvailabilityChangeset {
    day_of_week: Option<i32>,
    start_time: Option<NaiveTime>,
    end_time: Option<NaiveTime>,
    is_available: Option<bool>,
    updated_at: DateTime<Utc>,
}

/// Window times round-trip as timestamps anchored to the epoch date, the
/// shape the browser client has always consumed.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub day_of_week: i32,
    pub start_time: String,
    pub end_time: String,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Availability> for AvailabilityResponse {
    fn from(row: Availability) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            day_of_week: row.day_of_week,
            start_time: epoch_anchored(row.start_time),
            end_time: epoch_anchored(row.end_time),
            is_available: row.is_available,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct DeleteCountResponse {
    pub count: usize,
}

pub async fn get_availability(
    State(state): State<AppState>,
    Path(availability_id): Path<Uuid>,
) -> AppResult<Json<AvailabilityResponse>> {
    let mut conn = state.db()?;
    let row: Option<Availability> = availability::table
        .find(availability_id)
        .first(&mut conn)
        .optional()?;
    row.map(|row| Json(row.into()))
        .ok_or_else(|| AppError::not_found("Availability not found"))
}

pub async fn get_availability_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Vec<AvailabilityResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<Availability> = availability::table
        .filter(availability::user_id.eq(user_id))
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

pub async fn get_availability_by_day(
    State(state): State<AppState>,
    Path((user_id, day_of_week)): Path<(Uuid, i32)>,
) -> AppResult<Json<Vec<AvailabilityResponse>>> {
    validate_day_of_week(day_of_week)?;

    let mut conn = state.db()?;
    let rows: Vec<Availability> = availability::table
        .filter(availability::user_id.eq(user_id))
        .filter(availability::day_of_week.eq(day_of_week))
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

pub async fn create_availability(
    State(state): State<AppState>,
    Json(payload): Json<CreateAvailabilityRequest>,
) -> AppResult<(StatusCode, Json<AvailabilityResponse>)> {
    let new_row = validate_item(payload)?;

    let mut conn = state.db()?;
    diesel::insert_into(availability::table)
        .values(&new_row)
        .execute(&mut conn)?;
    let row: Availability = availability::table.find(new_row.id).first(&mut conn)?;

    Ok((StatusCode::CREATED, Json(row.into())))
}

pub async fn bulk_create_availability(
    State(state): State<AppState>,
    Json(payload): Json<BulkCreateRequest>,
) -> AppResult<(StatusCode, Json<Vec<AvailabilityResponse>>)> {
    let items = match payload.items {
        Some(items) if !items.is_empty() => items,
        _ => return Err(AppError::bad_request("Items array is required")),
    };

    // Validate every item before touching the database so one bad entry
    // creates nothing.
    let new_rows = items
        .into_iter()
        .map(validate_item)
        .collect::<Result<Vec<_>, _>>()?;

    let mut conn = state.db()?;
    let created = conn.transaction::<Vec<Availability>, diesel::result::Error, _>(|conn| {
        let mut created = Vec::with_capacity(new_rows.len());
        for new_row in &new_rows {
            diesel::insert_into(availability::table)
                .values(new_row)
                .execute(conn)?;
            created.push(availability::table.find(new_row.id).first(conn)?);
        }
        Ok(created)
    })?;

    Ok((
        StatusCode::CREATED,
        Json(created.into_iter().map(Into::into).collect()),
    ))
}

pub async fn update_availability(
    State(state): State<AppState>,
    Path(availability_id): Path<Uuid>,
    Json(payload): Json<UpdateAvailabilityRequest>,
) -> AppResult<Json<AvailabilityResponse>> {
    if let Some(day_of_week) = payload.day_of_week {
        validate_day_of_week(day_of_week)?;
    }
    let start_time = payload
        .start_time
        .as_deref()
        .map(parse_time_of_day)
        .transpose()?;
    let end_time = payload
        .end_time
        .as_deref()
        .map(parse_time_of_day)
        .transpose()?;

    let mut conn = state.db()?;

    // Mutations on missing rows surface as a generic failure, unlike
    // direct lookups.
    let existing: Option<Availability> = availability::table
        .find(availability_id)
        .first(&mut conn)
        .optional()?;
    existing.ok_or_else(|| AppError::internal("Availability not found"))?;

    let changeset = UpdateAvailabilityChangeset {
        day_of_week: payload.day_of_week,
        start_time,
        end_time,
        is_available: payload.is_available,
        updated_at: Utc::now(),
    };
    diesel::update(availability::table.find(availability_id))
        .set(&changeset)
        .execute(&mut conn)?;

    let updated: Availability = availability::table.find(availability_id).first(&mut conn)?;
    Ok(Json(updated.into()))
}

pub async fn delete_availability(
    State(state): State<AppState>,
    Path(availability_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let deleted = diesel::delete(availability::table.find(availability_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::internal("Availability not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_availability_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<DeleteCountResponse>> {
    let mut conn = state.db()?;
    let count = diesel::delete(availability::table.filter(availability::user_id.eq(user_id)))
        .execute(&mut conn)?;
    Ok(Json(DeleteCountResponse { count }))
}

fn validate_item(item: CreateAvailabilityRequest) -> Result<NewAvailability, AppError> {
    let (Some(user_id), Some(day_of_week), Some(start_time), Some(end_time)) = (
        item.user_id,
        item.day_of_week,
        item.start_time,
        item.end_time,
    ) else {
        return Err(AppError::bad_request(
            "User ID, day of week, start time, and end time are required",
        ));
    };
    let user_id = Uuid::parse_str(&user_id)
        .map_err(|_| AppError::bad_request("User ID must be a valid UUID"))?;
    validate_day_of_week(day_of_week)?;

    Ok(NewAvailability {
        id: Uuid::new_v4(),
        user_id,
        day_of_week,
        start_time: parse_time_of_day(&start_time)?,
        end_time: parse_time_of_day(&end_time)?,
        is_available: item.is_available.unwrap_or(true),
    })
}

fn validate_day_of_week(day_of_week: i32) -> Result<(), AppError> {
    if !(0..=6).contains(&day_of_week) {
        return Err(AppError::bad_request(
            "Day of week must be a number between 0 and 6",
        ));
    }
    Ok(())
}

fn parse_time_of_day(raw: &str) -> Result<NaiveTime, AppError> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|_| AppError::bad_request(format!("invalid time of day: {raw}")))
}

fn epoch_anchored(time: NaiveTime) -> String {
    format!("1970-01-01T{time}Z")
}
