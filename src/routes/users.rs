use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{CalendarConnection, NewUser, User};
use crate::schema::users;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct ConnectCalendarRequest {
    pub code: Option<String>,
}

#[derive(Serialize)]
pub struct AuthUrlResponse {
    #[serde(rename = "authUrl")]
    pub auth_url: String,
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<User>> {
    let mut conn = state.db()?;
    let user: Option<User> = users::table.find(user_id).first(&mut conn).optional()?;
    user.map(Json).ok_or_else(|| AppError::not_found("User not found"))
}

pub async fn get_user_by_email(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> AppResult<Json<User>> {
    let mut conn = state.db()?;
    let user: Option<User> = users::table
        .filter(users::email.eq(&email))
        .first(&mut conn)
        .optional()?;
    user.map(Json).ok_or_else(|| AppError::not_found("User not found"))
}

pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    let (Some(email), Some(name)) = (payload.email, payload.name) else {
        return Err(AppError::bad_request("Email and name are required"));
    };

    let mut conn = state.db()?;

    let existing: Option<User> = users::table
        .filter(users::email.eq(&email))
        .first(&mut conn)
        .optional()?;
    if existing.is_some() {
        return Err(AppError::conflict("User with this email already exists"));
    }

    let new_user = NewUser {
        id: Uuid::new_v4(),
        email,
        name,
    };
    diesel::insert_into(users::table)
        .values(&new_user)
        .execute(&mut conn)?;

    let user: User = users::table.find(new_user.id).first(&mut conn)?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<User>> {
    let mut conn = state.db()?;

    // Missing rows surface as a generic failure here, matching the
    // lookup/update split the API has always had.
    let existing: Option<User> = users::table.find(user_id).first(&mut conn).optional()?;
    let existing = existing.ok_or_else(|| AppError::internal("User not found"))?;

    if let Some(name) = payload.name {
        diesel::update(users::table.find(user_id))
            .set((users::name.eq(name), users::updated_at.eq(Utc::now())))
            .execute(&mut conn)?;
        let user: User = users::table.find(user_id).first(&mut conn)?;
        return Ok(Json(user));
    }

    Ok(Json(existing))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;

    // Appointments and availability rows go with the user (FK cascade).
    let deleted = diesel::delete(users::table.find(user_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::internal("User not found"));
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn google_auth_url(State(state): State<AppState>) -> AppResult<Json<AuthUrlResponse>> {
    Ok(Json(AuthUrlResponse {
        auth_url: state.calendar.auth_url(),
    }))
}

pub async fn connect_google_calendar(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<ConnectCalendarRequest>,
) -> AppResult<Json<User>> {
    let Some(code) = payload.code else {
        return Err(AppError::bad_request("Authorization code is required"));
    };

    let tokens = state.calendar.exchange_code(&code).await?;
    let (Some(access_token), Some(refresh_token)) = (tokens.access_token, tokens.refresh_token)
    else {
        return Err(AppError::bad_request("Invalid authorization code"));
    };

    let mut conn = state.db()?;
    let connection = CalendarConnection {
        google_calendar_id: "primary".to_string(),
        google_refresh_token: refresh_token,
        google_access_token: access_token,
        google_token_expiry: tokens.expiry,
        is_calendar_connected: true,
        updated_at: Utc::now(),
    };
    let updated = diesel::update(users::table.find(user_id))
        .set(&connection)
        .execute(&mut conn)?;
    if updated == 0 {
        return Err(AppError::internal("User not found"));
    }

    let user: User = users::table.find(user_id).first(&mut conn)?;
    Ok(Json(user))
}
