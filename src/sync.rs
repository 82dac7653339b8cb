//! Best-effort mirroring of local appointments into the remote calendar.
//!
//! The local row is authoritative. Every remote failure is logged and
//! reported as a [`SyncOutcome`], never surfaced to the HTTP caller, and
//! nothing retries or reconciles a drifted mirror later.

use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use crate::calendar::{CalendarCredentials, EventPayload, TokenRotation};
use crate::models::{Appointment, User};
use crate::schema::{appointments, users};
use crate::state::AppState;

/// What happened to the remote mirror for one local mutation.
#[derive(Debug)]
pub enum SyncOutcome {
    /// The remote calendar reflects the local row.
    Synced,
    /// Mirroring was not applicable (no connection, no mirrored event).
    Skipped(&'static str),
    /// The attempt failed; the local row stands and the mirror has drifted.
    Failed(String),
}

/// A locally persisted appointment plus the result of its mirror attempt.
#[derive(Debug)]
pub struct MirroredAppointment {
    pub appointment: Appointment,
    pub outcome: SyncOutcome,
}

/// Mirror a freshly created appointment and stamp the remote event id onto
/// the local row. On any failure the original row is returned unmodified.
pub async fn mirror_create(state: &AppState, appointment: Appointment) -> MirroredAppointment {
    let outcome = try_mirror_create(state, &appointment).await;

    match outcome {
        Ok(Some(refreshed)) => MirroredAppointment {
            appointment: refreshed,
            outcome: SyncOutcome::Synced,
        },
        Ok(None) => MirroredAppointment {
            appointment,
            outcome: SyncOutcome::Skipped("calendar not connected"),
        },
        Err(err) => {
            tracing::warn!(
                appointment_id = %appointment.id,
                error = %err,
                "failed to mirror appointment into Google Calendar"
            );
            MirroredAppointment {
                appointment,
                outcome: SyncOutcome::Failed(err.to_string()),
            }
        }
    }
}

async fn try_mirror_create(
    state: &AppState,
    appointment: &Appointment,
) -> anyhow::Result<Option<Appointment>> {
    let mut conn = state
        .db()
        .map_err(|_| anyhow::anyhow!("database unavailable"))?;

    let Some(user) = connected_owner(&mut conn, appointment.user_id)? else {
        return Ok(None);
    };

    let creds = CalendarCredentials::for_user(&user)?;
    let response = state
        .calendar
        .create_event(&creds, &event_payload(appointment))
        .await?;
    apply_token_rotation(&mut conn, user.id, &response.rotation)?;

    diesel::update(appointments::table.find(appointment.id))
        .set(appointments::google_event_id.eq(&response.value))
        .execute(&mut conn)?;
    let refreshed: Appointment = appointments::table.find(appointment.id).first(&mut conn)?;
    Ok(Some(refreshed))
}

/// Push the updated field values to an already-mirrored event.
pub async fn mirror_update(state: &AppState, appointment: &Appointment) -> SyncOutcome {
    let Some(event_id) = appointment.google_event_id.clone() else {
        return SyncOutcome::Skipped("appointment has no mirrored event");
    };

    let result = async {
        let mut conn = state
            .db()
            .map_err(|_| anyhow::anyhow!("database unavailable"))?;
        let Some(user) = connected_owner(&mut conn, appointment.user_id)? else {
            return Ok(false);
        };
        let creds = CalendarCredentials::for_user(&user)?;
        let response = state
            .calendar
            .update_event(&creds, &event_id, &event_payload(appointment))
            .await?;
        apply_token_rotation(&mut conn, user.id, &response.rotation)?;
        Ok::<_, anyhow::Error>(true)
    }
    .await;

    match result {
        Ok(true) => SyncOutcome::Synced,
        Ok(false) => SyncOutcome::Skipped("calendar not connected"),
        Err(err) => {
            tracing::warn!(
                appointment_id = %appointment.id,
                error = %err,
                "failed to update mirrored Google Calendar event"
            );
            SyncOutcome::Failed(err.to_string())
        }
    }
}

/// Remove the mirrored event ahead of a local delete. The local delete goes
/// ahead regardless of what happens here.
pub async fn mirror_delete(state: &AppState, appointment: &Appointment) -> SyncOutcome {
    let Some(event_id) = appointment.google_event_id.clone() else {
        return SyncOutcome::Skipped("appointment has no mirrored event");
    };

    let result = async {
        let mut conn = state
            .db()
            .map_err(|_| anyhow::anyhow!("database unavailable"))?;
        let Some(user) = connected_owner(&mut conn, appointment.user_id)? else {
            return Ok(false);
        };
        let creds = CalendarCredentials::for_user(&user)?;
        let response = state.calendar.delete_event(&creds, &event_id).await?;
        apply_token_rotation(&mut conn, user.id, &response.rotation)?;
        Ok::<_, anyhow::Error>(true)
    }
    .await;

    match result {
        Ok(true) => SyncOutcome::Synced,
        Ok(false) => SyncOutcome::Skipped("calendar not connected"),
        Err(err) => {
            tracing::warn!(
                appointment_id = %appointment.id,
                error = %err,
                "failed to delete mirrored Google Calendar event"
            );
            SyncOutcome::Failed(err.to_string())
        }
    }
}

/// Persist rotated token fields, each independently. A partial rotation
/// (say, only a fresh access token) still gets written.
pub fn apply_token_rotation(
    conn: &mut PgConnection,
    user_id: Uuid,
    rotation: &TokenRotation,
) -> QueryResult<()> {
    if rotation.is_empty() {
        return Ok(());
    }

    if let Some(access_token) = &rotation.access_token {
        diesel::update(users::table.find(user_id))
            .set(users::google_access_token.eq(access_token))
            .execute(conn)?;
    }
    if let Some(refresh_token) = &rotation.refresh_token {
        diesel::update(users::table.find(user_id))
            .set(users::google_refresh_token.eq(refresh_token))
            .execute(conn)?;
    }
    if let Some(expiry) = rotation.expiry {
        diesel::update(users::table.find(user_id))
            .set(users::google_token_expiry.eq(expiry))
            .execute(conn)?;
    }
    Ok(())
}

fn connected_owner(conn: &mut PgConnection, user_id: Uuid) -> QueryResult<Option<User>> {
    let user: Option<User> = users::table.find(user_id).first(conn).optional()?;
    Ok(user.filter(|user| user.is_calendar_connected))
}

fn event_payload(appointment: &Appointment) -> EventPayload {
    EventPayload {
        title: appointment.title.clone(),
        description: appointment.description.clone().unwrap_or_default(),
        start_time: appointment.start_time,
        end_time: appointment.end_time,
        location: appointment.location.clone(),
    }
}
