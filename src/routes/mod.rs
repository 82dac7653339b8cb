use axum::http::HeaderValue;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::state::AppState;

pub mod appointments;
pub mod availability;
pub mod health;
pub mod users;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let users_routes = Router::new()
        .route("/", post(users::create_user))
        .route("/google/auth-url", get(users::google_auth_url))
        .route("/email/:email", get(users::get_user_by_email))
        .route(
            "/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route("/:id/google/connect", post(users::connect_google_calendar));

    let appointments_routes = Router::new()
        .route("/", post(appointments::create_appointment))
        .route(
            "/:id",
            get(appointments::get_appointment)
                .put(appointments::update_appointment)
                .delete(appointments::delete_appointment),
        )
        .route("/user/:user_id", get(appointments::get_appointments_by_user))
        .route(
            "/user/:user_id/range",
            get(appointments::get_appointments_by_date_range),
        )
        .route(
            "/user/:user_id/google-events",
            get(appointments::get_google_events),
        )
        .route(
            "/user/:user_id/check-availability",
            get(appointments::check_availability),
        );

    let availability_routes = Router::new()
        .route("/", post(availability::create_availability))
        .route("/bulk", post(availability::bulk_create_availability))
        .route(
            "/:id",
            get(availability::get_availability)
                .put(availability::update_availability)
                .delete(availability::delete_availability),
        )
        .route(
            "/user/:user_id",
            get(availability::get_availability_by_user)
                .delete(availability::delete_availability_by_user),
        )
        .route(
            "/user/:user_id/day/:day_of_week",
            get(availability::get_availability_by_day),
        );

    Router::new()
        .nest("/api/users", users_routes)
        .nest("/api/appointments", appointments_routes)
        .nest("/api/availability", availability_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
}
