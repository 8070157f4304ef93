use actix_web::web;

use crate::{
    auth::AuthUser,
    db::log_activity,
    error::ApiError,
    state::{AppState, ServerEvent},
};

pub mod customer;
pub mod events;
pub mod manager;
pub mod mechanic;
pub mod public;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(path_config())
        .configure(public::configure)
        .configure(customer::configure)
        .configure(mechanic::configure)
        .configure(manager::configure);
}

/// Malformed bodies are reported like any other validation failure.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| ApiError::validation(format!("Invalid request body: {err}")).into())
}

fn path_config() -> web::PathConfig {
    web::PathConfig::default()
        .error_handler(|err, _req| ApiError::validation(format!("Invalid path: {err}")).into())
}

/// Journals a lifecycle change and pushes it to live subscribers.
pub(crate) async fn record(state: &AppState, actor: &AuthUser, message: String, event: ServerEvent) {
    log_activity(
        &state.db,
        &event.kind,
        &message,
        Some(&actor.id),
        event.appointment_id.as_deref(),
    )
    .await;
    log::info!("{message}");
    state.publish(event);
}
