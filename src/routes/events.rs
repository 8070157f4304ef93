use actix_web::{http::header, web, HttpResponse};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::{
    auth::AuthUser,
    models::Role,
    state::{AppState, ServerEvent},
};

/// Whether `viewer` may see `event`: parties see their own records, managers see all.
pub fn visible_to(viewer: &AuthUser, event: &ServerEvent) -> bool {
    match viewer.role {
        Role::Customer => event.customer_id == viewer.id,
        Role::Mechanic => event.mechanic_id == viewer.id,
        Role::Manager => true,
    }
}

/// `GET <scope>/events`, mounted inside each authenticated scope.
pub async fn stream_events(state: web::Data<AppState>, auth: web::ReqData<AuthUser>) -> HttpResponse {
    let viewer = auth.into_inner();
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if visible_to(&viewer, &event) => {
            Some(Ok::<web::Bytes, actix_web::Error>(event_to_bytes(&event)))
        }
        Ok(_) => None,
        Err(err) => {
            log::debug!("Event stream for {} skipped: {err}", viewer.id);
            None
        }
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}

fn event_to_bytes(event: &ServerEvent) -> web::Bytes {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    web::Bytes::from(format!("event: {}\ndata: {}\n\n", event.kind, payload))
}
