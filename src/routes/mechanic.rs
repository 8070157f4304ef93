use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{
    appointments,
    auth::{mechanic_validator, AuthUser},
    catalog::{self, NewBlackout},
    error::{ApiError, ApiResult},
    identity,
    models::{Appointment, AppointmentRow, MechanicProfile, Repair, Reparation},
    repairs::{self, ReparationInput},
    routes::{events::stream_events, record},
    state::{AppState, ServerEvent},
};

#[derive(Deserialize)]
struct RescheduleForm {
    start_time: DateTime<Utc>,
}

#[derive(Deserialize)]
struct NewRepairForm {
    appointment_id: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/mechanics")
            .wrap(HttpAuthentication::with_fn(mechanic_validator))
            .service(web::resource("/me").route(web::get().to(me)))
            .service(web::resource("/events").route(web::get().to(stream_events)))
            .service(web::resource("/materials").route(web::get().to(list_materials)))
            .service(
                web::resource("/unavailable")
                    .route(web::get().to(list_unavailable))
                    .route(web::post().to(add_unavailable)),
            )
            .service(
                web::resource("/unavailable/{id}").route(web::delete().to(remove_unavailable)),
            )
            .service(web::resource("/appointments/waiting").route(web::get().to(waiting)))
            .service(web::resource("/appointments/upcoming").route(web::get().to(upcoming)))
            .service(web::resource("/appointments/history").route(web::get().to(history)))
            .service(
                web::resource("/appointments/{id}").route(web::delete().to(delete_appointment)),
            )
            .service(web::resource("/appointments/{id}/accept").route(web::post().to(accept)))
            .service(web::resource("/appointments/{id}/reject").route(web::post().to(reject)))
            .service(
                web::resource("/appointments/{id}/reschedule").route(web::post().to(reschedule)),
            )
            .service(
                web::resource("/repairs")
                    .route(web::get().to(ongoing_repairs))
                    .route(web::post().to(create_repair)),
            )
            .service(web::resource("/repairs/{id}").route(web::get().to(get_repair)))
            .service(
                web::resource("/repairs/{id}/reparations").route(web::post().to(add_reparation)),
            )
            .service(
                web::resource("/repairs/{id}/reparations/{item}")
                    .route(web::patch().to(update_reparation)),
            )
            .service(
                web::resource("/repairs/{id}/reparations/{item}/approve")
                    .route(web::post().to(approve_reparation)),
            )
            .service(web::resource("/repairs/{id}/finish").route(web::post().to(finish_repair))),
    );
}

fn appointment_list(rows: Vec<AppointmentRow>) -> HttpResponse {
    let appointments: Vec<Appointment> = rows.into_iter().map(Appointment::from).collect();
    HttpResponse::Ok().json(appointments)
}

async fn me(state: web::Data<AppState>, auth: web::ReqData<AuthUser>) -> ApiResult<HttpResponse> {
    let mechanic = identity::fetch_mechanic(&state.db, &auth.id).await?;
    Ok(HttpResponse::Ok().json(MechanicProfile::from(mechanic)))
}

async fn list_materials(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(catalog::list_materials(&state.db).await?))
}

async fn list_unavailable(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> ApiResult<HttpResponse> {
    let days = catalog::unavailable_days(&state.db, &auth.id, Utc::now().date_naive()).await?;
    Ok(HttpResponse::Ok().json(days))
}

async fn add_unavailable(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<NewBlackout>,
) -> ApiResult<HttpResponse> {
    let slot = catalog::add_blackout(&state.db, &auth.id, body.into_inner()).await?;
    log::info!(
        "Mechanic {} blocked {} {}-{}",
        auth.id,
        slot.date,
        slot.start_time,
        slot.end_time
    );
    let days = catalog::unavailable_days(&state.db, &auth.id, Utc::now().date_naive()).await?;
    Ok(HttpResponse::Created().json(days))
}

async fn remove_unavailable(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    catalog::remove_blackout(&state.db, &auth.id, &path).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn waiting(state: web::Data<AppState>, auth: web::ReqData<AuthUser>) -> ApiResult<HttpResponse> {
    let rows = appointments::waiting_for_mechanic(&state.db, &auth.id, Utc::now()).await?;
    Ok(appointment_list(rows))
}

async fn upcoming(state: web::Data<AppState>, auth: web::ReqData<AuthUser>) -> ApiResult<HttpResponse> {
    let rows = appointments::upcoming_for_mechanic(&state.db, &auth.id, Utc::now()).await?;
    Ok(appointment_list(rows))
}

async fn history(state: web::Data<AppState>, auth: web::ReqData<AuthUser>) -> ApiResult<HttpResponse> {
    let rows = appointments::history_for_mechanic(&state.db, &auth.id, Utc::now()).await?;
    Ok(appointment_list(rows))
}

async fn set_approval(
    state: &AppState,
    auth: &AuthUser,
    appointment_id: &str,
    approved: bool,
) -> ApiResult<HttpResponse> {
    let row = appointments::set_mechanic_approval(&state.db, auth, appointment_id, approved).await?;
    let (kind, verb) = if approved {
        ("appointment_accepted", "accepted")
    } else {
        ("appointment_rejected", "rejected")
    };
    record(
        state,
        auth,
        format!("Mechanic {} {verb} appointment {}", auth.id, row.id),
        ServerEvent::from_appointment(kind, &row),
    )
    .await;
    Ok(HttpResponse::Ok().json(Appointment::from(row)))
}

async fn accept(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    set_approval(&state, &auth, &path, true).await
}

async fn reject(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    set_approval(&state, &auth, &path, false).await
}

async fn reschedule(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<RescheduleForm>,
) -> ApiResult<HttpResponse> {
    let row = appointments::reschedule(&state, &auth, &path, body.start_time, Utc::now()).await?;
    record(
        &state,
        &auth,
        format!(
            "Mechanic {} moved appointment {} to {}",
            auth.id, row.id, row.start_time
        ),
        ServerEvent::from_appointment("appointment_rescheduled", &row),
    )
    .await;
    Ok(HttpResponse::Ok().json(Appointment::from(row)))
}

async fn delete_appointment(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let row = appointments::delete(&state.db, &auth, &path).await?;
    record(
        &state,
        &auth,
        format!("Mechanic {} deleted appointment {}", auth.id, row.id),
        ServerEvent::from_appointment("appointment_deleted", &row),
    )
    .await;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "msg": "Appointment deleted successfully" })))
}

async fn ongoing_repairs(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> ApiResult<HttpResponse> {
    let repairs = repairs::ongoing_for_mechanic(&state.db, &auth.id).await?;
    Ok(HttpResponse::Ok().json(repairs))
}

async fn get_repair(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let repair = repairs::load(&state.db, &path).await?;
    if repair.mechanic.id != auth.id {
        return Err(ApiError::forbidden("Repair is not assigned to you"));
    }
    Ok(HttpResponse::Ok().json(repair))
}

async fn create_repair(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<NewRepairForm>,
) -> ApiResult<HttpResponse> {
    let row = repairs::create_repair(&state.db, &auth, body.appointment_id.trim(), Utc::now()).await?;
    record(
        &state,
        &auth,
        format!(
            "Mechanic {} opened repair {} for appointment {}",
            auth.id, row.id, row.appointment_id
        ),
        ServerEvent::from_repair("repair_created", &row),
    )
    .await;
    Ok(HttpResponse::Created().json(Repair::from_parts(row, Vec::new())))
}

async fn reparation_changed(
    state: &AppState,
    auth: &AuthUser,
    repair_id: &str,
    kind: &str,
    item: Reparation,
) -> ApiResult<HttpResponse> {
    let repair = repairs::fetch(&state.db, repair_id).await?;
    record(
        state,
        auth,
        format!(
            "Mechanic {} {} reparation {} of repair {repair_id} at {:.2}",
            auth.id,
            kind.trim_start_matches("reparation_"),
            item.id,
            item.price
        ),
        ServerEvent::from_repair(kind, &repair),
    )
    .await;
    Ok(HttpResponse::Ok().json(item))
}

async fn add_reparation(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<ReparationInput>,
) -> ApiResult<HttpResponse> {
    let item = repairs::add_reparation(&state.db, &auth, &path, body.into_inner(), Utc::now()).await?;
    reparation_changed(&state, &auth, &path, "reparation_added", item.into()).await
}

async fn update_reparation(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<(String, String)>,
    body: web::Json<ReparationInput>,
) -> ApiResult<HttpResponse> {
    let (repair_id, item_id) = path.into_inner();
    let item = repairs::update_reparation(
        &state.db,
        &auth,
        &repair_id,
        &item_id,
        body.into_inner(),
        Utc::now(),
    )
    .await?;
    reparation_changed(&state, &auth, &repair_id, "reparation_updated", item.into()).await
}

async fn approve_reparation(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let (repair_id, item_id) = path.into_inner();
    let item = repairs::approve_reparation(&state.db, &auth, &repair_id, &item_id).await?;
    reparation_changed(&state, &auth, &repair_id, "reparation_approved", item.into()).await
}

async fn finish_repair(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let row = repairs::finish_repair(&state.db, &auth, &path).await?;
    record(
        &state,
        &auth,
        format!("Mechanic {} finished repair {}", auth.id, row.id),
        ServerEvent::from_repair("repair_finished", &row),
    )
    .await;
    let repair = repairs::load(&state.db, &row.id).await?;
    Ok(HttpResponse::Ok().json(repair))
}
