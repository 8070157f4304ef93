use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::{
    appointments,
    auth::{manager_validator, AuthUser},
    catalog::{self, NewBlackout, NewMaterial},
    dashboard,
    error::ApiResult,
    identity::{self, RegisterManager, RegisterMechanic},
    invoices,
    models::{Appointment, Invoice, ManagerProfile, MechanicProfile},
    routes::{events::stream_events, record},
    state::{AppState, ServerEvent},
    templates::{render, InvoiceTemplate},
};

#[derive(Deserialize)]
struct AssignForm {
    mechanic_id: String,
}

#[derive(Deserialize)]
struct DateForm {
    date: NaiveDate,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/managers")
            .wrap(HttpAuthentication::with_fn(manager_validator))
            .service(web::resource("/me").route(web::get().to(me)))
            .service(web::resource("/events").route(web::get().to(stream_events)))
            .service(web::resource("/dashboard").route(web::get().to(get_dashboard)))
            .service(web::resource("/activities").route(web::get().to(list_activities)))
            .service(web::resource("/managers").route(web::post().to(register_manager)))
            .service(
                web::resource("/mechanics")
                    .route(web::get().to(list_mechanics))
                    .route(web::post().to(register_mechanic)),
            )
            .service(
                web::resource("/mechanics/{id}/unavailable")
                    .route(web::get().to(mechanic_unavailable))
                    .route(web::post().to(add_unavailable)),
            )
            .service(
                web::resource("/mechanics/{id}/unavailable/{slot}")
                    .route(web::delete().to(remove_unavailable)),
            )
            .service(
                web::resource("/materials")
                    .route(web::get().to(list_materials))
                    .route(web::post().to(create_material)),
            )
            .service(web::resource("/appointments").route(web::get().to(list_appointments)))
            .service(
                web::resource("/appointments/{id}").route(web::delete().to(delete_appointment)),
            )
            .service(web::resource("/appointments/{id}/accept").route(web::post().to(accept)))
            .service(web::resource("/appointments/{id}/reject").route(web::post().to(reject)))
            .service(web::resource("/appointments/{id}/assign").route(web::post().to(assign)))
            .service(web::resource("/appointments/{id}/date").route(web::post().to(change_date)))
            .service(web::resource("/invoices").route(web::get().to(list_invoices)))
            .service(web::resource("/invoices/{id}").route(web::get().to(get_invoice)))
            .service(web::resource("/invoices/{id}/print").route(web::get().to(print_invoice))),
    );
}

async fn me(state: web::Data<AppState>, auth: web::ReqData<AuthUser>) -> ApiResult<HttpResponse> {
    let manager = identity::fetch_manager(&state.db, &auth.id).await?;
    Ok(HttpResponse::Ok().json(ManagerProfile::from(manager)))
}

async fn get_dashboard(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(dashboard::stats(&state.db).await?))
}

async fn list_activities(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(dashboard::recent_activity(&state.db).await?))
}

async fn register_manager(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<RegisterManager>,
) -> ApiResult<HttpResponse> {
    let manager = identity::register_manager(&state.db, body.into_inner()).await?;
    log::info!("Manager {} registered manager {}", auth.id, manager.id);
    Ok(HttpResponse::Created().json(ManagerProfile::from(manager)))
}

async fn register_mechanic(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<RegisterMechanic>,
) -> ApiResult<HttpResponse> {
    let mechanic = identity::register_mechanic(&state.db, body.into_inner()).await?;
    log::info!("Manager {} registered mechanic {}", auth.id, mechanic.id);
    Ok(HttpResponse::Created().json(MechanicProfile::from(mechanic)))
}

async fn list_mechanics(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let mechanics: Vec<MechanicProfile> = identity::list_mechanics(&state.db)
        .await?
        .into_iter()
        .map(MechanicProfile::from)
        .collect();
    Ok(HttpResponse::Ok().json(mechanics))
}

async fn mechanic_unavailable(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let days = catalog::unavailable_days(&state.db, &path, Utc::now().date_naive()).await?;
    Ok(HttpResponse::Ok().json(days))
}

async fn add_unavailable(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<NewBlackout>,
) -> ApiResult<HttpResponse> {
    let slot = catalog::add_blackout(&state.db, &path, body.into_inner()).await?;
    log::info!(
        "Manager {} blocked mechanic {} on {} {}-{}",
        auth.id,
        slot.mechanic_id,
        slot.date,
        slot.start_time,
        slot.end_time
    );
    let days = catalog::unavailable_days(&state.db, &path, Utc::now().date_naive()).await?;
    Ok(HttpResponse::Created().json(days))
}

async fn remove_unavailable(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let (mechanic_id, slot_id) = path.into_inner();
    catalog::remove_blackout(&state.db, &mechanic_id, &slot_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn list_materials(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(catalog::list_materials(&state.db).await?))
}

async fn create_material(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<NewMaterial>,
) -> ApiResult<HttpResponse> {
    let material = catalog::create_material(&state.db, body.into_inner()).await?;
    log::info!("Manager {} added material {}", auth.id, material.name);
    Ok(HttpResponse::Created().json(material))
}

async fn list_appointments(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let appointments: Vec<Appointment> = appointments::list_all(&state.db)
        .await?
        .into_iter()
        .map(Appointment::from)
        .collect();
    Ok(HttpResponse::Ok().json(appointments))
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
        format!(
            "Manager {} {verb} appointment {} for mechanic {}",
            auth.id, row.id, row.mechanic_id
        ),
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

async fn assign(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<AssignForm>,
) -> ApiResult<HttpResponse> {
    let row = appointments::assign_mechanic(&state, &path, &body.mechanic_id, Utc::now()).await?;
    record(
        &state,
        &auth,
        format!(
            "Manager {} assigned appointment {} to mechanic {}",
            auth.id, row.id, row.mechanic_id
        ),
        ServerEvent::from_appointment("appointment_assigned", &row),
    )
    .await;
    Ok(HttpResponse::Ok().json(Appointment::from(row)))
}

async fn change_date(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<DateForm>,
) -> ApiResult<HttpResponse> {
    let row = appointments::change_date(&state, &path, body.date, Utc::now()).await?;
    record(
        &state,
        &auth,
        format!("Manager {} moved appointment {} to {}", auth.id, row.id, row.date),
        ServerEvent::from_appointment("appointment_date_changed", &row),
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
        format!("Manager {} deleted appointment {}", auth.id, row.id),
        ServerEvent::from_appointment("appointment_deleted", &row),
    )
    .await;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "msg": "Appointment deleted successfully" })))
}

async fn list_invoices(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let invoices: Vec<Invoice> = invoices::list_all(&state.db)
        .await?
        .into_iter()
        .map(Invoice::from)
        .collect();
    Ok(HttpResponse::Ok().json(invoices))
}

async fn get_invoice(state: web::Data<AppState>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let invoice = invoices::fetch(&state.db, &path).await?;
    Ok(HttpResponse::Ok().json(Invoice::from(invoice)))
}

async fn print_invoice(state: web::Data<AppState>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let invoice = invoices::fetch(&state.db, &path).await?;
    render(InvoiceTemplate::from(&invoice))
}
