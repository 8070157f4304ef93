use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use chrono::Utc;
use serde::Deserialize;

use crate::{
    appointments::{self, AppointmentRequest},
    auth::{customer_validator, AuthUser},
    catalog::{self, NewCar},
    error::ApiResult,
    identity,
    invoices,
    models::{Appointment, Invoice, MechanicProfile, Reparation, UserProfile},
    repairs,
    routes::{events::stream_events, record},
    state::{AppState, ServerEvent},
    templates::{render, InvoiceTemplate},
};

#[derive(Deserialize)]
struct RepriceForm {
    price: f64,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/users")
            .wrap(HttpAuthentication::with_fn(customer_validator))
            .service(web::resource("/me").route(web::get().to(me)))
            .service(web::resource("/events").route(web::get().to(stream_events)))
            .service(
                web::resource("/cars")
                    .route(web::get().to(list_cars))
                    .route(web::post().to(add_car)),
            )
            .service(web::resource("/mechanics").route(web::get().to(list_mechanics)))
            .service(
                web::resource("/mechanics/{id}/unavailable")
                    .route(web::get().to(mechanic_unavailable)),
            )
            .service(
                web::resource("/appointments")
                    .route(web::get().to(list_appointments))
                    .route(web::post().to(request_appointment)),
            )
            .service(
                web::resource("/appointments/{id}").route(web::delete().to(delete_appointment)),
            )
            .service(
                web::resource("/appointments/{id}/confirm").route(web::post().to(confirm_appointment)),
            )
            .service(
                web::resource("/appointments/{id}/withdraw")
                    .route(web::post().to(withdraw_appointment)),
            )
            .service(web::resource("/repairs").route(web::get().to(list_repairs)))
            .service(
                web::resource("/repairs/{id}/reparations/{item}/accept")
                    .route(web::post().to(accept_reparation)),
            )
            .service(
                web::resource("/repairs/{id}/reparations/{item}/reject")
                    .route(web::post().to(reject_reparation)),
            )
            .service(
                web::resource("/repairs/{id}/reparations/{item}/reprice")
                    .route(web::post().to(reprice_reparation)),
            )
            .service(web::resource("/repairs/{id}/finalize").route(web::post().to(finalize)))
            .service(web::resource("/invoices").route(web::get().to(list_invoices)))
            .service(web::resource("/invoices/{id}").route(web::get().to(get_invoice)))
            .service(web::resource("/invoices/{id}/print").route(web::get().to(print_invoice))),
    );
}

async fn me(state: web::Data<AppState>, auth: web::ReqData<AuthUser>) -> ApiResult<HttpResponse> {
    let user = identity::fetch_user(&state.db, &auth.id).await?;
    Ok(HttpResponse::Ok().json(UserProfile::from(user)))
}

async fn list_cars(state: web::Data<AppState>, auth: web::ReqData<AuthUser>) -> ApiResult<HttpResponse> {
    let cars = catalog::list_cars(&state.db, &auth.id).await?;
    Ok(HttpResponse::Ok().json(cars))
}

async fn add_car(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<NewCar>,
) -> ApiResult<HttpResponse> {
    let car = catalog::add_car(&state.db, &auth.id, body.into_inner()).await?;
    log::info!("Customer {} added car {}", auth.id, car.id);
    Ok(HttpResponse::Created().json(car))
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
    let today = Utc::now().date_naive();
    let days = catalog::unavailable_days(&state.db, &path, today).await?;
    Ok(HttpResponse::Ok().json(days))
}

async fn list_appointments(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> ApiResult<HttpResponse> {
    let rows = appointments::upcoming_for_customer(&state.db, &auth.id, Utc::now()).await?;
    let appointments: Vec<Appointment> = rows.into_iter().map(Appointment::from).collect();
    Ok(HttpResponse::Ok().json(appointments))
}

async fn request_appointment(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<AppointmentRequest>,
) -> ApiResult<HttpResponse> {
    let row = appointments::create(&state, &auth.id, body.into_inner(), Utc::now()).await?;
    record(
        &state,
        &auth,
        format!(
            "Customer {} requested appointment {} with mechanic {}",
            auth.id, row.id, row.mechanic_id
        ),
        ServerEvent::from_appointment("appointment_requested", &row),
    )
    .await;
    Ok(HttpResponse::Created().json(Appointment::from(row)))
}

async fn set_approval(
    state: &AppState,
    auth: &AuthUser,
    appointment_id: &str,
    approved: bool,
) -> ApiResult<HttpResponse> {
    let row = appointments::set_customer_approval(&state.db, auth, appointment_id, approved).await?;
    let kind = if approved {
        "appointment_confirmed"
    } else {
        "appointment_withdrawn"
    };
    record(
        state,
        auth,
        format!("Customer {} set approval of {} to {approved}", auth.id, row.id),
        ServerEvent::from_appointment(kind, &row),
    )
    .await;
    Ok(HttpResponse::Ok().json(Appointment::from(row)))
}

async fn confirm_appointment(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    set_approval(&state, &auth, &path, true).await
}

async fn withdraw_appointment(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    set_approval(&state, &auth, &path, false).await
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
        format!("Customer {} deleted appointment {}", auth.id, row.id),
        ServerEvent::from_appointment("appointment_deleted", &row),
    )
    .await;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "msg": "Appointment deleted successfully" })))
}

async fn list_repairs(state: web::Data<AppState>, auth: web::ReqData<AuthUser>) -> ApiResult<HttpResponse> {
    let repairs = repairs::for_customer(&state.db, &auth.id).await?;
    Ok(HttpResponse::Ok().json(repairs))
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
            "Customer {} {} reparation {} of repair {repair_id}",
            auth.id,
            kind.trim_start_matches("reparation_"),
            item.id
        ),
        ServerEvent::from_repair(kind, &repair),
    )
    .await;
    Ok(HttpResponse::Ok().json(item))
}

async fn accept_reparation(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let (repair_id, item_id) = path.into_inner();
    let item = repairs::accept_reparation(&state.db, &auth, &repair_id, &item_id).await?;
    reparation_changed(&state, &auth, &repair_id, "reparation_accepted", item.into()).await
}

async fn reject_reparation(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let (repair_id, item_id) = path.into_inner();
    let item = repairs::reject_reparation(&state.db, &auth, &repair_id, &item_id).await?;
    reparation_changed(&state, &auth, &repair_id, "reparation_rejected", item.into()).await
}

async fn reprice_reparation(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<(String, String)>,
    body: web::Json<RepriceForm>,
) -> ApiResult<HttpResponse> {
    let (repair_id, item_id) = path.into_inner();
    let item = repairs::reprice_reparation(&state.db, &auth, &repair_id, &item_id, body.price).await?;
    reparation_changed(&state, &auth, &repair_id, "reparation_repriced", item.into()).await
}

async fn finalize(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let invoice = invoices::finalize(&state.db, &auth, &path, Utc::now()).await?;
    record(
        &state,
        &auth,
        format!(
            "Customer {} finalized repair {} as invoice {}",
            auth.id, invoice.repair_id, invoice.id
        ),
        ServerEvent::from_invoice("invoice_issued", &invoice),
    )
    .await;
    Ok(HttpResponse::Created().json(Invoice::from(invoice)))
}

async fn list_invoices(state: web::Data<AppState>, auth: web::ReqData<AuthUser>) -> ApiResult<HttpResponse> {
    let rows = invoices::for_customer(&state.db, &auth.id).await?;
    let invoices: Vec<Invoice> = rows.into_iter().map(Invoice::from).collect();
    Ok(HttpResponse::Ok().json(invoices))
}

async fn get_invoice(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let invoice = invoices::fetch_for_customer(&state.db, &auth.id, &path).await?;
    Ok(HttpResponse::Ok().json(Invoice::from(invoice)))
}

async fn print_invoice(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let invoice = invoices::fetch_for_customer(&state.db, &auth.id, &path).await?;
    render(InvoiceTemplate::from(&invoice))
}
