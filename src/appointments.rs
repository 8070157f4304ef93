//! Appointment lifecycle.
//!
//! A request starts as `{user: true, mechanic: false}`. The mechanic (or a
//! manager on their behalf) flips the mechanic flag, the customer flips the
//! user flag. Nothing terminal is stored; callers read the flags and the end
//! time.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use sqlx::{types::Json, SqlitePool};

use crate::{
    auth::AuthUser,
    catalog,
    identity,
    db::{next_id, Sequence},
    error::{ApiError, ApiResult},
    models::{AppointmentRow, Problem, Role, RESCHEDULE_DURATION_MINUTES},
    scheduling::{at_wall_clock, check_availability, SlotRequest},
    state::AppState,
};

const APPOINTMENT_COLUMNS: &str = "id, customer_id, customer, car, mechanic_id, mechanic, date, \
     start_time, end_time, location, problems, mechanic_approved, user_approved, created_at";

/// How many past appointments the mechanic history returns.
const HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentRequest {
    pub car_id: Option<String>,
    pub mechanic_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub localisation: Option<String>,
    #[serde(default)]
    pub problem: Vec<Problem>,
}

fn required(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub async fn fetch(pool: &SqlitePool, appointment_id: &str) -> ApiResult<AppointmentRow> {
    let query = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?");
    sqlx::query_as::<_, AppointmentRow>(&query)
        .bind(appointment_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::NotFound("Appointment"))
}

fn ensure_party(row: &AppointmentRow, actor: &AuthUser) -> ApiResult<()> {
    let allowed = match actor.role {
        Role::Customer => row.customer_id == actor.id,
        Role::Mechanic => row.mechanic_id == actor.id,
        Role::Manager => true,
    };
    if allowed {
        Ok(())
    } else {
        Err(ApiError::forbidden("Appointment is not assigned to you"))
    }
}

pub async fn create(
    state: &AppState,
    customer_id: &str,
    request: AppointmentRequest,
    now: DateTime<Utc>,
) -> ApiResult<AppointmentRow> {
    let mut errors = Vec::new();
    let car_id = required(&request.car_id);
    let mechanic_id = required(&request.mechanic_id);
    let location = required(&request.localisation);
    if car_id.is_none() {
        errors.push("Vehicle is required.");
    }
    if mechanic_id.is_none() {
        errors.push("Mechanic is required.");
    }
    if request.date.is_none() {
        errors.push("Date is required.");
    }
    if request.start_time.is_none() || request.end_time.is_none() {
        errors.push("Start and end time are required.");
    }
    if location.is_none() {
        errors.push("Location is required.");
    }
    if request.problem.is_empty() {
        errors.push("At least one problem must be described.");
    } else if request
        .problem
        .iter()
        .any(|problem| problem.description.trim().is_empty())
    {
        errors.push("Every problem needs a description.");
    }

    let (Some(car_id), Some(mechanic_id), Some(date), Some(start), Some(end), Some(location)) = (
        car_id,
        mechanic_id,
        request.date,
        request.start_time,
        request.end_time,
        location,
    ) else {
        return Err(ApiError::validation(errors.join(" ")));
    };
    if !errors.is_empty() {
        return Err(ApiError::validation(errors.join(" ")));
    }

    let pool = &state.db;
    let customer = identity::fetch_user(pool, customer_id).await?;
    let mechanic = identity::fetch_mechanic(pool, mechanic_id).await?;
    let car = catalog::fetch_car(pool, car_id).await?;
    if car.owner_id != customer.id {
        return Err(ApiError::forbidden("Vehicle does not belong to this customer"));
    }

    let _guard = state.slot_locks.acquire(&mechanic.id, &customer.id).await;
    check_availability(
        pool,
        &SlotRequest {
            mechanic_id: &mechanic.id,
            customer_id: &customer.id,
            date,
            start,
            end,
            exclude_appointment_id: None,
        },
        now,
    )
    .await?;

    let appointment_id = next_id(pool, Sequence::Appointment).await?;
    sqlx::query(
        r#"INSERT INTO appointments
           (id, customer_id, customer, car, mechanic_id, mechanic, date, start_time, end_time,
            location, problems, mechanic_approved, user_approved, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 1, ?)"#,
    )
    .bind(&appointment_id)
    .bind(&customer.id)
    .bind(Json(customer.snapshot()))
    .bind(Json(car.snapshot()))
    .bind(&mechanic.id)
    .bind(Json(mechanic.snapshot()))
    .bind(date)
    .bind(start)
    .bind(end)
    .bind(location)
    .bind(Json(&request.problem))
    .bind(now)
    .execute(pool)
    .await?;

    fetch(pool, &appointment_id).await
}

/// Mechanic accept/reject. A manager overrides the same flag on the mechanic's behalf.
pub async fn set_mechanic_approval(
    pool: &SqlitePool,
    actor: &AuthUser,
    appointment_id: &str,
    approved: bool,
) -> ApiResult<AppointmentRow> {
    let row = fetch(pool, appointment_id).await?;
    if actor.role == Role::Customer {
        return Err(ApiError::forbidden("Only the mechanic or a manager can do this"));
    }
    ensure_party(&row, actor)?;

    sqlx::query("UPDATE appointments SET mechanic_approved = ? WHERE id = ?")
        .bind(approved)
        .bind(appointment_id)
        .execute(pool)
        .await?;
    fetch(pool, appointment_id).await
}

/// Customer confirms (or withdraws) their side, e.g. after a mechanic reschedule.
pub async fn set_customer_approval(
    pool: &SqlitePool,
    actor: &AuthUser,
    appointment_id: &str,
    approved: bool,
) -> ApiResult<AppointmentRow> {
    let row = fetch(pool, appointment_id).await?;
    if actor.role != Role::Customer {
        return Err(ApiError::forbidden("Only the customer can do this"));
    }
    ensure_party(&row, actor)?;

    sqlx::query("UPDATE appointments SET user_approved = ? WHERE id = ?")
        .bind(approved)
        .bind(appointment_id)
        .execute(pool)
        .await?;
    fetch(pool, appointment_id).await
}

/// Moves the appointment to `new_start` for one hour; the customer must re-confirm.
pub async fn reschedule(
    state: &AppState,
    actor: &AuthUser,
    appointment_id: &str,
    new_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ApiResult<AppointmentRow> {
    let pool = &state.db;
    let row = fetch(pool, appointment_id).await?;
    if actor.role != Role::Mechanic {
        return Err(ApiError::forbidden("Only the mechanic can reschedule"));
    }
    ensure_party(&row, actor)?;

    let new_end = new_start + Duration::minutes(RESCHEDULE_DURATION_MINUTES);
    let date = new_start.date_naive();

    let _guard = state.slot_locks.acquire(&row.mechanic_id, &row.customer_id).await;
    check_availability(
        pool,
        &SlotRequest {
            mechanic_id: &row.mechanic_id,
            customer_id: &row.customer_id,
            date,
            start: new_start,
            end: new_end,
            exclude_appointment_id: Some(appointment_id),
        },
        now,
    )
    .await?;

    sqlx::query(
        r#"UPDATE appointments
           SET date = ?, start_time = ?, end_time = ?, mechanic_approved = 1, user_approved = 0
           WHERE id = ?"#,
    )
    .bind(date)
    .bind(new_start)
    .bind(new_end)
    .bind(appointment_id)
    .execute(pool)
    .await?;
    fetch(pool, appointment_id).await
}

/// Manager reassignment. The new mechanic has not accepted yet.
pub async fn assign_mechanic(
    state: &AppState,
    appointment_id: &str,
    mechanic_id: &str,
    now: DateTime<Utc>,
) -> ApiResult<AppointmentRow> {
    let pool = &state.db;
    let row = fetch(pool, appointment_id).await?;
    let mechanic = identity::fetch_mechanic(pool, mechanic_id.trim()).await?;

    let _guard = state.slot_locks.acquire(&mechanic.id, &row.customer_id).await;
    check_availability(
        pool,
        &SlotRequest {
            mechanic_id: &mechanic.id,
            customer_id: &row.customer_id,
            date: row.date,
            start: row.start_time,
            end: row.end_time,
            exclude_appointment_id: Some(appointment_id),
        },
        now,
    )
    .await?;

    sqlx::query(
        "UPDATE appointments SET mechanic_id = ?, mechanic = ?, mechanic_approved = 0 WHERE id = ?",
    )
    .bind(&mechanic.id)
    .bind(Json(mechanic.snapshot()))
    .bind(appointment_id)
    .execute(pool)
    .await?;
    fetch(pool, appointment_id).await
}

/// Manager date change; the wall-clock times are kept.
pub async fn change_date(
    state: &AppState,
    appointment_id: &str,
    new_date: NaiveDate,
    now: DateTime<Utc>,
) -> ApiResult<AppointmentRow> {
    let pool = &state.db;
    let row = fetch(pool, appointment_id).await?;
    let start = at_wall_clock(new_date, row.start_time.time());
    let end = at_wall_clock(new_date, row.end_time.time());

    let _guard = state.slot_locks.acquire(&row.mechanic_id, &row.customer_id).await;
    check_availability(
        pool,
        &SlotRequest {
            mechanic_id: &row.mechanic_id,
            customer_id: &row.customer_id,
            date: new_date,
            start,
            end,
            exclude_appointment_id: Some(appointment_id),
        },
        now,
    )
    .await?;

    sqlx::query("UPDATE appointments SET date = ?, start_time = ?, end_time = ? WHERE id = ?")
        .bind(new_date)
        .bind(start)
        .bind(end)
        .bind(appointment_id)
        .execute(pool)
        .await?;
    fetch(pool, appointment_id).await
}

/// Hard delete. A repair opened from the appointment is left untouched.
pub async fn delete(
    pool: &SqlitePool,
    actor: &AuthUser,
    appointment_id: &str,
) -> ApiResult<AppointmentRow> {
    let row = fetch(pool, appointment_id).await?;
    ensure_party(&row, actor)?;

    sqlx::query("DELETE FROM appointments WHERE id = ?")
        .bind(appointment_id)
        .execute(pool)
        .await?;
    Ok(row)
}

/// Rows matching `filter` (one `?` bound to `party_id`), oldest first.
async fn fetch_where(
    pool: &SqlitePool,
    filter: &str,
    party_id: &str,
) -> ApiResult<Vec<AppointmentRow>> {
    let query = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE {filter} ORDER BY date, start_time"
    );
    let rows = sqlx::query_as::<_, AppointmentRow>(&query)
        .bind(party_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn upcoming_for_customer(
    pool: &SqlitePool,
    customer_id: &str,
    now: DateTime<Utc>,
) -> ApiResult<Vec<AppointmentRow>> {
    let rows = fetch_where(pool, "customer_id = ?", customer_id).await?;
    Ok(rows.into_iter().filter(|row| row.end_time > now).collect())
}

/// Requests the mechanic has not accepted yet.
pub async fn waiting_for_mechanic(
    pool: &SqlitePool,
    mechanic_id: &str,
    now: DateTime<Utc>,
) -> ApiResult<Vec<AppointmentRow>> {
    let rows = fetch_where(pool, "mechanic_id = ? AND mechanic_approved = 0", mechanic_id).await?;
    Ok(rows.into_iter().filter(|row| row.end_time > now).collect())
}

pub async fn upcoming_for_mechanic(
    pool: &SqlitePool,
    mechanic_id: &str,
    now: DateTime<Utc>,
) -> ApiResult<Vec<AppointmentRow>> {
    let rows = fetch_where(
        pool,
        "mechanic_id = ? AND mechanic_approved = 1 AND user_approved = 1",
        mechanic_id,
    )
    .await?;
    Ok(rows.into_iter().filter(|row| row.end_time > now).collect())
}

pub async fn history_for_mechanic(
    pool: &SqlitePool,
    mechanic_id: &str,
    now: DateTime<Utc>,
) -> ApiResult<Vec<AppointmentRow>> {
    let rows = fetch_where(
        pool,
        "mechanic_id = ? AND mechanic_approved = 1 AND user_approved = 1",
        mechanic_id,
    )
    .await?;
    Ok(rows
        .into_iter()
        .rev()
        .filter(|row| row.start_time < now)
        .take(HISTORY_LIMIT)
        .collect())
}

pub async fn list_all(pool: &SqlitePool) -> ApiResult<Vec<AppointmentRow>> {
    let query = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments ORDER BY date, start_time");
    let rows = sqlx::query_as::<_, AppointmentRow>(&query)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::SlotConflict,
        models::Problem,
        testing::{
            add_blackout, customer, future_day, insert_appointment, manager, mechanic,
            seed_test_data, test_state, window, Seed,
        },
    };

    fn request(seed: &Seed, day: NaiveDate, start: &str, end: &str) -> AppointmentRequest {
        let (start_time, end_time) = window(day, start, end);
        AppointmentRequest {
            car_id: Some(seed.car_id.clone()),
            mechanic_id: Some(seed.mechanic_id.clone()),
            date: Some(day),
            start_time: Some(start_time),
            end_time: Some(end_time),
            localisation: Some("Garage bay 2".to_string()),
            problem: vec![Problem {
                material: None,
                description: "Brakes squeal".to_string(),
            }],
        }
    }

    #[actix_web::test]
    async fn created_appointments_await_the_mechanic() {
        let state = test_state().await;
        let seed = seed_test_data(&state.db).await;
        let day = future_day(5);

        let row = create(&state, &seed.customer_id, request(&seed, day, "10:00", "11:00"), Utc::now())
            .await
            .unwrap();

        assert_eq!(row.id, "A001");
        assert!(row.user_approved);
        assert!(!row.mechanic_approved);
        assert_eq!(row.customer.id, seed.customer_id);
        assert_eq!(row.mechanic.id, seed.mechanic_id);
        assert_eq!(row.car.id, seed.car_id);
    }

    #[actix_web::test]
    async fn missing_fields_are_reported_together() {
        let state = test_state().await;
        let seed = seed_test_data(&state.db).await;

        let err = create(&state, &seed.customer_id, AppointmentRequest::default(), Utc::now())
            .await
            .unwrap_err();
        let ApiError::Validation(message) = err else {
            panic!("expected a validation error, got {err:?}");
        };
        assert!(message.contains("Vehicle is required."));
        assert!(message.contains("At least one problem must be described."));
    }

    #[actix_web::test]
    async fn unknown_mechanic_or_foreign_car_is_refused() {
        let state = test_state().await;
        let seed = seed_test_data(&state.db).await;
        let day = future_day(5);

        let mut unknown = request(&seed, day, "10:00", "11:00");
        unknown.mechanic_id = Some("M999".to_string());
        let err = create(&state, &seed.customer_id, unknown, Utc::now()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound("Mechanic")));

        let mut foreign = request(&seed, day, "10:00", "11:00");
        foreign.car_id = Some(seed.other_car_id.clone());
        let err = create(&state, &seed.customer_id, foreign, Utc::now()).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[actix_web::test]
    async fn blackout_and_double_booking_conflict() {
        let state = test_state().await;
        let seed = seed_test_data(&state.db).await;
        let day = future_day(5);
        add_blackout(&state.db, &seed.mechanic_id, day, "14:00", "15:00").await;

        let err = create(&state, &seed.customer_id, request(&seed, day, "14:30", "15:30"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::SlotConflict(SlotConflict::Blackout)));

        create(&state, &seed.customer_id, request(&seed, day, "10:00", "11:00"), Utc::now())
            .await
            .unwrap();
        let err = create(&state, &seed.customer_id, request(&seed, day, "10:30", "11:30"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::SlotConflict(SlotConflict::MechanicBooked)));
    }

    #[actix_web::test]
    async fn concurrent_requests_for_one_window_book_once() {
        let state = test_state().await;
        let seed = seed_test_data(&state.db).await;
        let day = future_day(6);

        let first = create(&state, &seed.customer_id, request(&seed, day, "10:00", "11:00"), Utc::now());
        let mut other = request(&seed, day, "10:00", "11:00");
        other.car_id = Some(seed.other_car_id.clone());
        let second = create(&state, &seed.other_customer_id, other, Utc::now());

        let (first, second) = tokio::join!(first, second);
        assert_eq!(
            [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(),
            1
        );
    }

    #[actix_web::test]
    async fn accept_and_reject_flip_only_the_mechanic_flag() {
        let state = test_state().await;
        let seed = seed_test_data(&state.db).await;
        let id = insert_appointment(&state.db, &seed, future_day(5), "09:00", "10:00").await;

        let row = set_mechanic_approval(&state.db, &mechanic(&seed), &id, true).await.unwrap();
        assert!(row.mechanic_approved && row.user_approved);

        let row = set_mechanic_approval(&state.db, &manager(&seed), &id, false).await.unwrap();
        assert!(!row.mechanic_approved && row.user_approved);

        let stranger = AuthUser {
            id: seed.other_mechanic_id.clone(),
            role: Role::Mechanic,
        };
        let err = set_mechanic_approval(&state.db, &stranger, &id, true).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        let err = set_mechanic_approval(&state.db, &customer(&seed), &id, true).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[actix_web::test]
    async fn reschedule_moves_one_hour_and_needs_customer_confirmation() {
        let state = test_state().await;
        let seed = seed_test_data(&state.db).await;
        let day = future_day(5);
        let id = insert_appointment(&state.db, &seed, day, "09:00", "10:00").await;
        let (new_start, _) = window(day, "15:00", "16:00");

        let row = reschedule(&state, &mechanic(&seed), &id, new_start, Utc::now()).await.unwrap();
        assert_eq!(row.start_time, new_start);
        assert_eq!(row.end_time, new_start + Duration::hours(1));
        assert!(row.mechanic_approved);
        assert!(!row.user_approved);

        let row = set_customer_approval(&state.db, &customer(&seed), &id, true).await.unwrap();
        assert!(row.mechanic_approved && row.user_approved);
    }

    #[actix_web::test]
    async fn reschedule_into_a_past_slot_is_invalid() {
        let state = test_state().await;
        let seed = seed_test_data(&state.db).await;
        let id = insert_appointment(&state.db, &seed, future_day(5), "09:00", "10:00").await;

        let err = reschedule(&state, &mechanic(&seed), &id, Utc::now() - Duration::hours(3), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[actix_web::test]
    async fn manager_reassignment_rechecks_the_new_mechanic() {
        let state = test_state().await;
        let seed = seed_test_data(&state.db).await;
        let day = future_day(5);
        let id = insert_appointment(&state.db, &seed, day, "09:00", "10:00").await;
        add_blackout(&state.db, &seed.other_mechanic_id, day, "09:30", "11:00").await;

        let err = assign_mechanic(&state, &id, &seed.other_mechanic_id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::SlotConflict(SlotConflict::Blackout)));

        let err = assign_mechanic(&state, &id, "M404", Utc::now()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound("Mechanic")));

        set_mechanic_approval(&state.db, &mechanic(&seed), &id, true).await.unwrap();
        let row = change_date(&state, &id, day + Duration::days(1), Utc::now()).await.unwrap();
        assert_eq!(row.date, day + Duration::days(1));
        assert_eq!(row.start_time, window(day + Duration::days(1), "09:00", "10:00").0);

        let row = assign_mechanic(&state, &id, &seed.other_mechanic_id, Utc::now()).await.unwrap();
        assert_eq!(row.mechanic.id, seed.other_mechanic_id);
        assert!(!row.mechanic_approved);
    }

    #[actix_web::test]
    async fn delete_is_limited_to_the_parties() {
        let state = test_state().await;
        let seed = seed_test_data(&state.db).await;
        let id = insert_appointment(&state.db, &seed, future_day(5), "09:00", "10:00").await;

        let outsider = AuthUser {
            id: seed.other_customer_id.clone(),
            role: Role::Customer,
        };
        let err = delete(&state.db, &outsider, &id).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        delete(&state.db, &customer(&seed), &id).await.unwrap();
        let err = fetch(&state.db, &id).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound("Appointment")));
    }

    #[actix_web::test]
    async fn mechanic_views_split_waiting_upcoming_and_history() {
        let state = test_state().await;
        let seed = seed_test_data(&state.db).await;
        let waiting = insert_appointment(&state.db, &seed, future_day(2), "09:00", "10:00").await;
        let confirmed = insert_appointment(&state.db, &seed, future_day(3), "09:00", "10:00").await;
        set_mechanic_approval(&state.db, &mechanic(&seed), &confirmed, true).await.unwrap();

        let later = Utc::now() + Duration::days(10);
        let now = Utc::now();

        let rows = waiting_for_mechanic(&state.db, &seed.mechanic_id, now).await.unwrap();
        assert_eq!(rows.iter().map(|row| row.id.as_str()).collect::<Vec<_>>(), [waiting.as_str()]);

        let rows = upcoming_for_mechanic(&state.db, &seed.mechanic_id, now).await.unwrap();
        assert_eq!(rows.iter().map(|row| row.id.as_str()).collect::<Vec<_>>(), [confirmed.as_str()]);

        assert!(history_for_mechanic(&state.db, &seed.mechanic_id, now).await.unwrap().is_empty());
        let rows = history_for_mechanic(&state.db, &seed.mechanic_id, later).await.unwrap();
        assert_eq!(rows.len(), 1);

        assert_eq!(upcoming_for_customer(&state.db, &seed.customer_id, now).await.unwrap().len(), 2);
        assert!(upcoming_for_customer(&state.db, &seed.customer_id, later).await.unwrap().is_empty());
        assert_eq!(list_all(&state.db).await.unwrap().len(), 2);
    }
}
