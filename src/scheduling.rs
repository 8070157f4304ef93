//! Slot-conflict checking for appointment bookings.
//!
//! A requested window is free when it overlaps neither a mechanic blackout
//! window nor an existing booking of the same mechanic or the same customer
//! on that date. Windows are half-open: `[start, end)`.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use sqlx::SqlitePool;
use tokio::sync::OwnedMutexGuard;

use crate::error::{ApiError, ApiResult, SlotConflict};

pub type Window = (DateTime<Utc>, DateTime<Utc>);

#[derive(Debug, Clone)]
pub struct SlotRequest<'a> {
    pub mechanic_id: &'a str,
    pub customer_id: &'a str,
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// The appointment being moved, which must not conflict with itself.
    pub exclude_appointment_id: Option<&'a str>,
}

pub fn overlaps(a: Window, b: Window) -> bool {
    a.0 < b.1 && a.1 > b.0
}

/// Parses a wall-clock `HH:MM` (or `HH:MM:SS`) time.
pub fn parse_wall_clock(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

pub fn at_wall_clock(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

pub fn validate_window(
    date: NaiveDate,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ApiResult<()> {
    if start >= end {
        return Err(ApiError::validation("End time must be after start time"));
    }
    if start <= now {
        return Err(ApiError::validation("Start time cannot be in the past"));
    }
    if start.date_naive() != date || end.date_naive() != date {
        return Err(ApiError::validation(
            "Appointment must start and end on the requested date",
        ));
    }
    Ok(())
}

/// Decides which side, if any, makes `requested` unavailable.
pub fn find_conflict(
    requested: Window,
    blackouts: &[Window],
    mechanic_bookings: &[Window],
    customer_bookings: &[Window],
) -> Option<SlotConflict> {
    if blackouts.iter().any(|block| overlaps(requested, *block)) {
        return Some(SlotConflict::Blackout);
    }
    if mechanic_bookings
        .iter()
        .any(|booking| overlaps(requested, *booking))
    {
        return Some(SlotConflict::MechanicBooked);
    }
    if customer_bookings
        .iter()
        .any(|booking| overlaps(requested, *booking))
    {
        return Some(SlotConflict::CustomerBooked);
    }
    None
}

pub async fn blackout_windows(
    pool: &SqlitePool,
    mechanic_id: &str,
    date: NaiveDate,
) -> ApiResult<Vec<Window>> {
    let rows = sqlx::query_as::<_, (String, String)>(
        "SELECT start_time, end_time FROM unavailable_slots WHERE mechanic_id = ? AND date = ?",
    )
    .bind(mechanic_id)
    .bind(date)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(start, end)| {
            match (parse_wall_clock(&start), parse_wall_clock(&end)) {
                (Some(start), Some(end)) => {
                    Ok((at_wall_clock(date, start), at_wall_clock(date, end)))
                }
                _ => Err(ApiError::Internal(format!(
                    "malformed blackout window {start}-{end} for mechanic {mechanic_id}"
                ))),
            }
        })
        .collect()
}

async fn mechanic_bookings(
    pool: &SqlitePool,
    mechanic_id: &str,
    date: NaiveDate,
    exclude_appointment_id: Option<&str>,
) -> ApiResult<Vec<Window>> {
    let mut windows = sqlx::query_as::<_, Window>(
        "SELECT start_time, end_time FROM appointments WHERE mechanic_id = ? AND date = ? AND id != ?",
    )
    .bind(mechanic_id)
    .bind(date)
    .bind(exclude_appointment_id.unwrap_or_default())
    .fetch_all(pool)
    .await?;

    // Reparation work booked on the mechanic also occupies them; items may span days.
    let day = date.format("%Y-%m-%d").to_string();
    let repair_work = sqlx::query_as::<_, Window>(
        r#"SELECT rp.start_time, rp.end_time
           FROM reparations rp
           JOIN repairs r ON rp.repair_id = r.id
           WHERE r.mechanic_id = ?
             AND substr(rp.start_time, 1, 10) <= ?
             AND substr(rp.end_time, 1, 10) >= ?"#,
    )
    .bind(mechanic_id)
    .bind(&day)
    .bind(&day)
    .fetch_all(pool)
    .await?;

    windows.extend(repair_work);
    Ok(windows)
}

async fn customer_bookings(
    pool: &SqlitePool,
    customer_id: &str,
    date: NaiveDate,
    exclude_appointment_id: Option<&str>,
) -> ApiResult<Vec<Window>> {
    let windows = sqlx::query_as::<_, Window>(
        "SELECT start_time, end_time FROM appointments WHERE customer_id = ? AND date = ? AND id != ?",
    )
    .bind(customer_id)
    .bind(date)
    .bind(exclude_appointment_id.unwrap_or_default())
    .fetch_all(pool)
    .await?;
    Ok(windows)
}

/// Fails with `Validation` for a malformed window and `SlotConflict` when it is taken.
pub async fn check_availability(
    pool: &SqlitePool,
    request: &SlotRequest<'_>,
    now: DateTime<Utc>,
) -> ApiResult<()> {
    validate_window(request.date, request.start, request.end, now)?;

    let blackouts = blackout_windows(pool, request.mechanic_id, request.date).await?;
    let mechanic = mechanic_bookings(
        pool,
        request.mechanic_id,
        request.date,
        request.exclude_appointment_id,
    )
    .await?;
    let customer = customer_bookings(
        pool,
        request.customer_id,
        request.date,
        request.exclude_appointment_id,
    )
    .await?;

    match find_conflict((request.start, request.end), &blackouts, &mechanic, &customer) {
        Some(conflict) => {
            log::debug!(
                "Slot {} - {} refused for mechanic {} / customer {}: {conflict}",
                request.start,
                request.end,
                request.mechanic_id,
                request.customer_id
            );
            Err(ApiError::SlotConflict(conflict))
        }
        None => Ok(()),
    }
}

pub async fn is_slot_available(
    pool: &SqlitePool,
    request: &SlotRequest<'_>,
    now: DateTime<Utc>,
) -> ApiResult<bool> {
    match check_availability(pool, request, now).await {
        Ok(()) => Ok(true),
        Err(ApiError::SlotConflict(_)) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Serializes check-then-write booking per mechanic and per customer.
#[derive(Default)]
pub struct SlotLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

pub struct SlotGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl SlotLocks {
    /// Locks are taken in key order so two bookings never wait on each other crosswise.
    pub async fn acquire(&self, mechanic_id: &str, customer_id: &str) -> SlotGuard {
        let mut keys = vec![
            format!("mechanic:{mechanic_id}"),
            format!("customer:{customer_id}"),
        ];
        keys.sort();
        keys.dedup();

        let locks: Vec<_> = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            // An entry only the registry references has no holder and no waiter.
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            keys.into_iter()
                .map(|key| map.entry(key).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(locks.len());
        for lock in locks {
            guards.push(lock.lock_owned().await);
        }
        SlotGuard { _guards: guards }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        repairs::{add_reparation, create_repair, ReparationInput},
        testing::{
            add_blackout, future_day, insert_appointment, mechanic, seed_test_data, setup_test_db,
            window,
        },
    };
    use chrono::Duration;

    #[test]
    fn touching_windows_do_not_overlap() {
        let day = future_day(3);
        let ten_to_eleven = window(day, "10:00", "11:00");
        let eleven_to_noon = window(day, "11:00", "12:00");
        let half_ten = window(day, "10:30", "11:30");

        assert!(!overlaps(ten_to_eleven, eleven_to_noon));
        assert!(!overlaps(eleven_to_noon, ten_to_eleven));
        assert!(overlaps(ten_to_eleven, half_ten));
        assert!(overlaps(window(day, "09:00", "13:00"), half_ten));
    }

    #[test]
    fn blackout_wins_over_booking_conflicts() {
        let day = future_day(3);
        let requested = window(day, "10:00", "11:00");
        let busy = [window(day, "10:30", "12:00")];

        assert_eq!(
            find_conflict(requested, &busy, &busy, &busy),
            Some(SlotConflict::Blackout)
        );
        assert_eq!(
            find_conflict(requested, &[], &busy, &busy),
            Some(SlotConflict::MechanicBooked)
        );
        assert_eq!(
            find_conflict(requested, &[], &[], &busy),
            Some(SlotConflict::CustomerBooked)
        );
        assert_eq!(find_conflict(requested, &[], &[], &[]), None);
    }

    #[test]
    fn window_validation_rejects_inverted_past_and_cross_day_ranges() {
        let day = future_day(3);
        let now = Utc::now();
        let (start, end) = window(day, "10:00", "11:00");

        assert!(validate_window(day, start, end, now).is_ok());
        assert!(matches!(
            validate_window(day, end, start, now),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            validate_window(day, start, start, now),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            validate_window(day, start, end, end),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            validate_window(day + Duration::days(1), start, end, now),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn wall_clock_accepts_minutes_and_seconds() {
        assert_eq!(
            parse_wall_clock("09:30"),
            NaiveTime::from_hms_opt(9, 30, 0)
        );
        assert_eq!(
            parse_wall_clock("17:00:00"),
            NaiveTime::from_hms_opt(17, 0, 0)
        );
        assert_eq!(parse_wall_clock("25:00"), None);
        assert_eq!(parse_wall_clock("noon"), None);
    }

    #[actix_web::test]
    async fn rejects_exactly_when_a_blackout_or_booking_intersects() {
        let pool = setup_test_db().await;
        let seed = seed_test_data(&pool).await;
        let day = future_day(4);
        add_blackout(&pool, &seed.mechanic_id, day, "12:00", "13:00").await;
        insert_appointment(&pool, &seed, day, "09:00", "10:00").await;

        let cases = [
            ("08:00", "09:00", true),
            ("08:30", "09:30", false),
            ("10:00", "12:00", true),
            ("11:30", "12:30", false),
            ("12:59", "14:00", false),
            ("13:00", "14:00", true),
        ];
        for (start, end, expected) in cases {
            let (start_at, end_at) = window(day, start, end);
            let request = SlotRequest {
                mechanic_id: &seed.mechanic_id,
                customer_id: &seed.other_customer_id,
                date: day,
                start: start_at,
                end: end_at,
                exclude_appointment_id: None,
            };
            let available = is_slot_available(&pool, &request, Utc::now()).await.unwrap();
            assert_eq!(available, expected, "{start}-{end}");
        }
    }

    #[actix_web::test]
    async fn customer_side_conflicts_are_reported_separately() {
        let pool = setup_test_db().await;
        let seed = seed_test_data(&pool).await;
        let day = future_day(4);
        insert_appointment(&pool, &seed, day, "09:00", "10:00").await;

        let (start, end) = window(day, "09:30", "10:30");
        let request = SlotRequest {
            mechanic_id: &seed.other_mechanic_id,
            customer_id: &seed.customer_id,
            date: day,
            start,
            end,
            exclude_appointment_id: None,
        };
        let err = check_availability(&pool, &request, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::SlotConflict(SlotConflict::CustomerBooked)
        ));
    }

    #[actix_web::test]
    async fn an_appointment_never_conflicts_with_itself() {
        let pool = setup_test_db().await;
        let seed = seed_test_data(&pool).await;
        let day = future_day(4);
        let appointment_id = insert_appointment(&pool, &seed, day, "09:00", "10:00").await;

        let (start, end) = window(day, "09:30", "10:30");
        let request = SlotRequest {
            mechanic_id: &seed.mechanic_id,
            customer_id: &seed.customer_id,
            date: day,
            start,
            end,
            exclude_appointment_id: Some(&appointment_id),
        };
        assert!(is_slot_available(&pool, &request, Utc::now()).await.unwrap());
    }

    #[actix_web::test]
    async fn reparation_work_occupies_the_mechanic() {
        let pool = setup_test_db().await;
        let seed = seed_test_data(&pool).await;
        let day = future_day(4);
        let appointment_id = insert_appointment(&pool, &seed, day, "09:00", "10:00").await;
        let repair = create_repair(&pool, &mechanic(&seed), &appointment_id, Utc::now())
            .await
            .unwrap();
        let (start, end) = window(day, "14:00", "16:00");
        let item = ReparationInput {
            kind: Some("Labor".to_string()),
            price: Some(80.0),
            start: Some(start),
            end: Some(end),
            ..Default::default()
        };
        add_reparation(&pool, &mechanic(&seed), &repair.id, item, Utc::now())
            .await
            .unwrap();

        let (start, end) = window(day, "15:00", "15:30");
        let busy = SlotRequest {
            mechanic_id: &seed.mechanic_id,
            customer_id: &seed.other_customer_id,
            date: day,
            start,
            end,
            exclude_appointment_id: None,
        };
        let err = check_availability(&pool, &busy, Utc::now()).await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::SlotConflict(SlotConflict::MechanicBooked)
        ));

        let (start, end) = window(day, "16:00", "17:00");
        let free = SlotRequest { start, end, ..busy };
        assert!(is_slot_available(&pool, &free, Utc::now()).await.unwrap());
    }

    #[actix_web::test]
    async fn other_days_do_not_block() {
        let pool = setup_test_db().await;
        let seed = seed_test_data(&pool).await;
        let day = future_day(4);
        add_blackout(&pool, &seed.mechanic_id, day, "00:00", "23:59").await;
        insert_appointment(&pool, &seed, day, "09:00", "10:00").await;

        let next_day = day + Duration::days(1);
        let (start, end) = window(next_day, "09:00", "10:00");
        let request = SlotRequest {
            mechanic_id: &seed.mechanic_id,
            customer_id: &seed.customer_id,
            date: next_day,
            start,
            end,
            exclude_appointment_id: None,
        };
        assert!(is_slot_available(&pool, &request, Utc::now()).await.unwrap());
    }

    #[actix_web::test]
    async fn slot_locks_serialize_the_same_mechanic() {
        let locks = Arc::new(SlotLocks::default());
        let first = locks.acquire("M001", "CST001").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("M001", "CST002").await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(first);
        contender.await.unwrap();

        // Unrelated parties never wait.
        let _a = locks.acquire("M001", "CST001").await;
        let _b = locks.acquire("M002", "CST003").await;
    }

    #[actix_web::test]
    async fn released_slot_locks_are_pruned() {
        let locks = SlotLocks::default();
        drop(locks.acquire("M001", "CST001").await);
        drop(locks.acquire("M002", "CST002").await);

        let held = locks.acquire("M003", "CST003").await;
        let keys: Vec<String> = {
            let map = locks.inner.lock().unwrap();
            let mut keys: Vec<String> = map.keys().cloned().collect();
            keys.sort();
            keys
        };
        assert_eq!(keys, ["customer:CST003", "mechanic:M003"]);
        drop(held);
    }
}
