//! Repair ledger.
//!
//! A repair holds priced reparation items. Each item carries its own
//! `{mechanic, user}` approval pair: a mechanic-side edit leaves only the
//! mechanic flag set, a customer-side reprice leaves only the user flag set,
//! and an item is billable once both are set again. Once the repair is
//! invoiced, nothing in it changes.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{types::Json, SqlitePool};

use crate::{
    appointments,
    auth::{new_id, AuthUser},
    db::{next_id, Sequence},
    error::{ApiError, ApiResult},
    identity,
    models::{Repair, RepairRow, ReparationRow, REPLACEMENT_KIND, REPLACEMENT_MIN_PRICE},
};

const REPAIR_COLUMNS: &str = "id, appointment_id, owner_id, owner, car, mechanic_id, mechanic, \
     finished_mechanic, finished_user, created_at";
const REPARATION_COLUMNS: &str = "id, position, kind, material, description, price, \
     mechanic_approved, user_approved, start_time, end_time";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReparationInput {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub material: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

pub fn is_replacement(kind: &str) -> bool {
    kind.trim().eq_ignore_ascii_case(REPLACEMENT_KIND)
}

/// Price rule for an item of `kind`.
pub fn check_price(kind: &str, material: Option<&str>, price: f64) -> ApiResult<()> {
    if is_replacement(kind) {
        if material.map_or(true, |material| material.trim().is_empty()) {
            return Err(ApiError::validation("Material required for Replacement"));
        }
        if price <= REPLACEMENT_MIN_PRICE {
            return Err(ApiError::validation(format!(
                "Price must be greater than {REPLACEMENT_MIN_PRICE} for Replacement"
            )));
        }
    }
    if !price.is_finite() || price <= 0.0 {
        return Err(ApiError::validation("Price must be positive"));
    }
    Ok(())
}

fn check_period(start: DateTime<Utc>, end: DateTime<Utc>) -> ApiResult<()> {
    if start >= end {
        return Err(ApiError::validation("End date must be after start date"));
    }
    Ok(())
}

pub async fn fetch(pool: &SqlitePool, repair_id: &str) -> ApiResult<RepairRow> {
    let query = format!("SELECT {REPAIR_COLUMNS} FROM repairs WHERE id = ?");
    sqlx::query_as::<_, RepairRow>(&query)
        .bind(repair_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::NotFound("Repair"))
}

pub async fn items(pool: &SqlitePool, repair_id: &str) -> ApiResult<Vec<ReparationRow>> {
    let query =
        format!("SELECT {REPARATION_COLUMNS} FROM reparations WHERE repair_id = ? ORDER BY position");
    let rows = sqlx::query_as::<_, ReparationRow>(&query)
        .bind(repair_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

async fn fetch_item(pool: &SqlitePool, repair_id: &str, item_id: &str) -> ApiResult<ReparationRow> {
    let query = format!("SELECT {REPARATION_COLUMNS} FROM reparations WHERE id = ? AND repair_id = ?");
    sqlx::query_as::<_, ReparationRow>(&query)
        .bind(item_id)
        .bind(repair_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::NotFound("Reparation"))
}

/// The repair with its items in position order.
pub async fn load(pool: &SqlitePool, repair_id: &str) -> ApiResult<Repair> {
    let row = fetch(pool, repair_id).await?;
    let items = items(pool, repair_id).await?;
    Ok(Repair::from_parts(row, items))
}

async fn load_all(pool: &SqlitePool, rows: Vec<RepairRow>) -> ApiResult<Vec<Repair>> {
    let mut repairs = Vec::with_capacity(rows.len());
    for row in rows {
        let items = items(pool, &row.id).await?;
        repairs.push(Repair::from_parts(row, items));
    }
    Ok(repairs)
}

pub async fn is_invoiced(pool: &SqlitePool, repair_id: &str) -> ApiResult<bool> {
    let invoiced = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM invoices WHERE repair_id = ?")
        .bind(repair_id)
        .fetch_one(pool)
        .await?;
    Ok(invoiced > 0)
}

async fn ensure_open(pool: &SqlitePool, repair_id: &str) -> ApiResult<()> {
    if is_invoiced(pool, repair_id).await? {
        return Err(ApiError::RepairFinalized(repair_id.to_string()));
    }
    Ok(())
}

/// Loads an open repair assigned to `actor`.
async fn mechanic_repair(pool: &SqlitePool, actor: &AuthUser, repair_id: &str) -> ApiResult<RepairRow> {
    let repair = fetch(pool, repair_id).await?;
    if repair.mechanic_id != actor.id {
        return Err(ApiError::forbidden("Repair is not assigned to you"));
    }
    ensure_open(pool, repair_id).await?;
    Ok(repair)
}

/// Loads an open repair owned by `actor`.
async fn customer_repair(pool: &SqlitePool, actor: &AuthUser, repair_id: &str) -> ApiResult<RepairRow> {
    let repair = fetch(pool, repair_id).await?;
    if repair.owner_id != actor.id {
        return Err(ApiError::forbidden("Repair does not belong to you"));
    }
    ensure_open(pool, repair_id).await?;
    Ok(repair)
}

pub async fn create_repair(
    pool: &SqlitePool,
    actor: &AuthUser,
    appointment_id: &str,
    now: DateTime<Utc>,
) -> ApiResult<RepairRow> {
    let appointment = appointments::fetch(pool, appointment_id).await?;
    if appointment.mechanic_id != actor.id {
        return Err(ApiError::forbidden("Appointment is not assigned to you"));
    }

    let existing = sqlx::query_scalar::<_, String>("SELECT id FROM repairs WHERE appointment_id = ?")
        .bind(appointment_id)
        .fetch_optional(pool)
        .await?;
    if let Some(existing) = existing {
        return Err(ApiError::DuplicateKey(format!(
            "Repair {existing} already exists for appointment {appointment_id}"
        )));
    }

    let owner = identity::fetch_user(pool, &appointment.customer_id).await?;
    let repair_id = next_id(pool, Sequence::Repair).await?;
    sqlx::query(
        r#"INSERT INTO repairs
           (id, appointment_id, owner_id, owner, car, mechanic_id, mechanic,
            finished_mechanic, finished_user, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?)"#,
    )
    .bind(&repair_id)
    .bind(appointment_id)
    .bind(&owner.id)
    .bind(Json(owner.snapshot()))
    .bind(&appointment.car)
    .bind(&appointment.mechanic_id)
    .bind(&appointment.mechanic)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|err| {
        ApiError::from_insert(
            err,
            &format!("A repair already exists for appointment {appointment_id}"),
        )
    })?;

    fetch(pool, &repair_id).await
}

pub async fn add_reparation(
    pool: &SqlitePool,
    actor: &AuthUser,
    repair_id: &str,
    input: ReparationInput,
    now: DateTime<Utc>,
) -> ApiResult<ReparationRow> {
    let kind = input
        .kind
        .as_deref()
        .map(str::trim)
        .filter(|kind| !kind.is_empty());
    let (Some(kind), Some(start), Some(end)) = (kind, input.start, input.end) else {
        return Err(ApiError::validation("Missing required fields"));
    };
    check_period(start, end)?;
    if start < now {
        return Err(ApiError::validation("Start date cannot be in the past"));
    }
    let price = input.price.unwrap_or_default();
    check_price(kind, input.material.as_deref(), price)?;

    mechanic_repair(pool, actor, repair_id).await?;

    let item_id = new_id();
    sqlx::query(
        r#"INSERT INTO reparations
           (id, repair_id, position, kind, material, description, price,
            mechanic_approved, user_approved, start_time, end_time)
           SELECT ?, ?, COALESCE(MAX(position) + 1, 0), ?, ?, ?, ?, 1, 0, ?, ?
           FROM reparations WHERE repair_id = ?"#,
    )
    .bind(&item_id)
    .bind(repair_id)
    .bind(kind)
    .bind(input.material.as_deref().map(str::trim))
    .bind(input.description.as_deref().map(str::trim).unwrap_or_default())
    .bind(price)
    .bind(start)
    .bind(end)
    .bind(repair_id)
    .execute(pool)
    .await?;

    fetch_item(pool, repair_id, &item_id).await
}

/// Mechanic edit. Whatever changed, the customer has to approve again.
pub async fn update_reparation(
    pool: &SqlitePool,
    actor: &AuthUser,
    repair_id: &str,
    item_id: &str,
    patch: ReparationInput,
    now: DateTime<Utc>,
) -> ApiResult<ReparationRow> {
    mechanic_repair(pool, actor, repair_id).await?;
    let mut item = fetch_item(pool, repair_id, item_id).await?;

    if let Some(kind) = patch.kind.as_deref().map(str::trim) {
        if kind.is_empty() {
            return Err(ApiError::validation("Type cannot be empty"));
        }
        item.kind = kind.to_string();
    }
    if let Some(material) = patch.material {
        item.material = Some(material.trim().to_string()).filter(|material| !material.is_empty());
    }
    if let Some(description) = patch.description {
        item.description = description.trim().to_string();
    }
    if let Some(price) = patch.price {
        item.price = price;
    }
    if let Some(start) = patch.start {
        if start != item.start_time && start < now {
            return Err(ApiError::validation("Start date cannot be in the past"));
        }
        item.start_time = start;
    }
    if let Some(end) = patch.end {
        item.end_time = end;
    }
    check_period(item.start_time, item.end_time)?;
    check_price(&item.kind, item.material.as_deref(), item.price)?;

    sqlx::query(
        r#"UPDATE reparations
           SET kind = ?, material = ?, description = ?, price = ?, start_time = ?, end_time = ?,
               mechanic_approved = 1, user_approved = 0
           WHERE id = ? AND repair_id = ?"#,
    )
    .bind(&item.kind)
    .bind(&item.material)
    .bind(&item.description)
    .bind(item.price)
    .bind(item.start_time)
    .bind(item.end_time)
    .bind(item_id)
    .bind(repair_id)
    .execute(pool)
    .await?;

    fetch_item(pool, repair_id, item_id).await
}

/// Customer approval; only counts when the mechanic side is set.
pub async fn accept_reparation(
    pool: &SqlitePool,
    actor: &AuthUser,
    repair_id: &str,
    item_id: &str,
) -> ApiResult<ReparationRow> {
    customer_repair(pool, actor, repair_id).await?;
    fetch_item(pool, repair_id, item_id).await?;

    let result = sqlx::query(
        r#"UPDATE reparations SET user_approved = 1
           WHERE id = ? AND repair_id = ? AND mechanic_approved = 1"#,
    )
    .bind(item_id)
    .bind(repair_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::forbidden(
            "Reparation has not been approved by the mechanic",
        ));
    }

    fetch_item(pool, repair_id, item_id).await
}

pub async fn reject_reparation(
    pool: &SqlitePool,
    actor: &AuthUser,
    repair_id: &str,
    item_id: &str,
) -> ApiResult<ReparationRow> {
    customer_repair(pool, actor, repair_id).await?;
    fetch_item(pool, repair_id, item_id).await?;

    sqlx::query("UPDATE reparations SET user_approved = 0 WHERE id = ? AND repair_id = ?")
        .bind(item_id)
        .bind(repair_id)
        .execute(pool)
        .await?;

    fetch_item(pool, repair_id, item_id).await
}

/// Customer counter-offer: the customer side is set, the mechanic must re-approve.
pub async fn reprice_reparation(
    pool: &SqlitePool,
    actor: &AuthUser,
    repair_id: &str,
    item_id: &str,
    price: f64,
) -> ApiResult<ReparationRow> {
    customer_repair(pool, actor, repair_id).await?;
    let item = fetch_item(pool, repair_id, item_id).await?;
    check_price(&item.kind, item.material.as_deref(), price)?;

    sqlx::query(
        r#"UPDATE reparations SET price = ?, user_approved = 1, mechanic_approved = 0
           WHERE id = ? AND repair_id = ?"#,
    )
    .bind(price)
    .bind(item_id)
    .bind(repair_id)
    .execute(pool)
    .await?;

    fetch_item(pool, repair_id, item_id).await
}

/// Mechanic approval of a customer-repriced item.
pub async fn approve_reparation(
    pool: &SqlitePool,
    actor: &AuthUser,
    repair_id: &str,
    item_id: &str,
) -> ApiResult<ReparationRow> {
    mechanic_repair(pool, actor, repair_id).await?;
    fetch_item(pool, repair_id, item_id).await?;

    let result = sqlx::query(
        r#"UPDATE reparations SET mechanic_approved = 1
           WHERE id = ? AND repair_id = ? AND user_approved = 1"#,
    )
    .bind(item_id)
    .bind(repair_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::forbidden(
            "Reparation has not been approved by the customer",
        ));
    }

    fetch_item(pool, repair_id, item_id).await
}

/// The mechanic considers the work done. Billing stays with the customer.
pub async fn finish_repair(pool: &SqlitePool, actor: &AuthUser, repair_id: &str) -> ApiResult<RepairRow> {
    mechanic_repair(pool, actor, repair_id).await?;

    sqlx::query("UPDATE repairs SET finished_mechanic = 1 WHERE id = ?")
        .bind(repair_id)
        .execute(pool)
        .await?;
    fetch(pool, repair_id).await
}

pub async fn ongoing_for_mechanic(pool: &SqlitePool, mechanic_id: &str) -> ApiResult<Vec<Repair>> {
    let query = format!(
        "SELECT {REPAIR_COLUMNS} FROM repairs WHERE mechanic_id = ? AND finished_user = 0 ORDER BY created_at"
    );
    let rows = sqlx::query_as::<_, RepairRow>(&query)
        .bind(mechanic_id)
        .fetch_all(pool)
        .await?;
    load_all(pool, rows).await
}

pub async fn for_customer(pool: &SqlitePool, owner_id: &str) -> ApiResult<Vec<Repair>> {
    let query = format!("SELECT {REPAIR_COLUMNS} FROM repairs WHERE owner_id = ? ORDER BY created_at DESC");
    let rows = sqlx::query_as::<_, RepairRow>(&query)
        .bind(owner_id)
        .fetch_all(pool)
        .await?;
    load_all(pool, rows).await
}
