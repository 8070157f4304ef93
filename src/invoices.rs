//! Invoice finalization.
//!
//! An invoice copies the dual-approved items of a repair together with the
//! party snapshots. It never reads the repair again, so its total stays what
//! it was at finalize time.

use chrono::{DateTime, Utc};
use sqlx::{types::Json, SqlitePool};

use crate::{
    auth::AuthUser,
    db::{next_id, Sequence},
    error::{is_unique_violation, ApiError, ApiResult},
    models::{InvoiceItem, InvoiceRow, ReparationRow},
    repairs,
};

const INVOICE_COLUMNS: &str =
    "id, repair_id, owner_id, owner, car, mechanic, items, total, finalized_at";

/// Items both parties signed off, copied out of the ledger.
pub fn billable_items(items: Vec<ReparationRow>) -> Vec<InvoiceItem> {
    items
        .into_iter()
        .filter(|item| item.status().both())
        .map(|item| InvoiceItem {
            reparation_id: item.id,
            kind: item.kind,
            material: item.material,
            description: item.description,
            price: item.price,
            start: item.start_time,
            end: item.end_time,
        })
        .collect()
}

pub fn total(items: &[InvoiceItem]) -> f64 {
    items.iter().map(|item| item.price).sum()
}

pub async fn finalize(
    pool: &SqlitePool,
    actor: &AuthUser,
    repair_id: &str,
    now: DateTime<Utc>,
) -> ApiResult<InvoiceRow> {
    let repair = repairs::fetch(pool, repair_id).await?;
    if repair.owner_id != actor.id {
        return Err(ApiError::forbidden("Repair does not belong to you"));
    }
    if repairs::is_invoiced(pool, repair_id).await? {
        return Err(ApiError::AlreadyInvoiced(repair_id.to_string()));
    }

    let items = billable_items(repairs::items(pool, repair_id).await?);
    if items.is_empty() {
        return Err(ApiError::NothingApproved(repair_id.to_string()));
    }
    let total = total(&items);

    let mut tx = pool.begin().await?;
    let invoice_id = next_id(&mut *tx, Sequence::Invoice).await?;
    sqlx::query(
        r#"INSERT INTO invoices (id, repair_id, owner_id, owner, car, mechanic, items, total, finalized_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&invoice_id)
    .bind(repair_id)
    .bind(&repair.owner_id)
    .bind(&repair.owner)
    .bind(&repair.car)
    .bind(&repair.mechanic)
    .bind(Json(&items))
    .bind(total)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            ApiError::AlreadyInvoiced(repair_id.to_string())
        } else {
            ApiError::Store(err)
        }
    })?;

    sqlx::query("UPDATE repairs SET finished_user = 1 WHERE id = ?")
        .bind(repair_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    log::info!(
        "Invoice {invoice_id} issued for repair {repair_id}: {} item(s), total {total:.2}",
        items.len()
    );
    fetch(pool, &invoice_id).await
}

pub async fn fetch(pool: &SqlitePool, invoice_id: &str) -> ApiResult<InvoiceRow> {
    let query = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?");
    sqlx::query_as::<_, InvoiceRow>(&query)
        .bind(invoice_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::NotFound("Invoice"))
}

/// A customer sees only their own invoices.
pub async fn fetch_for_customer(
    pool: &SqlitePool,
    customer_id: &str,
    invoice_id: &str,
) -> ApiResult<InvoiceRow> {
    let invoice = fetch(pool, invoice_id).await?;
    if invoice.owner_id != customer_id {
        return Err(ApiError::forbidden("Invoice does not belong to you"));
    }
    Ok(invoice)
}

pub async fn for_customer(pool: &SqlitePool, customer_id: &str) -> ApiResult<Vec<InvoiceRow>> {
    let query = format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE owner_id = ? ORDER BY finalized_at DESC"
    );
    let rows = sqlx::query_as::<_, InvoiceRow>(&query)
        .bind(customer_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn list_all(pool: &SqlitePool) -> ApiResult<Vec<InvoiceRow>> {
    let query = format!("SELECT {INVOICE_COLUMNS} FROM invoices ORDER BY finalized_at DESC");
    let rows = sqlx::query_as::<_, InvoiceRow>(&query)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}
