use serde::Serialize;
use sqlx::SqlitePool;

use crate::{error::ApiResult, models::ActivityRow};

const RECENT_ACTIVITY_LIMIT: i64 = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyRevenue {
    pub month: String,
    pub invoices: i64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub appointments: i64,
    pub awaiting_mechanic: i64,
    pub confirmed: i64,
    pub ongoing_repairs: i64,
    pub invoices: i64,
    pub revenue: f64,
    pub revenue_by_month: Vec<MonthlyRevenue>,
}

async fn count(pool: &SqlitePool, query: &str) -> ApiResult<i64> {
    Ok(sqlx::query_scalar::<_, i64>(query).fetch_one(pool).await?)
}

pub async fn stats(pool: &SqlitePool) -> ApiResult<DashboardStats> {
    let appointments = count(pool, "SELECT COUNT(*) FROM appointments").await?;
    let awaiting_mechanic =
        count(pool, "SELECT COUNT(*) FROM appointments WHERE mechanic_approved = 0").await?;
    let confirmed = count(
        pool,
        "SELECT COUNT(*) FROM appointments WHERE mechanic_approved = 1 AND user_approved = 1",
    )
    .await?;
    let ongoing_repairs = count(pool, "SELECT COUNT(*) FROM repairs WHERE finished_user = 0").await?;

    let revenue_by_month = revenue_by_month(pool).await?;
    let invoices = revenue_by_month.iter().map(|month| month.invoices).sum();
    let revenue = revenue_by_month.iter().map(|month| month.total).sum();

    Ok(DashboardStats {
        appointments,
        awaiting_mechanic,
        confirmed,
        ongoing_repairs,
        invoices,
        revenue,
        revenue_by_month,
    })
}

/// Invoice totals grouped by `YYYY-MM` of the finalize date, oldest month first.
pub async fn revenue_by_month(pool: &SqlitePool) -> ApiResult<Vec<MonthlyRevenue>> {
    let rows = sqlx::query_as::<_, (String, i64, f64)>(
        r#"SELECT substr(finalized_at, 1, 7) AS month, COUNT(*), COALESCE(SUM(total), 0.0)
           FROM invoices
           GROUP BY month
           ORDER BY month"#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(month, invoices, total)| MonthlyRevenue {
            month,
            invoices,
            total,
        })
        .collect())
}

pub async fn recent_activity(pool: &SqlitePool) -> ApiResult<Vec<ActivityRow>> {
    let rows = sqlx::query_as::<_, ActivityRow>(
        r#"SELECT kind, message, actor_id, appointment_id, created_at
           FROM activities
           ORDER BY created_at DESC
           LIMIT ?"#,
    )
    .bind(RECENT_ACTIVITY_LIMIT)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
