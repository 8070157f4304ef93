use std::{env, fs, path::Path, str::FromStr};

use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Executor, Sqlite, SqlitePool,
};

use crate::{
    auth::{hash_password, new_id},
    error::{ApiError, ApiResult},
};

/// Per-entity counters that back the human-readable identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    User,
    Mechanic,
    Manager,
    Car,
    Material,
    Appointment,
    Repair,
    Invoice,
}

impl Sequence {
    fn counter(self) -> &'static str {
        match self {
            Sequence::User => "user_id",
            Sequence::Mechanic => "mechanic_id",
            Sequence::Manager => "manager_id",
            Sequence::Car => "car_id",
            Sequence::Material => "material_id",
            Sequence::Appointment => "appointment_id",
            Sequence::Repair => "repair_id",
            Sequence::Invoice => "invoice_id",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Sequence::User => "CST",
            Sequence::Mechanic => "M",
            Sequence::Manager => "MGR",
            Sequence::Car => "C",
            Sequence::Material => "P",
            Sequence::Appointment => "A",
            Sequence::Repair => "R",
            Sequence::Invoice => "I",
        }
    }
}

pub fn format_id(sequence: Sequence, value: i64) -> String {
    format!("{}{:03}", sequence.prefix(), value)
}

/// Increments the counter and reads the new value in one statement.
pub async fn next_id<'e, E>(executor: E, sequence: Sequence) -> ApiResult<String>
where
    E: Executor<'e, Database = Sqlite>,
{
    let value = sqlx::query_scalar::<_, i64>(
        "UPDATE counters SET value = value + 1 WHERE name = ? RETURNING value",
    )
    .bind(sequence.counter())
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| {
        ApiError::Internal(format!("the sequence {} does not exist", sequence.counter()))
    })?;

    Ok(format_id(sequence, value))
}

pub async fn connect(db_url: &str) -> Result<SqlitePool, Box<dyn std::error::Error>> {
    ensure_sqlite_dir(db_url)?;

    let connect_options = SqliteConnectOptions::from_str(db_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else if let Some(path) = db_url.strip_prefix("sqlite:") {
        Some(path)
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub async fn seed_defaults(pool: &SqlitePool) -> ApiResult<()> {
    let existing = sqlx::query_scalar::<_, String>("SELECT id FROM managers LIMIT 1")
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Ok(());
    }

    let contact = env::var("MANAGER_CONTACT").unwrap_or_else(|_| "0000000000".to_string());
    let password = env::var("MANAGER_PASSWORD").unwrap_or_else(|_| "manager".to_string());
    let email = env::var("MANAGER_EMAIL").ok();
    let firstname = env::var("MANAGER_FIRSTNAME").unwrap_or_else(|_| "Garage".to_string());
    let lastname = env::var("MANAGER_LASTNAME").unwrap_or_else(|_| "Manager".to_string());

    if password == "manager" {
        log::warn!("MANAGER_PASSWORD not set. Using default password 'manager'. Set MANAGER_PASSWORD in production.");
    }

    let password_hash = hash_password(&password)?;
    let id = next_id(pool, Sequence::Manager).await?;

    sqlx::query(
        r#"INSERT INTO managers (id, firstname, lastname, email, contact, password_hash, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(firstname)
    .bind(lastname)
    .bind(email)
    .bind(contact)
    .bind(password_hash)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    log::info!("Seeded default manager {id}");
    Ok(())
}

pub async fn log_activity(
    pool: &SqlitePool,
    kind: &str,
    message: &str,
    actor_id: Option<&str>,
    appointment_id: Option<&str>,
) {
    let result = sqlx::query(
        r#"INSERT INTO activities (id, kind, message, actor_id, appointment_id, created_at)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(kind)
    .bind(message)
    .bind(actor_id)
    .bind(appointment_id)
    .bind(Utc::now())
    .execute(pool)
    .await;

    if let Err(err) = result {
        log::warn!("Failed to record activity {kind}: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::setup_test_db;

    #[test]
    fn ids_are_prefixed_and_zero_padded() {
        assert_eq!(format_id(Sequence::Appointment, 1), "A001");
        assert_eq!(format_id(Sequence::Repair, 14), "R014");
        assert_eq!(format_id(Sequence::User, 7), "CST007");
        assert_eq!(format_id(Sequence::Invoice, 1234), "I1234");
    }

    #[actix_web::test]
    async fn next_id_is_sequential_per_entity() {
        let pool = setup_test_db().await;

        assert_eq!(next_id(&pool, Sequence::Invoice).await.unwrap(), "I001");
        assert_eq!(next_id(&pool, Sequence::Invoice).await.unwrap(), "I002");
        assert_eq!(next_id(&pool, Sequence::Repair).await.unwrap(), "R001");
    }

    #[actix_web::test]
    async fn seeding_creates_a_single_manager() {
        let pool = setup_test_db().await;

        seed_defaults(&pool).await.unwrap();
        seed_defaults(&pool).await.unwrap();

        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM managers")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn memory_urls_need_no_directory() {
        assert!(ensure_sqlite_dir("sqlite::memory:").is_ok());
        assert!(ensure_sqlite_dir("postgres://localhost/garage").is_ok());
    }
}
