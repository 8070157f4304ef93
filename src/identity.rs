//! Customers, mechanics and managers: registration, login and profile lookup.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, SqlitePool};

use crate::{
    auth::{hash_password, issue_token, verify_password},
    config::Config,
    db::{next_id, Sequence},
    error::{ApiError, ApiResult},
    models::{Address, ManagerRow, MechanicRow, Role, UserRow},
    scheduling::parse_wall_clock,
};

const USER_COLUMNS: &str = "id, firstname, lastname, contact, email, password_hash, address, created_at";
const MECHANIC_COLUMNS: &str =
    "id, firstname, lastname, email, contact, password_hash, specialities, min_hour, max_hour, created_at";
const MANAGER_COLUMNS: &str = "id, firstname, lastname, email, contact, password_hash, created_at";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterUser {
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub address: Option<Address>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterMechanic {
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(default)]
    pub contact: String,
    pub email: Option<String>,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub speciality: Vec<String>,
    pub min_hour: Option<String>,
    pub max_hour: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterManager {
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(default)]
    pub contact: String,
    pub email: Option<String>,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionUser {
    pub id: String,
    pub firstname: String,
    pub lastname: String,
    pub contact: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub role: Role,
    pub user: SessionUser,
}

fn require_names(firstname: &str, lastname: &str, contact: &str, password: &str) -> Vec<&'static str> {
    let mut errors = Vec::new();
    if firstname.trim().is_empty() {
        errors.push("First name is required.");
    }
    if lastname.trim().is_empty() {
        errors.push("Last name is required.");
    }
    if contact.trim().is_empty() {
        errors.push("Contact is required.");
    }
    if password.is_empty() {
        errors.push("Password is required.");
    }
    errors
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub async fn register_user(pool: &SqlitePool, request: RegisterUser) -> ApiResult<UserRow> {
    let mut errors = require_names(
        &request.firstname,
        &request.lastname,
        &request.contact,
        &request.password,
    );
    if !request.email.contains('@') {
        errors.push("A valid email is required.");
    }
    if !errors.is_empty() {
        return Err(ApiError::validation(errors.join(" ")));
    }

    let password_hash = hash_password(&request.password)?;
    let id = next_id(pool, Sequence::User).await?;
    sqlx::query(
        r#"INSERT INTO users (id, firstname, lastname, contact, email, password_hash, address, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(request.firstname.trim())
    .bind(request.lastname.trim())
    .bind(request.contact.trim())
    .bind(request.email.trim().to_lowercase())
    .bind(password_hash)
    .bind(request.address.map(Json))
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(|err| ApiError::from_insert(err, "User already exists"))?;

    log::info!("Registered customer {id}");
    fetch_user(pool, &id).await
}

pub async fn register_mechanic(pool: &SqlitePool, request: RegisterMechanic) -> ApiResult<MechanicRow> {
    let errors = require_names(
        &request.firstname,
        &request.lastname,
        &request.contact,
        &request.password,
    );
    if !errors.is_empty() {
        return Err(ApiError::validation(errors.join(" ")));
    }
    let min_hour = blank_to_none(request.min_hour).unwrap_or_else(|| "08:00".to_string());
    let max_hour = blank_to_none(request.max_hour).unwrap_or_else(|| "17:00".to_string());
    if parse_wall_clock(&min_hour).is_none() || parse_wall_clock(&max_hour).is_none() {
        return Err(ApiError::validation("Working hours must be HH:MM"));
    }

    let password_hash = hash_password(&request.password)?;
    let id = next_id(pool, Sequence::Mechanic).await?;
    sqlx::query(
        r#"INSERT INTO mechanics
           (id, firstname, lastname, email, contact, password_hash, specialities, min_hour, max_hour, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(request.firstname.trim())
    .bind(request.lastname.trim())
    .bind(blank_to_none(request.email))
    .bind(request.contact.trim())
    .bind(password_hash)
    .bind(Json(request.speciality))
    .bind(min_hour)
    .bind(max_hour)
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(|err| ApiError::from_insert(err, "Mechanic already exists"))?;

    log::info!("Registered mechanic {id}");
    fetch_mechanic(pool, &id).await
}

pub async fn register_manager(pool: &SqlitePool, request: RegisterManager) -> ApiResult<ManagerRow> {
    let errors = require_names(
        &request.firstname,
        &request.lastname,
        &request.contact,
        &request.password,
    );
    if !errors.is_empty() {
        return Err(ApiError::validation(errors.join(" ")));
    }

    let password_hash = hash_password(&request.password)?;
    let id = next_id(pool, Sequence::Manager).await?;
    sqlx::query(
        r#"INSERT INTO managers (id, firstname, lastname, email, contact, password_hash, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(request.firstname.trim())
    .bind(request.lastname.trim())
    .bind(blank_to_none(request.email))
    .bind(request.contact.trim())
    .bind(password_hash)
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(|err| ApiError::from_insert(err, "Manager already exists"))?;

    log::info!("Registered manager {id}");
    fetch_manager(pool, &id).await
}

pub async fn fetch_user(pool: &SqlitePool, id: &str) -> ApiResult<UserRow> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
    sqlx::query_as::<_, UserRow>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::NotFound("User"))
}

pub async fn fetch_mechanic(pool: &SqlitePool, id: &str) -> ApiResult<MechanicRow> {
    let query = format!("SELECT {MECHANIC_COLUMNS} FROM mechanics WHERE id = ?");
    sqlx::query_as::<_, MechanicRow>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::NotFound("Mechanic"))
}

pub async fn fetch_manager(pool: &SqlitePool, id: &str) -> ApiResult<ManagerRow> {
    let query = format!("SELECT {MANAGER_COLUMNS} FROM managers WHERE id = ?");
    sqlx::query_as::<_, ManagerRow>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::NotFound("Manager"))
}

pub async fn list_mechanics(pool: &SqlitePool) -> ApiResult<Vec<MechanicRow>> {
    let query = format!("SELECT {MECHANIC_COLUMNS} FROM mechanics ORDER BY lastname, firstname");
    let rows = sqlx::query_as::<_, MechanicRow>(&query)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Unknown contact and wrong password are indistinguishable to the caller.
pub async fn login(
    pool: &SqlitePool,
    config: &Config,
    role: Role,
    request: &LoginRequest,
) -> ApiResult<Session> {
    let contact = request.contact.trim();
    if contact.is_empty() || request.password.is_empty() {
        return Err(ApiError::validation("Contact and password are required"));
    }

    let table = match role {
        Role::Customer => "users",
        Role::Mechanic => "mechanics",
        Role::Manager => "managers",
    };
    let query = format!(
        "SELECT id, firstname, lastname, contact, email, password_hash FROM {table} WHERE contact = ?"
    );
    let row = sqlx::query_as::<_, (String, String, String, String, Option<String>, String)>(&query)
        .bind(contact)
        .fetch_optional(pool)
        .await?;

    let Some((id, firstname, lastname, contact, email, password_hash)) = row else {
        log::debug!("{} login for unknown contact", role.as_str());
        return Err(ApiError::InvalidCredentials);
    };
    if !verify_password(&request.password, &password_hash) {
        log::debug!("{} login for {id} with a wrong password", role.as_str());
        return Err(ApiError::InvalidCredentials);
    }

    let token = issue_token(config, &id, role)?;
    Ok(Session {
        token,
        role,
        user: SessionUser {
            id,
            firstname,
            lastname,
            contact,
            email,
        },
    })
}
