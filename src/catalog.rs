//! Customer cars, garage materials and mechanic blackout windows.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{
    auth::new_id,
    db::{next_id, Sequence},
    error::{ApiError, ApiResult},
    identity::fetch_mechanic,
    models::{CarRow, MaterialRow, TimeSlot, UnavailableDay, UnavailableSlotRow},
    scheduling::parse_wall_clock,
};

const CAR_COLUMNS: &str = "id, owner_id, brand, model, year, vin, created_at";
const MATERIAL_COLUMNS: &str = "id, name, brand, model, price, created_at";

/// Oldest model year accepted for a car.
const FIRST_MODEL_YEAR: i64 = 1900;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCar {
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub model: String,
    pub year: Option<i64>,
    #[serde(default)]
    pub vin: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewMaterial {
    #[serde(default)]
    pub name: String,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBlackout {
    pub date: NaiveDate,
    pub start: String,
    pub end: String,
}

pub async fn add_car(pool: &SqlitePool, owner_id: &str, car: NewCar) -> ApiResult<CarRow> {
    let mut errors = Vec::new();
    if car.brand.trim().is_empty() {
        errors.push("Brand is required.");
    }
    if car.model.trim().is_empty() {
        errors.push("Model is required.");
    }
    if car.vin.trim().is_empty() {
        errors.push("VIN is required.");
    }
    let latest_year = i64::from(Utc::now().year()) + 1;
    match car.year {
        Some(year) if (FIRST_MODEL_YEAR..=latest_year).contains(&year) => {}
        Some(_) => errors.push("Year is out of range."),
        None => errors.push("Year is required."),
    }
    if !errors.is_empty() {
        return Err(ApiError::validation(errors.join(" ")));
    }

    let id = next_id(pool, Sequence::Car).await?;
    sqlx::query(
        r#"INSERT INTO cars (id, owner_id, brand, model, year, vin, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(owner_id)
    .bind(car.brand.trim())
    .bind(car.model.trim())
    .bind(car.year)
    .bind(car.vin.trim().to_uppercase())
    .bind(Utc::now())
    .execute(pool)
    .await?;

    fetch_car(pool, &id).await
}

pub async fn fetch_car(pool: &SqlitePool, car_id: &str) -> ApiResult<CarRow> {
    let query = format!("SELECT {CAR_COLUMNS} FROM cars WHERE id = ?");
    sqlx::query_as::<_, CarRow>(&query)
        .bind(car_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::NotFound("Vehicle"))
}

pub async fn list_cars(pool: &SqlitePool, owner_id: &str) -> ApiResult<Vec<CarRow>> {
    let query = format!("SELECT {CAR_COLUMNS} FROM cars WHERE owner_id = ? ORDER BY created_at");
    let rows = sqlx::query_as::<_, CarRow>(&query)
        .bind(owner_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn create_material(pool: &SqlitePool, material: NewMaterial) -> ApiResult<MaterialRow> {
    let name = material.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("Material name is required"));
    }
    let price = match material.price {
        Some(price) if price > 0.0 => price,
        _ => return Err(ApiError::validation("Material price must be positive")),
    };

    let id = next_id(pool, Sequence::Material).await?;
    sqlx::query(
        r#"INSERT INTO materials (id, name, brand, model, price, created_at)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(name)
    .bind(material.brand)
    .bind(material.model)
    .bind(price)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    let query = format!("SELECT {MATERIAL_COLUMNS} FROM materials WHERE id = ?");
    let row = sqlx::query_as::<_, MaterialRow>(&query)
        .bind(&id)
        .fetch_one(pool)
        .await?;
    Ok(row)
}

pub async fn list_materials(pool: &SqlitePool) -> ApiResult<Vec<MaterialRow>> {
    let query = format!("SELECT {MATERIAL_COLUMNS} FROM materials ORDER BY name");
    let rows = sqlx::query_as::<_, MaterialRow>(&query)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn add_blackout(
    pool: &SqlitePool,
    mechanic_id: &str,
    blackout: NewBlackout,
) -> ApiResult<UnavailableSlotRow> {
    let (Some(start), Some(end)) = (parse_wall_clock(&blackout.start), parse_wall_clock(&blackout.end))
    else {
        return Err(ApiError::validation("Blackout times must be HH:MM"));
    };
    if start >= end {
        return Err(ApiError::validation("End time must be after start time"));
    }
    fetch_mechanic(pool, mechanic_id).await?;

    let row = UnavailableSlotRow {
        id: new_id(),
        mechanic_id: mechanic_id.to_string(),
        date: blackout.date,
        start_time: start.format("%H:%M").to_string(),
        end_time: end.format("%H:%M").to_string(),
    };
    sqlx::query(
        "INSERT INTO unavailable_slots (id, mechanic_id, date, start_time, end_time) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&row.id)
    .bind(&row.mechanic_id)
    .bind(row.date)
    .bind(&row.start_time)
    .bind(&row.end_time)
    .execute(pool)
    .await?;

    Ok(row)
}

pub async fn remove_blackout(pool: &SqlitePool, mechanic_id: &str, slot_id: &str) -> ApiResult<()> {
    let result = sqlx::query("DELETE FROM unavailable_slots WHERE id = ? AND mechanic_id = ?")
        .bind(slot_id)
        .bind(mechanic_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("Unavailable slot"));
    }
    Ok(())
}

/// Blackouts from `today` on, grouped per day, days and slots in ascending order.
pub async fn unavailable_days(
    pool: &SqlitePool,
    mechanic_id: &str,
    today: NaiveDate,
) -> ApiResult<Vec<UnavailableDay>> {
    fetch_mechanic(pool, mechanic_id).await?;

    let rows = sqlx::query_as::<_, UnavailableSlotRow>(
        r#"SELECT id, mechanic_id, date, start_time, end_time
           FROM unavailable_slots
           WHERE mechanic_id = ? AND date >= ?
           ORDER BY date, start_time"#,
    )
    .bind(mechanic_id)
    .bind(today)
    .fetch_all(pool)
    .await?;

    let mut days: BTreeMap<NaiveDate, Vec<TimeSlot>> = BTreeMap::new();
    for row in rows {
        days.entry(row.date).or_default().push(TimeSlot {
            id: row.id,
            start: row.start_time,
            end: row.end_time,
        });
    }

    Ok(days
        .into_iter()
        .map(|(date, time_slots)| UnavailableDay { date, time_slots })
        .collect())
}
