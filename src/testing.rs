//! Fixtures shared by the test modules.

use chrono::{Duration, NaiveDate, Utc};
use sqlx::{sqlite::SqlitePoolOptions, types::Json, SqlitePool};

use crate::{
    auth::{new_id, AuthUser},
    config::Config,
    db::{next_id, run_migrations, Sequence},
    models::{CarSnapshot, CustomerSnapshot, MechanicSnapshot, Problem, Role},
    scheduling::{at_wall_clock, parse_wall_clock, Window},
    state::AppState,
};

/// Placeholder hash for seeded accounts that never log in.
const SEED_PASSWORD_HASH: &str = "not-a-password-hash";

pub struct Seed {
    pub customer_id: String,
    pub other_customer_id: String,
    pub mechanic_id: String,
    pub other_mechanic_id: String,
    pub manager_id: String,
    pub car_id: String,
    pub other_car_id: String,
}

/// One in-memory connection that lives as long as the pool.
pub async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None::<std::time::Duration>)
        .max_lifetime(None::<std::time::Duration>)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database");
    run_migrations(&pool).await.expect("migrations");
    pool
}

pub async fn test_state() -> AppState {
    AppState::new(setup_test_db().await, Config::for_tests())
}

pub fn future_day(days: i64) -> NaiveDate {
    (Utc::now() + Duration::days(days)).date_naive()
}

pub fn window(day: NaiveDate, start: &str, end: &str) -> Window {
    let start = parse_wall_clock(start).expect("start time");
    let end = parse_wall_clock(end).expect("end time");
    (at_wall_clock(day, start), at_wall_clock(day, end))
}

async fn insert_customer(pool: &SqlitePool, firstname: &str, contact: &str) -> String {
    let id = next_id(pool, Sequence::User).await.unwrap();
    sqlx::query(
        r#"INSERT INTO users (id, firstname, lastname, contact, email, password_hash, created_at)
           VALUES (?, ?, 'Test', ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(firstname)
    .bind(contact)
    .bind(format!("{}@example.com", firstname.to_lowercase()))
    .bind(SEED_PASSWORD_HASH)
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap();
    id
}

async fn insert_mechanic(pool: &SqlitePool, firstname: &str, contact: &str) -> String {
    let id = next_id(pool, Sequence::Mechanic).await.unwrap();
    sqlx::query(
        r#"INSERT INTO mechanics (id, firstname, lastname, contact, password_hash, created_at)
           VALUES (?, ?, 'Wrench', ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(firstname)
    .bind(contact)
    .bind(SEED_PASSWORD_HASH)
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap();
    id
}

async fn insert_car(pool: &SqlitePool, owner_id: &str, vin: &str) -> String {
    let id = next_id(pool, Sequence::Car).await.unwrap();
    sqlx::query(
        r#"INSERT INTO cars (id, owner_id, brand, model, year, vin, created_at)
           VALUES (?, ?, 'Peugeot', '208', 2019, ?, ?)"#,
    )
    .bind(&id)
    .bind(owner_id)
    .bind(vin)
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap();
    id
}

pub async fn seed_test_data(pool: &SqlitePool) -> Seed {
    let customer_id = insert_customer(pool, "Rija", "0340000001").await;
    let other_customer_id = insert_customer(pool, "Hery", "0340000002").await;
    let mechanic_id = insert_mechanic(pool, "Tovo", "0330000001").await;
    let other_mechanic_id = insert_mechanic(pool, "Fara", "0330000002").await;
    let car_id = insert_car(pool, &customer_id, "VF3XXXXXXXX000001").await;
    let other_car_id = insert_car(pool, &other_customer_id, "VF3XXXXXXXX000002").await;

    let manager_id = next_id(pool, Sequence::Manager).await.unwrap();
    sqlx::query(
        r#"INSERT INTO managers (id, firstname, lastname, contact, password_hash, created_at)
           VALUES (?, 'Lova', 'Boss', '0320000001', ?, ?)"#,
    )
    .bind(&manager_id)
    .bind(SEED_PASSWORD_HASH)
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap();

    Seed {
        customer_id,
        other_customer_id,
        mechanic_id,
        other_mechanic_id,
        manager_id,
        car_id,
        other_car_id,
    }
}

pub fn customer(seed: &Seed) -> AuthUser {
    AuthUser {
        id: seed.customer_id.clone(),
        role: Role::Customer,
    }
}

pub fn mechanic(seed: &Seed) -> AuthUser {
    AuthUser {
        id: seed.mechanic_id.clone(),
        role: Role::Mechanic,
    }
}

pub fn manager(seed: &Seed) -> AuthUser {
    AuthUser {
        id: seed.manager_id.clone(),
        role: Role::Manager,
    }
}

pub async fn add_blackout(pool: &SqlitePool, mechanic_id: &str, day: NaiveDate, start: &str, end: &str) {
    sqlx::query(
        "INSERT INTO unavailable_slots (id, mechanic_id, date, start_time, end_time) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(new_id())
    .bind(mechanic_id)
    .bind(day)
    .bind(start)
    .bind(end)
    .execute(pool)
    .await
    .unwrap();
}

/// Books the seed customer's car with the seed mechanic, bypassing the checks.
pub async fn insert_appointment(
    pool: &SqlitePool,
    seed: &Seed,
    day: NaiveDate,
    start: &str,
    end: &str,
) -> String {
    let id = next_id(pool, Sequence::Appointment).await.unwrap();
    let (start_time, end_time) = window(day, start, end);
    let customer = CustomerSnapshot {
        id: seed.customer_id.clone(),
        firstname: "Rija".to_string(),
        lastname: "Test".to_string(),
        contact: "0340000001".to_string(),
        email: "rija@example.com".to_string(),
    };
    let car = CarSnapshot {
        id: seed.car_id.clone(),
        owner: seed.customer_id.clone(),
        brand: "Peugeot".to_string(),
        model: "208".to_string(),
        year: 2019,
        vin: "VF3XXXXXXXX000001".to_string(),
    };
    let mechanic = MechanicSnapshot {
        id: seed.mechanic_id.clone(),
        firstname: "Tovo".to_string(),
        lastname: "Wrench".to_string(),
        contact: "0330000001".to_string(),
    };
    let problems = vec![Problem {
        material: None,
        description: "Engine noise".to_string(),
    }];

    sqlx::query(
        r#"INSERT INTO appointments
           (id, customer_id, customer, car, mechanic_id, mechanic, date, start_time, end_time,
            location, problems, mechanic_approved, user_approved, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'Garage', ?, 0, 1, ?)"#,
    )
    .bind(&id)
    .bind(&seed.customer_id)
    .bind(Json(customer))
    .bind(Json(car))
    .bind(&seed.mechanic_id)
    .bind(Json(mechanic))
    .bind(day)
    .bind(start_time)
    .bind(end_time)
    .bind(Json(problems))
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap();
    id
}
