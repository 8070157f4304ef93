use std::env;

use crate::models::Role;

const DEV_JWT_SECRET: &str = "garage-desk-dev-secret";

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub jwt_secret: String,
    pub customer_token_hours: i64,
    pub mechanic_token_hours: i64,
    pub manager_token_hours: i64,
}

impl Config {
    /// Reads the process environment, after loading `.env` if one exists.
    pub fn from_env() -> Self {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                log::warn!("Could not load .env file: {err}");
            }
        }

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            log::warn!("JWT_SECRET not set. Using a development secret. Set JWT_SECRET in production.");
            DEV_JWT_SECRET.to_string()
        });

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://./data/garage.db".to_string()),
            port: parse_env("PORT", 8080),
            jwt_secret,
            customer_token_hours: parse_env("CUSTOMER_TOKEN_HOURS", 5),
            mechanic_token_hours: parse_env("MECHANIC_TOKEN_HOURS", 20),
            manager_token_hours: parse_env("MANAGER_TOKEN_HOURS", 5),
        }
    }

    pub fn token_hours(&self, role: Role) -> i64 {
        match role {
            Role::Customer => self.customer_token_hours,
            Role::Mechanic => self.mechanic_token_hours,
            Role::Manager => self.manager_token_hours,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            port: 0,
            jwt_secret: "test-secret".to_string(),
            customer_token_hours: 5,
            mechanic_token_hours: 20,
            manager_token_hours: 5,
        }
    }
}
