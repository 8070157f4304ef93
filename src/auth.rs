use actix_web::{dev::ServiceRequest, web, Error, HttpMessage};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::Config,
    error::{ApiError, ApiResult},
    models::Role,
    state::AppState,
};

/// Caller identity placed in request extensions by the scope validators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed_hash = PasswordHash::new(password_hash);
    match parsed_hash {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

pub fn issue_token(config: &Config, subject: &str, role: Role) -> ApiResult<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: subject.to_string(),
        role,
        iat: now.timestamp(),
        exp: (now + Duration::hours(config.token_hours(role))).timestamp(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )?;
    Ok(token)
}

pub fn decode_token(token: &str, secret: &str) -> ApiResult<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

fn authorize(
    req: &ServiceRequest,
    credentials: Option<&BearerAuth>,
    allowed: &[Role],
) -> ApiResult<AuthUser> {
    let credentials = credentials.ok_or(ApiError::MissingToken)?;
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| ApiError::Internal("application state is not configured".into()))?;
    let claims = decode_token(credentials.token(), &state.config.jwt_secret)?;

    if !allowed.contains(&claims.role) {
        log::warn!(
            "{} {} (rank {}) denied on {}",
            claims.role.as_str(),
            claims.sub,
            claims.role.rank(),
            req.path()
        );
        return Err(ApiError::forbidden("Access denied. Insufficient permissions"));
    }

    Ok(AuthUser {
        id: claims.sub,
        role: claims.role,
    })
}

async fn role_validator(
    req: ServiceRequest,
    credentials: Option<BearerAuth>,
    allowed: &[Role],
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    match authorize(&req, credentials.as_ref(), allowed) {
        Ok(user) => {
            req.extensions_mut().insert(user);
            Ok(req)
        }
        Err(err) => Err((err.into(), req)),
    }
}

pub async fn customer_validator(
    req: ServiceRequest,
    credentials: Option<BearerAuth>,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    role_validator(req, credentials, &[Role::Customer]).await
}

pub async fn mechanic_validator(
    req: ServiceRequest,
    credentials: Option<BearerAuth>,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    role_validator(req, credentials, &[Role::Mechanic]).await
}

pub async fn manager_validator(
    req: ServiceRequest,
    credentials: Option<BearerAuth>,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    role_validator(req, credentials, &[Role::Manager]).await
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
