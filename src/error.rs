use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Which side of a booking made the requested slot unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotConflict {
    Blackout,
    MechanicBooked,
    CustomerBooked,
}

impl std::fmt::Display for SlotConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            SlotConflict::Blackout => "This time slot is not available for this mechanic",
            SlotConflict::MechanicBooked => "Mechanic already has a booking at this time",
            SlotConflict::CustomerBooked => "Customer already has an appointment at this time",
        };
        f.write_str(message)
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    SlotConflict(SlotConflict),

    #[error("{0}")]
    DuplicateKey(String),

    #[error("Repair {0} already has an invoice")]
    AlreadyInvoiced(String),

    #[error("Repair {0} is invoiced and can no longer be changed")]
    RepairFinalized(String),

    #[error("Repair {0} has no reparation approved by both parties")]
    NothingApproved(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Missing authorization token")]
    MissingToken,

    #[error("Invalid authorization token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("{0}")]
    Forbidden(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "INVALID",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::SlotConflict(SlotConflict::Blackout) => "SLOT_BLACKOUT",
            ApiError::SlotConflict(SlotConflict::MechanicBooked) => "MECHANIC_BOOKED",
            ApiError::SlotConflict(SlotConflict::CustomerBooked) => "CUSTOMER_BOOKED",
            ApiError::DuplicateKey(_) => "DUPLICATE_KEY",
            ApiError::AlreadyInvoiced(_) => "ALREADY_INVOICED",
            ApiError::RepairFinalized(_) => "REPAIR_FINALIZED",
            ApiError::NothingApproved(_) => "NOTHING_APPROVED",
            ApiError::InvalidCredentials => "INVALID_CREDENTIALS",
            ApiError::MissingToken => "MISSING_TOKEN",
            ApiError::InvalidToken => "INVALID_TOKEN",
            ApiError::TokenExpired => "TOKEN_EXPIRED",
            ApiError::Forbidden(_) => "NOT_AUTHORIZED",
            ApiError::Store(_) => "SERVER_ERROR",
            ApiError::Internal(_) => "SERVER_ERROR",
        }
    }

    /// Maps a unique-index violation to `DuplicateKey`, everything else to `Store`.
    pub fn from_insert(err: sqlx::Error, duplicate_message: &str) -> Self {
        if is_unique_violation(&err) {
            ApiError::DuplicateKey(duplicate_message.to_string())
        } else {
            ApiError::Store(err)
        }
    }
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

impl From<argon2::password_hash::Error> for ApiError {
    fn from(err: argon2::password_hash::Error) -> Self {
        ApiError::Internal(format!("password hash: {err}"))
    }
}

impl From<jsonwebtoken::errors::Error> for ApiError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => ApiError::TokenExpired,
            _ => ApiError::InvalidToken,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::NothingApproved(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::SlotConflict(_)
            | ApiError::DuplicateKey(_)
            | ApiError::AlreadyInvoiced(_)
            | ApiError::RepairFinalized(_) => StatusCode::CONFLICT,
            ApiError::InvalidCredentials
            | ApiError::MissingToken
            | ApiError::InvalidToken
            | ApiError::TokenExpired => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Store(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            ApiError::Store(err) => {
                log::error!("Store error: {err}");
                "Internal Error".to_string()
            }
            ApiError::Internal(err) => {
                log::error!("Internal error: {err}");
                "Internal Error".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({
            "error": message,
            "code": self.code(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn slot_conflicts_map_to_409_with_side_specific_codes() {
        let err = ApiError::SlotConflict(SlotConflict::CustomerBooked);
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["code"], "CUSTOMER_BOOKED");
        assert_eq!(
            value["error"],
            "Customer already has an appointment at this time"
        );
    }

    #[actix_web::test]
    async fn store_errors_are_opaque() {
        let err = ApiError::Store(sqlx::Error::RowNotFound);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "Internal Error");
    }

    #[test]
    fn statuses_follow_the_error_taxonomy() {
        assert_eq!(
            ApiError::validation("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound("Repair").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::AlreadyInvoiced("R001".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(ApiError::TokenExpired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::forbidden("no").status_code(),
            StatusCode::FORBIDDEN
        );
    }
}
