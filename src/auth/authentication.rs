use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use sqlx::{Pool, Sqlite};
use tracing::{Instrument, instrument};

use crate::db::{authenticate_user, get_session_by_token, get_user_by_id};
use crate::error::AppError;
use crate::validation::{ToValidationResponse, ValidationResponse};

use super::{ALL_ROLES, Role, User};

pub const SESSION_COOKIE: &str = "session_token";

/// Authenticates by username or email; any mismatch is an invalid-credentials error.
pub async fn login(
    pool: &Pool<Sqlite>,
    username_or_email: &str,
    password: &str,
) -> Result<User, AppError> {
    let found = if username_or_email.is_empty() || password.is_empty() {
        None
    } else {
        authenticate_user(pool, username_or_email, password).await?
    };

    match found {
        Some(user) => {
            tracing::info!(user_id = user.user_id, "Login succeeded");
            Ok(user)
        }
        None => Err(AppError::Authentication(
            "Invalid username or password".to_string(),
        )),
    }
}

/// Resolves `user_id` and checks its role against `allowed_roles`.
#[instrument(skip(pool))]
pub async fn authorize(
    pool: &Pool<Sqlite>,
    user_id: i64,
    allowed_roles: &[Role],
) -> Result<User, AppError> {
    let user = match get_user_by_id(pool, user_id).await? {
        Some(user) => user,
        None => {
            return Err(AppError::Authentication("User not found".to_string()));
        }
    };

    user.require_role(allowed_roles)?;

    Ok(user)
}

/// Session token from the `Authorization: Bearer` header, else the private cookie.
pub fn session_token(request: &Request<'_>) -> Option<String> {
    let bearer = request
        .headers()
        .get_one("Authorization")
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    bearer.or_else(|| {
        request
            .cookies()
            .get_private(SESSION_COOKIE)
            .map(|c| c.value().to_string())
    })
}

async fn resolve_session_user(pool: &Pool<Sqlite>, token: &str) -> Result<User, AppError> {
    let session = get_session_by_token(pool, token).await?;

    if !session.is_valid() {
        return Err(AppError::Authentication("Session expired".to_string()));
    }

    authorize(pool, session.user_id, ALL_ROLES).await
}

async fn authenticate_request(request: &Request<'_>) -> Outcome<User, AppError> {
    let Some(token) = session_token(request) else {
        return Outcome::Error((
            Status::Unauthorized,
            AppError::Authentication("Authentication required".to_string()),
        ));
    };

    let pool = match request.rocket().state::<Pool<Sqlite>>() {
        Some(pool) => pool,
        None => {
            tracing::error!("Database pool not found in managed state");
            return Outcome::Error((
                Status::InternalServerError,
                AppError::Internal("Database pool not managed".to_string()),
            ));
        }
    };

    match resolve_session_user(pool, &token).await {
        Ok(user) => {
            tracing::info!(username = %user.username, role = %user.role, "User authenticated via session token");
            Outcome::Success(user)
        }
        Err(err) => {
            err.log_and_record("Session guard");
            Outcome::Error((err.status_code(), err))
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = AppError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        authenticate_request(request)
            .instrument(tracing::info_span!("user_auth_guard"))
            .await
    }
}

/// The presented session token, if any, without validating it.
pub struct SessionToken(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SessionToken {
    type Error = std::convert::Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(SessionToken(session_token(request)))
    }
}

#[catch(400)]
pub fn bad_request_api() -> Custom<Json<ValidationResponse>> {
    Status::BadRequest.to_validation_response()
}

#[catch(401)]
pub fn unauthorized_api() -> Custom<Json<ValidationResponse>> {
    Status::Unauthorized.to_validation_response()
}

#[catch(403)]
pub fn forbidden_api() -> Custom<Json<ValidationResponse>> {
    Status::Forbidden.to_validation_response()
}

#[catch(404)]
pub fn not_found_api() -> Custom<Json<ValidationResponse>> {
    Status::NotFound.to_validation_response()
}

#[catch(422)]
pub fn unprocessable_api() -> Custom<Json<ValidationResponse>> {
    Status::UnprocessableEntity.to_validation_response()
}

#[catch(500)]
pub fn internal_error_api() -> Custom<Json<ValidationResponse>> {
    Status::InternalServerError.to_validation_response()
}
