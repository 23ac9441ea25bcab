use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tracing::Instrument;

use crate::db::{get_session_by_token, get_user};
use crate::error::AppError;

use super::User;

pub const SESSION_COOKIE: &str = "session_token";

fn session_token(request: &Request<'_>) -> Option<String> {
    if let Some(cookie) = request.cookies().get_private(SESSION_COOKIE) {
        return Some(cookie.value().to_string());
    }

    request
        .headers()
        .get_one("Authorization")
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        authenticate(request)
            .instrument(tracing::info_span!("user_auth_guard"))
            .await
    }
}

async fn authenticate(request: &Request<'_>) -> Outcome<User, ()> {
    let Some(token) = session_token(request) else {
        return Outcome::Error((Status::Unauthorized, ()));
    };

    let db = match request.rocket().state::<SqlitePool>() {
        Some(pool) => pool,
        _ => {
            tracing::error!("Database pool not found in managed state");
            return Outcome::Error((Status::InternalServerError, ()));
        }
    };

    let session = match get_session_by_token(db, &token).await {
        Ok(session) => session,
        Err(AppError::Database(err)) => {
            tracing::error!(error = %err, "Failed to look up session token");
            return Outcome::Error((Status::InternalServerError, ()));
        }
        Err(err) => {
            tracing::warn!(error = ?err, "Invalid session token");
            return Outcome::Error((Status::Unauthorized, ()));
        }
    };

    if !session.is_valid() {
        tracing::warn!(user_id = %session.user_id, "Session token expired");
        return Outcome::Error((Status::Unauthorized, ()));
    }

    match get_user(db, session.user_id).await {
        Ok(user) if user.banned => {
            tracing::warn!(username = %user.username, "Banned user rejected");
            Outcome::Error((Status::Forbidden, ()))
        }
        Ok(user) => {
            tracing::info!(username = %user.username, role = %user.role.as_str(), "User authenticated via session token");
            Outcome::Success(user)
        }
        Err(err) => {
            tracing::error!(user_id = %session.user_id, error = ?err, "Failed to fetch user for valid session");
            Outcome::Error((Status::InternalServerError, ()))
        }
    }
}

fn error_body(status: Status, message: &str) -> Custom<Json<Value>> {
    Custom(
        status,
        Json(json!({
            "error": status.reason().unwrap_or("Error"),
            "message": message
        })),
    )
}

#[catch(401)]
pub fn unauthorized_api(_req: &Request) -> Custom<Json<Value>> {
    error_body(Status::Unauthorized, "Authentication required")
}

#[catch(403)]
pub fn forbidden_api(_req: &Request) -> Custom<Json<Value>> {
    error_body(
        Status::Forbidden,
        "You don't have permission to perform this action",
    )
}

#[catch(404)]
pub fn not_found_api(_req: &Request) -> Custom<Json<Value>> {
    error_body(Status::NotFound, "Resource not found")
}

#[catch(422)]
pub fn unprocessable_api(_req: &Request) -> Custom<Json<Value>> {
    error_body(Status::UnprocessableEntity, "Malformed request body")
}

#[catch(default)]
pub fn default_api(status: Status, _req: &Request) -> Custom<Json<Value>> {
    let message = if status.code >= 500 {
        "Internal server error"
    } else {
        "Request failed"
    };
    error_body(status, message)
}
