#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod completion;
mod db;
mod env;
mod error;
mod ledger;
mod models;
mod progress;
mod submissions;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use api::{
    api_complete_lesson, api_get_lesson, api_get_track, api_get_tracks, api_get_user_progress,
    api_leaderboard, api_login, api_logout, api_me, api_my_points, api_my_progress,
    api_my_quiz_submissions, api_reconcile_ledger, api_set_user_banned, api_submit_assignment, api_submit_quiz,
    api_update_progress, health,
};
use auth::{default_api, forbidden_api, not_found_api, unauthorized_api, unprocessable_api};
use db::{clean_expired_sessions, ensure_bootstrap_admin};
use env::{Settings, load_environment};
use error::AppError;
use ledger::find_discrepancies;
use rocket::{Build, Rocket, tokio};
use telemetry::TelemetryFairing;
use telemetry::init_tracing;
use thiserror::Error;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

async fn connect(settings: &Settings) -> Result<SqlitePool, Error> {
    let options = SqliteConnectOptions::from_str(&settings.database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10));

    Ok(SqlitePool::connect_with(options).await?)
}

/// Reads settings, then connects, migrates and seeds the database before the
/// server starts.
async fn prepare() -> Result<(Settings, SqlitePool), Error> {
    let settings = Settings::from_env()?;
    let pool = connect(&settings).await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(AppError::from)?;
    info!("Migrations completed successfully");

    if let Some(admin) = &settings.bootstrap_admin {
        if let Some(id) = ensure_bootstrap_admin(&pool, admin).await? {
            info!(user_id = id, username = %admin.username, "Created bootstrap super admin");
        }
    }

    let discrepancies = find_discrepancies(&pool).await?;
    if !discrepancies.is_empty() {
        warn!(
            count = discrepancies.len(),
            "Stored point totals disagree with the ledger"
        );
    }

    Ok((settings, pool))
}

fn spawn_session_cleanup(pool: SqlitePool, interval_secs: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(interval_secs)).await;
        }
    });
}

#[launch]
async fn rocket() -> _ {
    if let Err(e) = load_environment() {
        eprintln!("Failed to load environment files: {}", e);
    }
    init_tracing();

    let (settings, pool) = match prepare().await {
        Ok(prepared) => prepared,
        Err(e) => {
            error!("Startup failed: {}", e);
            panic!("Startup failed: {}", e);
        }
    };

    spawn_session_cleanup(pool.clone(), settings.session_cleanup_interval_secs);

    init_rocket(pool, settings).await
}

pub async fn init_rocket(pool: SqlitePool, settings: Settings) -> Rocket<Build> {
    info!("Starting lesson tracker");

    rocket::build()
        .manage(pool)
        .manage(settings)
        .mount(
            "/api",
            routes![
                api_login,
                api_logout,
                api_me,
                api_get_tracks,
                api_get_track,
                api_get_lesson,
                api_complete_lesson,
                api_update_progress,
                api_submit_quiz,
                api_my_quiz_submissions,
                api_submit_assignment,
                api_my_progress,
                api_get_user_progress,
                api_my_points,
                api_leaderboard,
                api_set_user_banned,
                api_reconcile_ledger,
            ],
        )
        .register(
            "/api",
            catchers![
                unauthorized_api,
                forbidden_api,
                not_found_api,
                unprocessable_api,
                default_api,
            ],
        )
        .mount("/api", routes![health])
        .attach(TelemetryFairing)
}
