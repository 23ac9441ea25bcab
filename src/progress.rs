//! Per-user, per-lesson progress rows.
//!
//! Every write here is an upsert on the `(user_id, lesson_id)` primary key, so
//! there is never more than one row per pair. Nothing in this module touches
//! point totals.

use chrono::{NaiveDateTime, Utc};
use sqlx::{Executor, Pool, Sqlite, SqliteConnection};
use tracing::{debug, info, instrument};

use crate::error::AppError;
use crate::models::{DbUserProgress, UserProgress};

const PROGRESS_COLUMNS: &str = "user_id, lesson_id, status, quiz_score, completed_at, updated_at";

pub async fn get_progress<'e, E>(
    executor: E,
    user_id: i64,
    lesson_id: i64,
) -> Result<Option<UserProgress>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, DbUserProgress>(&format!(
        "SELECT {} FROM user_progress WHERE user_id = ? AND lesson_id = ?",
        PROGRESS_COLUMNS
    ))
    .bind(user_id)
    .bind(lesson_id)
    .fetch_optional(executor)
    .await?;

    row.map(UserProgress::try_from).transpose()
}

/// Reads a row that the caller has just written in the same transaction.
pub async fn fetch_progress(
    conn: &mut SqliteConnection,
    user_id: i64,
    lesson_id: i64,
) -> Result<UserProgress, AppError> {
    get_progress(&mut *conn, user_id, lesson_id)
        .await?
        .ok_or_else(|| {
            AppError::Internal(format!(
                "Progress row for user {} lesson {} vanished mid-transaction",
                user_id, lesson_id
            ))
        })
}

#[instrument]
pub async fn list_user_progress(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<UserProgress>, AppError> {
    info!("Listing user progress");
    let rows = sqlx::query_as::<_, DbUserProgress>(&format!(
        "SELECT {} FROM user_progress WHERE user_id = ? ORDER BY updated_at DESC, lesson_id",
        PROGRESS_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(UserProgress::try_from).collect()
}

/// Marks the lesson as started. A completed row keeps its status, completion
/// time and best score; only `updated_at` is guaranteed to move.
#[instrument(skip(conn))]
pub async fn record_attempt(
    conn: &mut SqliteConnection,
    user_id: i64,
    lesson_id: i64,
    score: Option<i64>,
) -> Result<UserProgress, AppError> {
    let now = Utc::now().naive_utc();

    sqlx::query(
        "INSERT INTO user_progress (user_id, lesson_id, status, quiz_score, updated_at)
         VALUES (?, ?, 'in_progress', ?, ?)
         ON CONFLICT (user_id, lesson_id) DO UPDATE SET
            status = CASE
                WHEN user_progress.status = 'completed' THEN 'completed'
                ELSE 'in_progress'
            END,
            quiz_score = CASE
                WHEN user_progress.status = 'completed' AND excluded.quiz_score IS NOT NULL
                    THEN MAX(COALESCE(user_progress.quiz_score, 0), excluded.quiz_score)
                ELSE COALESCE(excluded.quiz_score, user_progress.quiz_score)
            END,
            updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(lesson_id)
    .bind(score)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    debug!("Recorded lesson attempt");
    fetch_progress(conn, user_id, lesson_id).await
}

/// Moves the row to `completed`, creating it if needed.
///
/// Returns `true` only for the call that performed the transition. The first
/// statement is a write, so SQLite hands the writer lock to one transaction
/// at a time and a racing caller sees the row as already completed.
#[instrument(skip(conn))]
pub async fn claim_completion(
    conn: &mut SqliteConnection,
    user_id: i64,
    lesson_id: i64,
    score: Option<i64>,
    at: NaiveDateTime,
) -> Result<bool, AppError> {
    sqlx::query(
        "INSERT INTO user_progress (user_id, lesson_id, status, updated_at)
         VALUES (?, ?, 'in_progress', ?)
         ON CONFLICT (user_id, lesson_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(lesson_id)
    .bind(at)
    .execute(&mut *conn)
    .await?;

    let claimed = sqlx::query(
        "UPDATE user_progress
         SET status = 'completed',
             completed_at = ?,
             quiz_score = COALESCE(?, quiz_score),
             updated_at = ?
         WHERE user_id = ? AND lesson_id = ? AND status != 'completed'",
    )
    .bind(at)
    .bind(score)
    .bind(at)
    .bind(user_id)
    .bind(lesson_id)
    .execute(&mut *conn)
    .await?;

    if claimed.rows_affected() == 1 {
        return Ok(true);
    }

    // Already completed: keep the best score seen so far.
    if let Some(score) = score {
        sqlx::query(
            "UPDATE user_progress
             SET quiz_score = MAX(COALESCE(quiz_score, 0), ?), updated_at = ?
             WHERE user_id = ? AND lesson_id = ?",
        )
        .bind(score)
        .bind(at)
        .bind(user_id)
        .bind(lesson_id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(false)
}
