//! Completion coordinator: finalizes a lesson for a user and awards its
//! points at most once per (user, lesson).

use chrono::Utc;
use serde::Serialize;
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::ledger::award_points;
use crate::models::{Lesson, LessonContent, UserProgress};
use crate::progress::{claim_completion, fetch_progress};

/// What caused the completion. Decides the ledger wording and whether a score
/// is stored alongside the progress row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSignal {
    Explicit,
    ProgressUpdate { score: Option<i64> },
    Quiz { score: i64 },
    Assignment,
}

impl CompletionSignal {
    pub fn score(&self) -> Option<i64> {
        match self {
            CompletionSignal::ProgressUpdate { score } => *score,
            CompletionSignal::Quiz { score } => Some(*score),
            CompletionSignal::Explicit | CompletionSignal::Assignment => None,
        }
    }

    pub fn describe(&self, lesson_title: &str) -> String {
        match self {
            CompletionSignal::Explicit | CompletionSignal::ProgressUpdate { .. } => {
                format!("Completed lesson: {}", lesson_title)
            }
            CompletionSignal::Quiz { score } => {
                format!("Passed quiz: {} ({}%)", lesson_title, score)
            }
            CompletionSignal::Assignment => format!("Submitted assignment: {}", lesson_title),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub progress: UserProgress,
    pub points_awarded: i64,
}

/// Graded quizzes need a passing score and assignments need a submission, so
/// neither can be finished through the generic signals alone.
fn check_signal(lesson: &Lesson, signal: CompletionSignal) -> Result<(), AppError> {
    match (&lesson.content, signal) {
        (
            LessonContent::Assignment { .. },
            CompletionSignal::Explicit | CompletionSignal::ProgressUpdate { .. },
        ) => Err(AppError::Validation(format!(
            "Lesson {} is completed by submitting the assignment",
            lesson.id
        ))),
        (
            LessonContent::Quiz {
                passing_score: Some(required),
                ..
            },
            _,
        ) => match signal.score() {
            Some(score) if score >= *required => Ok(()),
            _ => Err(AppError::Validation(format!(
                "Lesson {} needs a quiz score of at least {}",
                lesson.id, required
            ))),
        },
        _ => Ok(()),
    }
}

/// Runs the completion inside a transaction owned by the caller, so other
/// writes (a submission row, say) commit or roll back with it.
#[instrument(skip(conn, lesson), fields(lesson_id = lesson.id, lesson_points = lesson.points))]
pub async fn complete_lesson_in(
    conn: &mut SqliteConnection,
    user_id: i64,
    lesson: &Lesson,
    signal: CompletionSignal,
) -> Result<CompletionOutcome, AppError> {
    check_signal(lesson, signal)?;

    let now = Utc::now().naive_utc();

    let newly_completed =
        claim_completion(&mut *conn, user_id, lesson.id, signal.score(), now).await?;

    let points_awarded = if newly_completed && lesson.points > 0 {
        award_points(
            &mut *conn,
            user_id,
            Some(lesson.id),
            lesson.points,
            &signal.describe(&lesson.title),
        )
        .await?
        .points
    } else {
        0
    };

    if newly_completed {
        info!(points_awarded, ?signal, "Lesson completed");
    } else {
        info!(?signal, "Lesson already completed, no points awarded");
    }

    let progress = fetch_progress(conn, user_id, lesson.id).await?;

    Ok(CompletionOutcome {
        progress,
        points_awarded,
    })
}

/// Completes the lesson in its own transaction. Any failure rolls back the
/// progress update, the point increment and the ledger row together.
#[instrument(skip(pool, lesson), fields(lesson_id = lesson.id))]
pub async fn complete_lesson(
    pool: &Pool<Sqlite>,
    user_id: i64,
    lesson: &Lesson,
    signal: CompletionSignal,
) -> Result<CompletionOutcome, AppError> {
    let mut tx = pool.begin().await?;
    let outcome = complete_lesson_in(&mut tx, user_id, lesson, signal).await?;
    tx.commit().await?;
    Ok(outcome)
}
