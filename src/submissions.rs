//! Quiz and assignment submissions. Each submission row is written in the same
//! transaction as the completion it drives.

use serde::Serialize;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::completion::{CompletionSignal, complete_lesson_in};
use crate::db::{insert_assignment_submission, insert_quiz_submission};
use crate::error::AppError;
use crate::models::{AssignmentSubmission, Lesson, LessonContent, QuizSubmission, UserProgress};
use crate::progress::record_attempt;

#[derive(Debug, Clone)]
pub struct QuizAttempt {
    pub score: i64,
    pub total_questions: i64,
    pub answers: Vec<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct AssignmentWork {
    pub files: Vec<String>,
    pub link: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionOutcome<S> {
    pub submission: S,
    pub progress: UserProgress,
    pub points_awarded: i64,
    pub passed: bool,
}

#[instrument(skip(pool, lesson, attempt), fields(lesson_id = lesson.id, score = attempt.score))]
pub async fn submit_quiz(
    pool: &Pool<Sqlite>,
    user_id: i64,
    lesson: &Lesson,
    attempt: QuizAttempt,
) -> Result<SubmissionOutcome<QuizSubmission>, AppError> {
    let LessonContent::Quiz { passing_score, .. } = &lesson.content else {
        return Err(AppError::Validation(format!(
            "Lesson {} is a {} lesson, not a quiz",
            lesson.id,
            lesson.content.kind()
        )));
    };

    if !(0..=100).contains(&attempt.score) {
        return Err(AppError::Validation(format!(
            "Score must be between 0 and 100, got {}",
            attempt.score
        )));
    }
    if attempt.total_questions < 1 {
        return Err(AppError::Validation(
            "A quiz must have at least one question".to_string(),
        ));
    }
    if attempt.answers.len() as i64 > attempt.total_questions {
        return Err(AppError::Validation(format!(
            "Got {} answers for {} questions",
            attempt.answers.len(),
            attempt.total_questions
        )));
    }

    let passed = passing_score.is_none_or(|required| attempt.score >= required);

    let mut tx = pool.begin().await?;

    let submission = insert_quiz_submission(
        &mut tx,
        user_id,
        lesson.id,
        attempt.score,
        attempt.total_questions,
        &attempt.answers,
    )
    .await?;

    let (progress, points_awarded) = if passed {
        let outcome = complete_lesson_in(
            &mut tx,
            user_id,
            lesson,
            CompletionSignal::Quiz {
                score: attempt.score,
            },
        )
        .await?;
        (outcome.progress, outcome.points_awarded)
    } else {
        info!("Quiz below passing score, recording attempt only");
        (
            record_attempt(&mut tx, user_id, lesson.id, Some(attempt.score)).await?,
            0,
        )
    };

    tx.commit().await?;

    Ok(SubmissionOutcome {
        submission,
        progress,
        points_awarded,
        passed,
    })
}

#[instrument(skip(pool, lesson, work), fields(lesson_id = lesson.id))]
pub async fn submit_assignment(
    pool: &Pool<Sqlite>,
    user_id: i64,
    lesson: &Lesson,
    work: AssignmentWork,
) -> Result<SubmissionOutcome<AssignmentSubmission>, AppError> {
    if !matches!(lesson.content, LessonContent::Assignment { .. }) {
        return Err(AppError::Validation(format!(
            "Lesson {} is a {} lesson, not an assignment",
            lesson.id,
            lesson.content.kind()
        )));
    }

    let link = work.link.filter(|l| !l.trim().is_empty());
    if work.files.is_empty() && link.is_none() {
        return Err(AppError::Validation(
            "An assignment needs at least one file or a link".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let submission = insert_assignment_submission(
        &mut tx,
        user_id,
        lesson.id,
        &work.files,
        link.as_deref(),
        work.comment.as_deref(),
    )
    .await?;

    let outcome = complete_lesson_in(&mut tx, user_id, lesson, CompletionSignal::Assignment).await?;

    tx.commit().await?;

    Ok(SubmissionOutcome {
        submission,
        progress: outcome.progress,
        points_awarded: outcome.points_awarded,
        passed: true,
    })
}

#[cfg(test)]
mod tests {
    use super::{AssignmentWork, QuizAttempt, submit_assignment, submit_quiz};
    use crate::db::{get_lesson, get_quiz_submissions, get_user};
    use crate::error::AppError;
    use crate::ledger::{list_transactions, reconcile_user};
    use crate::models::ProgressStatus;
    use crate::test::test_db::{TestDb, TestDbBuilder};
    use serde_json::json;

    async fn fixture() -> TestDb {
        TestDbBuilder::new()
            .member("learner", None)
            .track("Rust")
            .module("Basics")
            .quiz_lesson("Open quiz", 10, None)
            .quiz_lesson("Strict quiz", 15, Some(70))
            .assignment_lesson("Build a CLI", 30)
            .video_lesson("Intro video", 5)
            .build()
            .await
            .expect("Failed to build test database")
    }

    fn attempt(score: i64) -> QuizAttempt {
        QuizAttempt {
            score,
            total_questions: 2,
            answers: vec![json!(1), json!(0)],
        }
    }

    #[rocket::async_test]
    async fn quiz_submission_completes_lesson() {
        let test_db = fixture().await;
        let user_id = test_db.user_id("learner").unwrap();
        let lesson = get_lesson(&test_db.pool, test_db.lesson_id("Open quiz").unwrap())
            .await
            .unwrap();

        let outcome = submit_quiz(&test_db.pool, user_id, &lesson, attempt(80))
            .await
            .expect("submission failed");

        assert!(outcome.passed);
        assert_eq!(outcome.submission.score, 80);
        assert_eq!(outcome.submission.answers, vec![json!(1), json!(0)]);
        assert_eq!(outcome.progress.status, ProgressStatus::Completed);
        assert_eq!(outcome.progress.quiz_score, Some(80));
        assert_eq!(outcome.points_awarded, 10);
    }

    #[rocket::async_test]
    async fn resubmitted_quiz_is_stored_but_not_rewarded() {
        let test_db = fixture().await;
        let user_id = test_db.user_id("learner").unwrap();
        let lesson = get_lesson(&test_db.pool, test_db.lesson_id("Open quiz").unwrap())
            .await
            .unwrap();

        submit_quiz(&test_db.pool, user_id, &lesson, attempt(60))
            .await
            .unwrap();
        let again = submit_quiz(&test_db.pool, user_id, &lesson, attempt(90))
            .await
            .unwrap();

        assert_eq!(again.points_awarded, 0);
        assert_eq!(again.progress.quiz_score, Some(90));
        assert_eq!(
            get_quiz_submissions(&test_db.pool, user_id, lesson.id)
                .await
                .unwrap()
                .len(),
            2
        );
        assert_eq!(get_user(&test_db.pool, user_id).await.unwrap().points, 10);
    }

    #[rocket::async_test]
    async fn failing_quiz_records_attempt_without_points() {
        let test_db = fixture().await;
        let user_id = test_db.user_id("learner").unwrap();
        let lesson = get_lesson(&test_db.pool, test_db.lesson_id("Strict quiz").unwrap())
            .await
            .unwrap();

        let failed = submit_quiz(&test_db.pool, user_id, &lesson, attempt(50))
            .await
            .unwrap();
        assert!(!failed.passed);
        assert_eq!(failed.progress.status, ProgressStatus::InProgress);
        assert_eq!(failed.progress.quiz_score, Some(50));
        assert_eq!(failed.points_awarded, 0);

        let passed = submit_quiz(&test_db.pool, user_id, &lesson, attempt(70))
            .await
            .unwrap();
        assert!(passed.passed);
        assert_eq!(passed.points_awarded, 15);
        assert!(reconcile_user(&test_db.pool, user_id).await.unwrap().is_balanced());
    }

    #[rocket::async_test]
    async fn quiz_rejects_wrong_lesson_kind_and_bad_scores() {
        let test_db = fixture().await;
        let user_id = test_db.user_id("learner").unwrap();
        let video = get_lesson(&test_db.pool, test_db.lesson_id("Intro video").unwrap())
            .await
            .unwrap();
        let quiz = get_lesson(&test_db.pool, test_db.lesson_id("Open quiz").unwrap())
            .await
            .unwrap();

        let wrong_kind = submit_quiz(&test_db.pool, user_id, &video, attempt(80)).await;
        assert!(matches!(wrong_kind, Err(AppError::Validation(_))));

        let too_high = submit_quiz(&test_db.pool, user_id, &quiz, attempt(101)).await;
        assert!(matches!(too_high, Err(AppError::Validation(_))));

        let too_many_answers = submit_quiz(
            &test_db.pool,
            user_id,
            &quiz,
            QuizAttempt {
                score: 50,
                total_questions: 1,
                answers: vec![json!(0), json!(1)],
            },
        )
        .await;
        assert!(matches!(too_many_answers, Err(AppError::Validation(_))));

        assert!(get_quiz_submissions(&test_db.pool, user_id, quiz.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[rocket::async_test]
    async fn assignment_submission_completes_and_awards_once() {
        let test_db = fixture().await;
        let user_id = test_db.user_id("learner").unwrap();
        let lesson = get_lesson(&test_db.pool, test_db.lesson_id("Build a CLI").unwrap())
            .await
            .unwrap();

        let work = AssignmentWork {
            files: vec!["uploads/cli.zip".to_string()],
            link: None,
            comment: Some("First try".to_string()),
        };

        let first = submit_assignment(&test_db.pool, user_id, &lesson, work.clone())
            .await
            .expect("submission failed");
        let second = submit_assignment(&test_db.pool, user_id, &lesson, work)
            .await
            .expect("resubmission failed");

        assert_eq!(first.points_awarded, 30);
        assert_eq!(second.points_awarded, 0);
        assert!(second.progress.is_completed());
        assert_eq!(first.submission.files, vec!["uploads/cli.zip".to_string()]);

        let ledger = list_transactions(&test_db.pool, user_id).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].action, "Submitted assignment: Build a CLI");
    }

    #[rocket::async_test]
    async fn assignment_requires_files_or_link() {
        let test_db = fixture().await;
        let user_id = test_db.user_id("learner").unwrap();
        let lesson = get_lesson(&test_db.pool, test_db.lesson_id("Build a CLI").unwrap())
            .await
            .unwrap();

        let empty = submit_assignment(
            &test_db.pool,
            user_id,
            &lesson,
            AssignmentWork {
                files: vec![],
                link: Some("   ".to_string()),
                comment: None,
            },
        )
        .await;
        assert!(matches!(empty, Err(AppError::Validation(_))));

        let with_link = submit_assignment(
            &test_db.pool,
            user_id,
            &lesson,
            AssignmentWork {
                files: vec![],
                link: Some("https://github.com/learner/cli".to_string()),
                comment: None,
            },
        )
        .await
        .expect("link-only submission failed");
        assert_eq!(
            with_link.submission.link.as_deref(),
            Some("https://github.com/learner/cli")
        );
    }
}
