use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use crate::error::AppError;

fn to_utc(dt: NaiveDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub position: i64,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbTrack {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub position: Option<i64>,
}

impl From<DbTrack> for Track {
    fn from(track: DbTrack) -> Self {
        Self {
            id: track.id.unwrap_or_default(),
            title: track.title.unwrap_or_default(),
            description: track.description.unwrap_or_default(),
            position: track.position.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: i64,
    pub track_id: i64,
    pub title: String,
    pub position: i64,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbModule {
    pub id: Option<i64>,
    pub track_id: Option<i64>,
    pub title: Option<String>,
    pub position: Option<i64>,
}

impl From<DbModule> for Module {
    fn from(module: DbModule) -> Self {
        Self {
            id: module.id.unwrap_or_default(),
            track_id: module.track_id.unwrap_or_default(),
            title: module.title.unwrap_or_default(),
            position: module.position.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Lesson payload, stored as tagged JSON in `lessons.content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LessonContent {
    Video {
        url: String,
        #[serde(rename = "durationSeconds", default)]
        duration_seconds: Option<i64>,
    },
    Pdf {
        url: String,
    },
    Quiz {
        questions: Vec<QuizQuestion>,
        #[serde(rename = "passingScore", default)]
        passing_score: Option<i64>,
    },
    Assignment {
        instructions: String,
    },
}

impl LessonContent {
    pub fn kind(&self) -> &'static str {
        match self {
            LessonContent::Video { .. } => "video",
            LessonContent::Pdf { .. } => "pdf",
            LessonContent::Quiz { .. } => "quiz",
            LessonContent::Assignment { .. } => "assignment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    Draft,
    Published,
}

impl LessonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonStatus::Draft => "draft",
            LessonStatus::Published => "published",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "draft" => Ok(LessonStatus::Draft),
            "published" => Ok(LessonStatus::Published),
            other => Err(AppError::Internal(format!("Unknown lesson status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: i64,
    pub module_id: i64,
    pub title: String,
    pub points: i64,
    pub content: LessonContent,
    pub status: LessonStatus,
    pub position: i64,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbLesson {
    pub id: Option<i64>,
    pub module_id: Option<i64>,
    pub title: Option<String>,
    pub points: Option<i64>,
    pub content: Option<Json<LessonContent>>,
    pub status: Option<String>,
    pub position: Option<i64>,
}

impl TryFrom<DbLesson> for Lesson {
    type Error = AppError;

    fn try_from(lesson: DbLesson) -> Result<Self, Self::Error> {
        let id = lesson.id.unwrap_or_default();
        let content = lesson
            .content
            .map(|json| json.0)
            .ok_or_else(|| AppError::Internal(format!("Lesson {} has no content", id)))?;

        Ok(Self {
            id,
            module_id: lesson.module_id.unwrap_or_default(),
            title: lesson.title.unwrap_or_default(),
            points: lesson.points.unwrap_or_default(),
            content,
            status: LessonStatus::parse(&lesson.status.unwrap_or_default())?,
            position: lesson.position.unwrap_or_default(),
        })
    }
}

impl Lesson {
    pub fn is_published(&self) -> bool {
        self.status == LessonStatus::Published
    }

    pub fn is_quiz(&self) -> bool {
        matches!(self.content, LessonContent::Quiz { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    #[default]
    Locked,
    InProgress,
    Completed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Locked => "locked",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "locked" => Ok(ProgressStatus::Locked),
            "in_progress" => Ok(ProgressStatus::InProgress),
            "completed" => Ok(ProgressStatus::Completed),
            other => Err(AppError::Internal(format!(
                "Unknown progress status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    pub user_id: i64,
    pub lesson_id: i64,
    pub status: ProgressStatus,
    pub quiz_score: Option<i64>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbUserProgress {
    pub user_id: Option<i64>,
    pub lesson_id: Option<i64>,
    pub status: Option<String>,
    pub quiz_score: Option<i64>,
    pub completed_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl TryFrom<DbUserProgress> for UserProgress {
    type Error = AppError;

    fn try_from(db: DbUserProgress) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: db.user_id.unwrap_or_default(),
            lesson_id: db.lesson_id.unwrap_or_default(),
            status: ProgressStatus::parse(&db.status.unwrap_or_default())?,
            quiz_score: db.quiz_score,
            completed_at: db.completed_at.map(to_utc),
            updated_at: db.updated_at.map(to_utc).unwrap_or_else(Utc::now),
        })
    }
}

impl UserProgress {
    /// Placeholder for a lesson the user has not touched yet.
    pub fn untouched(user_id: i64, lesson_id: i64) -> Self {
        Self {
            user_id,
            lesson_id,
            status: ProgressStatus::Locked,
            quiz_score: None,
            completed_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ProgressStatus::Completed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointTransaction {
    pub id: i64,
    pub user_id: i64,
    pub lesson_id: Option<i64>,
    pub points: i64,
    pub action: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbPointTransaction {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub lesson_id: Option<i64>,
    pub points: Option<i64>,
    pub action: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbPointTransaction> for PointTransaction {
    fn from(db: DbPointTransaction) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            lesson_id: db.lesson_id,
            points: db.points.unwrap_or_default(),
            action: db.action.unwrap_or_default(),
            created_at: db.created_at.map(to_utc).unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSubmission {
    pub id: i64,
    pub user_id: i64,
    pub lesson_id: i64,
    pub score: i64,
    pub total_questions: i64,
    pub answers: Vec<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbQuizSubmission {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub lesson_id: Option<i64>,
    pub score: Option<i64>,
    pub total_questions: Option<i64>,
    pub answers: Option<Json<Vec<serde_json::Value>>>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbQuizSubmission> for QuizSubmission {
    fn from(db: DbQuizSubmission) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            lesson_id: db.lesson_id.unwrap_or_default(),
            score: db.score.unwrap_or_default(),
            total_questions: db.total_questions.unwrap_or_default(),
            answers: db.answers.map(|json| json.0).unwrap_or_default(),
            created_at: db.created_at.map(to_utc).unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentSubmission {
    pub id: i64,
    pub user_id: i64,
    pub lesson_id: i64,
    pub files: Vec<String>,
    pub link: Option<String>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbAssignmentSubmission {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub lesson_id: Option<i64>,
    pub files: Option<Json<Vec<String>>>,
    pub link: Option<String>,
    pub comment: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbAssignmentSubmission> for AssignmentSubmission {
    fn from(db: DbAssignmentSubmission) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            lesson_id: db.lesson_id.unwrap_or_default(),
            files: db.files.map(|json| json.0).unwrap_or_default(),
            link: db.link,
            comment: db.comment,
            created_at: db.created_at.map(to_utc).unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: i64,
    pub user_id: i64,
    pub display_name: String,
    pub points: i64,
}
