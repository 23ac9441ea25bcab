use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::{Permission, SESSION_COOKIE, User, UserSession};
use crate::completion::{CompletionOutcome, CompletionSignal, complete_lesson};
use crate::db::{
    authenticate_user, create_user_session, get_all_tracks, get_leaderboard,
    get_lessons_for_track, get_modules_for_track, get_quiz_submissions, get_track, get_user,
    get_visible_lesson, invalidate_session, set_user_banned,
};
use crate::env::Settings;
use crate::error::AppError;
use crate::ledger::{Reconciliation, find_discrepancies, list_transactions};
use crate::models::{
    AssignmentSubmission, LeaderboardEntry, Lesson, Module, PointTransaction,
    ProgressStatus, QuizSubmission, Track, UserProgress,
};
use crate::progress::{get_progress, list_user_progress, record_attempt};
use crate::submissions::{
    AssignmentWork, QuizAttempt, SubmissionOutcome, submit_assignment, submit_quiz,
};
use crate::validation::{AppErrorExt, JsonValidateExt, ValidationError, ValidationResponse};

const DEFAULT_LEADERBOARD_SIZE: i64 = 10;
const MAX_LEADERBOARD_SIZE: i64 = 100;

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub token: Option<String>,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub points: i64,
    pub banned: bool,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            role: user.role.to_string(),
            points: user.points,
            banned: user.banned,
        }
    }
}

#[get("/health")]
pub async fn health() -> Status {
    Status::Ok
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    settings: &State<Settings>,
) -> Result<Json<LoginResponse>, ValidationError> {
    use chrono::Utc;

    let validated = login.validate_custom()?;

    let Some(user) = authenticate_user(db, &validated.username, &validated.password)
        .await
        .validate_custom()?
    else {
        return Ok(Json(LoginResponse {
            success: false,
            user: None,
            token: None,
            error: Some("Invalid username or password".to_string()),
        }));
    };

    if user.banned {
        return Err(Custom(
            Status::Forbidden,
            Json(ValidationResponse::with_error(
                "authentication",
                "This account has been banned",
            )),
        ));
    }

    let token = UserSession::generate_token();
    let expires_at = Utc::now() + chrono::Duration::hours(settings.session_ttl_hours);

    create_user_session(db, user.id, &token, expires_at.naive_utc())
        .await
        .validate_custom()?;

    let cookie = Cookie::build((SESSION_COOKIE, token.clone()))
        .same_site(SameSite::Lax)
        .http_only(true)
        .max_age(rocket::time::Duration::hours(settings.session_ttl_hours));
    cookies.add_private(cookie);

    Ok(Json(LoginResponse {
        success: true,
        user: Some(UserData::from(user)),
        token: Some(token),
        error: None,
    }))
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, db: &State<Pool<Sqlite>>) -> Status {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        if let Err(e) = invalidate_session(db, &token).await {
            e.log_and_record("Logout");
        }
    }

    cookies.remove_private(Cookie::build(SESSION_COOKIE));

    Status::NoContent
}

#[get("/me")]
pub async fn api_me(user: User) -> Json<UserData> {
    Json(UserData::from(user))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleResponse {
    #[serde(flatten)]
    pub module: Module,
    pub lessons: Vec<LessonSummary>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonSummary {
    pub id: i64,
    pub title: String,
    pub kind: &'static str,
    pub points: i64,
    pub status: &'static str,
    pub progress: ProgressStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackResponse {
    #[serde(flatten)]
    pub track: Track,
    pub modules: Vec<ModuleResponse>,
}

#[get("/tracks")]
pub async fn api_get_tracks(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Track>>, AppError> {
    user.require_permission(Permission::ViewPublishedContent)?;
    Ok(Json(get_all_tracks(db).await?))
}

#[get("/tracks/<id>")]
pub async fn api_get_track(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<TrackResponse>, AppError> {
    user.require_permission(Permission::ViewPublishedContent)?;
    let include_drafts = user.has_permission(Permission::ViewDraftContent);

    let track = get_track(db, id).await?;
    let modules = get_modules_for_track(db, id).await?;
    let lessons = get_lessons_for_track(db, id, include_drafts).await?;
    let progress = list_user_progress(db, user.id).await?;

    let status_of = |lesson_id: i64| {
        progress
            .iter()
            .find(|p| p.lesson_id == lesson_id)
            .map(|p| p.status)
            .unwrap_or_default()
    };

    let modules = modules
        .into_iter()
        .map(|module| {
            let lessons = lessons
                .iter()
                .filter(|lesson| lesson.module_id == module.id)
                .map(|lesson| LessonSummary {
                    id: lesson.id,
                    title: lesson.title.clone(),
                    kind: lesson.content.kind(),
                    points: lesson.points,
                    status: lesson.status.as_str(),
                    progress: status_of(lesson.id),
                })
                .collect();
            ModuleResponse { module, lessons }
        })
        .collect();

    Ok(Json(TrackResponse { track, modules }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonResponse {
    pub lesson: Lesson,
    pub progress: UserProgress,
}

#[get("/lessons/<id>")]
pub async fn api_get_lesson(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LessonResponse>, AppError> {
    user.require_permission(Permission::ViewPublishedContent)?;
    let lesson =
        get_visible_lesson(db, id, user.has_permission(Permission::ViewDraftContent)).await?;
    let progress = get_progress(db.inner(), user.id, id)
        .await?
        .unwrap_or_else(|| UserProgress::untouched(user.id, id));

    Ok(Json(LessonResponse { lesson, progress }))
}

#[post("/lessons/<id>/complete")]
pub async fn api_complete_lesson(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CompletionOutcome>, AppError> {
    user.require_permission(Permission::CompleteLessons)?;
    let lesson =
        get_visible_lesson(db, id, user.has_permission(Permission::ViewDraftContent)).await?;

    let outcome = complete_lesson(db, user.id, &lesson, CompletionSignal::Explicit).await?;
    Ok(Json(outcome))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdateRequest {
    #[validate(range(min = 0, max = 100, message = "Score must be between 0 and 100"))]
    score: Option<i64>,
    is_completed: Option<bool>,
}

#[post("/lessons/<id>/progress", data = "<update>")]
pub async fn api_update_progress(
    id: i64,
    update: Json<ProgressUpdateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CompletionOutcome>, ValidationError> {
    user.require_permission(Permission::CompleteLessons)
        .validate_custom()?;
    let update = update.validate_custom()?;
    let lesson = get_visible_lesson(db, id, user.has_permission(Permission::ViewDraftContent))
        .await
        .validate_custom()?;

    // Scores only mean something for quiz lessons.
    let score = update.score.filter(|_| lesson.is_quiz());

    if update.is_completed.unwrap_or(false) {
        let signal = CompletionSignal::ProgressUpdate { score };
        let outcome = complete_lesson(db, user.id, &lesson, signal)
            .await
            .validate_custom()?;
        return Ok(Json(outcome));
    }

    let mut conn = db.acquire().await.map_err(AppError::from).validate_custom()?;
    let progress = record_attempt(&mut conn, user.id, lesson.id, score)
        .await
        .validate_custom()?;

    Ok(Json(CompletionOutcome {
        progress,
        points_awarded: 0,
    }))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QuizSubmitRequest {
    lesson_id: i64,
    #[validate(range(min = 0, max = 100, message = "Score must be between 0 and 100"))]
    score: i64,
    #[validate(range(min = 1, message = "A quiz has at least one question"))]
    total_questions: i64,
    #[serde(default)]
    answers: Vec<serde_json::Value>,
}

#[post("/quiz/submit", data = "<request>")]
pub async fn api_submit_quiz(
    request: Json<QuizSubmitRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<SubmissionOutcome<QuizSubmission>>, ValidationError> {
    user.require_permission(Permission::SubmitQuizzes)
        .validate_custom()?;
    let request = request.validate_custom()?;

    let lesson = get_visible_lesson(
        db,
        request.lesson_id,
        user.has_permission(Permission::ViewDraftContent),
    )
    .await
    .validate_custom()?;

    let outcome = submit_quiz(
        db,
        user.id,
        &lesson,
        QuizAttempt {
            score: request.score,
            total_questions: request.total_questions,
            answers: request.answers,
        },
    )
    .await
    .validate_custom()?;

    Ok(Json(outcome))
}

#[get("/quiz/<lesson_id>/submissions")]
pub async fn api_my_quiz_submissions(
    lesson_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<QuizSubmission>>, AppError> {
    user.require_permission(Permission::SubmitQuizzes)?;
    let lesson = get_visible_lesson(
        db,
        lesson_id,
        user.has_permission(Permission::ViewDraftContent),
    )
    .await?;

    Ok(Json(get_quiz_submissions(db, user.id, lesson.id).await?))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentSubmitRequest {
    lesson_id: i64,
    #[serde(default)]
    files: Vec<String>,
    #[validate(url(message = "Link must be a valid URL"))]
    link: Option<String>,
    #[validate(length(max = 5000, message = "Comment is too long"))]
    comment: Option<String>,
}

#[post("/assignment/submit", data = "<request>")]
pub async fn api_submit_assignment(
    request: Json<AssignmentSubmitRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<SubmissionOutcome<AssignmentSubmission>>, ValidationError> {
    user.require_permission(Permission::SubmitAssignments)
        .validate_custom()?;
    let request = request.validate_custom()?;

    let lesson = get_visible_lesson(
        db,
        request.lesson_id,
        user.has_permission(Permission::ViewDraftContent),
    )
    .await
    .validate_custom()?;

    let outcome = submit_assignment(
        db,
        user.id,
        &lesson,
        AssignmentWork {
            files: request.files,
            link: request.link,
            comment: request.comment,
        },
    )
    .await
    .validate_custom()?;

    Ok(Json(outcome))
}

#[get("/me/progress")]
pub async fn api_my_progress(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<UserProgress>>, AppError> {
    user.require_permission(Permission::ViewOwnProfile)?;
    Ok(Json(list_user_progress(db, user.id).await?))
}

#[get("/users/<id>/progress")]
pub async fn api_get_user_progress(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<UserProgress>>, AppError> {
    user.require_permission(Permission::ViewAllProgress)?;
    let target = get_user(db, id).await?;
    Ok(Json(list_user_progress(db, target.id).await?))
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsResponse {
    pub total: i64,
    pub transactions: Vec<PointTransaction>,
}

#[get("/me/points")]
pub async fn api_my_points(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<PointsResponse>, AppError> {
    user.require_permission(Permission::ViewOwnProfile)?;
    let transactions = list_transactions(db, user.id).await?;

    Ok(Json(PointsResponse {
        total: user.points,
        transactions,
    }))
}

#[get("/leaderboard?<limit>")]
pub async fn api_leaderboard(
    limit: Option<i64>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    user.require_permission(Permission::ViewPublishedContent)?;
    let limit = limit
        .unwrap_or(DEFAULT_LEADERBOARD_SIZE)
        .clamp(1, MAX_LEADERBOARD_SIZE);

    Ok(Json(get_leaderboard(db, limit).await?))
}

#[derive(Deserialize)]
pub struct BanRequest {
    banned: bool,
}

#[put("/users/<id>/ban", data = "<request>")]
pub async fn api_set_user_banned(
    id: i64,
    request: Json<BanRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<UserData>, AppError> {
    user.require_permission(Permission::BanMembers)?;

    let target = get_user(db, id).await?;
    if !user.can_ban(&target) {
        return Err(AppError::Authorization(format!(
            "{} may not change the ban status of {}",
            user.username, target.username
        )));
    }

    set_user_banned(db, id, request.banned).await?;
    tracing::info!(admin = %user.username, target = %target.username, banned = request.banned, "Ban status changed");

    Ok(Json(UserData::from(get_user(db, id).await?)))
}

#[get("/admin/ledger/reconcile")]
pub async fn api_reconcile_ledger(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Reconciliation>>, AppError> {
    user.require_permission(Permission::AuditLedger)?;
    Ok(Json(find_discrepancies(db).await?))
}
