use crate::{
    auth::{DbUser, DbUserSession, Role, User, UserSession},
    env::BootstrapAdmin,
    error::AppError,
    models::{
        AssignmentSubmission, DbAssignmentSubmission, DbLesson, DbModule, DbQuizSubmission,
        DbTrack, LeaderboardEntry, Lesson, LessonContent, LessonStatus, Module, QuizSubmission,
        Track,
    },
};
use chrono::{NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite, SqliteConnection, types::Json};
use tracing::{info, instrument, warn};

#[cfg(not(test))]
const PASSWORD_HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const PASSWORD_HASH_COST: u32 = 4;

const USER_COLUMNS: &str = "id, username, role, display_name, points, banned";
const LESSON_COLUMNS: &str = "id, module_id, title, points, content, status, position";

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users WHERE id = ?",
        USER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => User::try_from(user),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument]
pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    info!("Finding user by username");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users WHERE username = ?",
        USER_COLUMNS
    ))
    .bind(username)
    .fetch_optional(pool)
    .await?;

    row.map(User::try_from).transpose()
}

#[instrument(skip_all, fields(username = %username, role = %role))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
    role: Role,
    display_name: Option<&str>,
) -> Result<i64, AppError> {
    info!("Creating new user");

    if find_user_by_username(pool, username).await?.is_some() {
        return Err(AppError::Conflict(format!(
            "Username '{}' already exists",
            username
        )));
    }

    let hashed_password = bcrypt::hash(password, PASSWORD_HASH_COST)?;

    let res = sqlx::query(
        "INSERT INTO users (username, password, role, display_name) VALUES (?, ?, ?, ?)",
    )
    .bind(username)
    .bind(hashed_password)
    .bind(role.as_str())
    .bind(display_name)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

/// Returns the user when the credentials match; `None` covers both an unknown
/// username and a wrong password.
#[instrument(skip_all, fields(username = %username))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let stored: Option<(i64, String)> =
        sqlx::query_as("SELECT id, password FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(pool)
            .await?;

    let Some((id, hash)) = stored else {
        return Ok(None);
    };

    match bcrypt::verify(password, &hash) {
        Ok(true) => Ok(Some(get_user(pool, id).await?)),
        _ => Ok(None),
    }
}

#[instrument(skip_all, fields(username = %admin.username))]
pub async fn ensure_bootstrap_admin(
    pool: &Pool<Sqlite>,
    admin: &BootstrapAdmin,
) -> Result<Option<i64>, AppError> {
    let (user_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    if user_count > 0 {
        return Ok(None);
    }

    info!("No users found, creating bootstrap super admin");
    let id = create_user(
        pool,
        &admin.username,
        &admin.password,
        Role::SuperAdmin,
        Some("Administrator"),
    )
    .await?;

    Ok(Some(id))
}

#[instrument]
pub async fn set_user_banned(
    pool: &Pool<Sqlite>,
    user_id: i64,
    banned: bool,
) -> Result<(), AppError> {
    info!("Updating user banned flag");
    let mut tx = pool.begin().await?;

    let res = sqlx::query("UPDATE users SET banned = ? WHERE id = ?")
        .bind(banned)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("User {} not found", user_id)));
    }

    if banned {
        let revoked = sqlx::query("DELETE FROM user_sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        info!(revoked = revoked.rows_affected(), "Revoked sessions of banned user");
    }

    tx.commit().await?;
    Ok(())
}

#[instrument]
pub async fn get_leaderboard(
    pool: &Pool<Sqlite>,
    limit: i64,
) -> Result<Vec<LeaderboardEntry>, AppError> {
    info!("Getting leaderboard");
    let rows = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users
         WHERE banned IS 0
         ORDER BY points DESC, id ASC
         LIMIT ?",
        USER_COLUMNS
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(User::try_from)
        .enumerate()
        .map(|(index, user)| {
            user.map(|user| LeaderboardEntry {
                rank: index as i64 + 1,
                user_id: user.id,
                display_name: user.display_name,
                points: user.points,
            })
        })
        .collect()
}

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query(
        "INSERT INTO user_sessions (user_id, token, created_at, expires_at) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(token)
    .bind(Utc::now().naive_utc())
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

#[instrument]
pub async fn create_track(
    pool: &Pool<Sqlite>,
    title: &str,
    description: &str,
    position: i64,
) -> Result<i64, AppError> {
    info!("Creating track");
    let res = sqlx::query("INSERT INTO tracks (title, description, position) VALUES (?, ?, ?)")
        .bind(title)
        .bind(description)
        .bind(position)
        .execute(pool)
        .await?;
    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn create_module(
    pool: &Pool<Sqlite>,
    track_id: i64,
    title: &str,
    position: i64,
) -> Result<i64, AppError> {
    info!("Creating module");
    let res = sqlx::query("INSERT INTO modules (track_id, title, position) VALUES (?, ?, ?)")
        .bind(track_id)
        .bind(title)
        .bind(position)
        .execute(pool)
        .await?;
    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, content))]
pub async fn create_lesson(
    pool: &Pool<Sqlite>,
    module_id: i64,
    title: &str,
    points: i64,
    content: &LessonContent,
    status: LessonStatus,
    position: i64,
) -> Result<i64, AppError> {
    info!(kind = content.kind(), "Creating lesson");
    if points < 0 {
        return Err(AppError::Validation(
            "Lesson points cannot be negative".to_string(),
        ));
    }

    let res = sqlx::query(
        "INSERT INTO lessons (module_id, title, points, content, status, position)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(module_id)
    .bind(title)
    .bind(points)
    .bind(Json(content))
    .bind(status.as_str())
    .bind(position)
    .execute(pool)
    .await?;
    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn get_lesson(pool: &Pool<Sqlite>, id: i64) -> Result<Lesson, AppError> {
    info!("Getting lesson");
    let row = sqlx::query_as::<_, DbLesson>(&format!(
        "SELECT {} FROM lessons WHERE id = ?",
        LESSON_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(lesson) => Lesson::try_from(lesson),
        _ => Err(AppError::NotFound(format!("Lesson {} not found", id))),
    }
}

/// Like [`get_lesson`], but drafts are reported as missing unless the caller
/// may see them.
#[instrument]
pub async fn get_visible_lesson(
    pool: &Pool<Sqlite>,
    id: i64,
    include_drafts: bool,
) -> Result<Lesson, AppError> {
    let lesson = get_lesson(pool, id).await?;

    if !lesson.is_published() && !include_drafts {
        warn!(lesson_id = id, "Draft lesson requested without permission");
        return Err(AppError::NotFound(format!("Lesson {} not found", id)));
    }

    Ok(lesson)
}

#[instrument]
pub async fn get_all_tracks(pool: &Pool<Sqlite>) -> Result<Vec<Track>, AppError> {
    info!("Getting all tracks");
    let rows = sqlx::query_as::<_, DbTrack>(
        "SELECT id, title, description, position FROM tracks ORDER BY position, id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Track::from).collect())
}

#[instrument]
pub async fn get_track(pool: &Pool<Sqlite>, id: i64) -> Result<Track, AppError> {
    info!("Getting track");
    let row = sqlx::query_as::<_, DbTrack>(
        "SELECT id, title, description, position FROM tracks WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(track) => Ok(Track::from(track)),
        _ => Err(AppError::NotFound(format!("Track {} not found", id))),
    }
}

#[instrument]
pub async fn get_modules_for_track(
    pool: &Pool<Sqlite>,
    track_id: i64,
) -> Result<Vec<Module>, AppError> {
    info!("Getting modules for track");
    let rows = sqlx::query_as::<_, DbModule>(
        "SELECT id, track_id, title, position FROM modules
         WHERE track_id = ?
         ORDER BY position, id",
    )
    .bind(track_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Module::from).collect())
}

#[instrument]
pub async fn get_lessons_for_track(
    pool: &Pool<Sqlite>,
    track_id: i64,
    include_drafts: bool,
) -> Result<Vec<Lesson>, AppError> {
    info!("Getting lessons for track");
    let query = if include_drafts {
        "SELECT l.id, l.module_id, l.title, l.points, l.content, l.status, l.position
         FROM lessons l JOIN modules m ON m.id = l.module_id
         WHERE m.track_id = ?
         ORDER BY l.position, l.id"
    } else {
        "SELECT l.id, l.module_id, l.title, l.points, l.content, l.status, l.position
         FROM lessons l JOIN modules m ON m.id = l.module_id
         WHERE m.track_id = ? AND l.status = 'published'
         ORDER BY l.position, l.id"
    };

    let rows = sqlx::query_as::<_, DbLesson>(query)
        .bind(track_id)
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(Lesson::try_from).collect()
}

pub async fn insert_quiz_submission(
    conn: &mut SqliteConnection,
    user_id: i64,
    lesson_id: i64,
    score: i64,
    total_questions: i64,
    answers: &[serde_json::Value],
) -> Result<QuizSubmission, AppError> {
    let row = sqlx::query_as::<_, DbQuizSubmission>(
        "INSERT INTO quiz_submissions (user_id, lesson_id, score, total_questions, answers, created_at)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING id, user_id, lesson_id, score, total_questions, answers, created_at",
    )
    .bind(user_id)
    .bind(lesson_id)
    .bind(score)
    .bind(total_questions)
    .bind(Json(answers))
    .bind(Utc::now().naive_utc())
    .fetch_one(&mut *conn)
    .await?;

    Ok(QuizSubmission::from(row))
}

pub async fn insert_assignment_submission(
    conn: &mut SqliteConnection,
    user_id: i64,
    lesson_id: i64,
    files: &[String],
    link: Option<&str>,
    comment: Option<&str>,
) -> Result<AssignmentSubmission, AppError> {
    let row = sqlx::query_as::<_, DbAssignmentSubmission>(
        "INSERT INTO assignment_submissions (user_id, lesson_id, files, link, comment, created_at)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING id, user_id, lesson_id, files, link, comment, created_at",
    )
    .bind(user_id)
    .bind(lesson_id)
    .bind(Json(files))
    .bind(link)
    .bind(comment)
    .bind(Utc::now().naive_utc())
    .fetch_one(&mut *conn)
    .await?;

    Ok(AssignmentSubmission::from(row))
}

#[instrument]
pub async fn get_quiz_submissions(
    pool: &Pool<Sqlite>,
    user_id: i64,
    lesson_id: i64,
) -> Result<Vec<QuizSubmission>, AppError> {
    let rows = sqlx::query_as::<_, DbQuizSubmission>(
        "SELECT id, user_id, lesson_id, score, total_questions, answers, created_at
         FROM quiz_submissions
         WHERE user_id = ? AND lesson_id = ?
         ORDER BY id",
    )
    .bind(user_id)
    .bind(lesson_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(QuizSubmission::from).collect())
}
