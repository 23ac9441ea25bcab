#[cfg(test)]
pub mod test_db {
    use crate::auth::Role;
    use crate::db::{create_lesson, create_module, create_track, create_user};
    use crate::error::AppError;
    use crate::models::{LessonContent, LessonStatus, QuizQuestion};
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use sqlx::{Pool, Sqlite, SqlitePool};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Once;
    use std::time::Duration;
    use uuid::Uuid;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    pub struct TestUser {
        pub username: String,
        pub display_name: Option<String>,
        pub role: Role,
        pub password: String,
    }

    enum TestContent {
        Track(String),
        Module(String),
        Lesson {
            title: String,
            points: i64,
            content: LessonContent,
            status: LessonStatus,
        },
    }

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        content: Vec<TestContent>,
        file_backed: bool,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        /// Uses a throwaway database file instead of `sqlite::memory:`, for
        /// tests that need real cross-connection locking.
        pub fn file_backed(mut self) -> Self {
            self.file_backed = true;
            self
        }

        fn user(mut self, username: &str, display_name: Option<&str>, role: Role) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role,
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        pub fn member(self, username: &str, display_name: Option<&str>) -> Self {
            self.user(username, display_name, Role::Member)
        }

        pub fn admin(self, username: &str, display_name: Option<&str>) -> Self {
            self.user(username, display_name, Role::Admin)
        }

        pub fn super_admin(self, username: &str, display_name: Option<&str>) -> Self {
            self.user(username, display_name, Role::SuperAdmin)
        }

        pub fn track(mut self, title: &str) -> Self {
            self.content.push(TestContent::Track(title.to_string()));
            self
        }

        /// Adds a module to the most recently declared track.
        pub fn module(mut self, title: &str) -> Self {
            self.content.push(TestContent::Module(title.to_string()));
            self
        }

        /// Adds a lesson to the most recently declared module.
        pub fn lesson(
            mut self,
            title: &str,
            points: i64,
            content: LessonContent,
            status: LessonStatus,
        ) -> Self {
            self.content.push(TestContent::Lesson {
                title: title.to_string(),
                points,
                content,
                status,
            });
            self
        }

        pub fn video_lesson(self, title: &str, points: i64) -> Self {
            let content = LessonContent::Video {
                url: format!("https://videos.example.com/{}.mp4", title.replace(' ', "-")),
                duration_seconds: Some(600),
            };
            self.lesson(title, points, content, LessonStatus::Published)
        }

        pub fn draft_lesson(self, title: &str, points: i64) -> Self {
            let content = LessonContent::Pdf {
                url: format!("https://docs.example.com/{}.pdf", title.replace(' ', "-")),
            };
            self.lesson(title, points, content, LessonStatus::Draft)
        }

        pub fn quiz_lesson(self, title: &str, points: i64, passing_score: Option<i64>) -> Self {
            let content = LessonContent::Quiz {
                questions: vec![
                    QuizQuestion {
                        prompt: "Which keyword moves a value into a closure?".to_string(),
                        options: vec!["move".to_string(), "ref".to_string()],
                    },
                    QuizQuestion {
                        prompt: "Can a value have two mutable borrows?".to_string(),
                        options: vec!["Yes".to_string(), "No".to_string()],
                    },
                ],
                passing_score,
            };
            self.lesson(title, points, content, LessonStatus::Published)
        }

        pub fn assignment_lesson(self, title: &str, points: i64) -> Self {
            let content = LessonContent::Assignment {
                instructions: format!("Complete the {} exercise and share your work.", title),
            };
            self.lesson(title, points, content, LessonStatus::Published)
        }

        async fn connect(&self) -> Result<(SqlitePool, Option<PathBuf>), AppError> {
            if !self.file_backed {
                let pool = SqlitePool::connect("sqlite::memory:").await?;
                return Ok((pool, None));
            }

            let path = std::env::temp_dir().join(format!("lesson-tracker-{}.db", Uuid::new_v4()));
            let options = SqliteConnectOptions::new()
                .filename(&path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(10));
            let pool = SqlitePoolOptions::new()
                .max_connections(8)
                .connect_with(options)
                .await?;
            Ok((pool, Some(path)))
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(
                        tracing_subscriber::EnvFilter::try_from_default_env()
                            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
                    )
                    .with_test_writer()
                    .try_init();
            });

            let (pool, file_path) = self.connect().await?;

            sqlx::migrate!("./migrations").run(&pool).await?;

            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut track_id_map: HashMap<String, i64> = HashMap::new();
            let mut module_id_map: HashMap<String, i64> = HashMap::new();
            let mut lesson_id_map: HashMap<String, i64> = HashMap::new();

            for user in &self.users {
                let user_id = create_user(
                    &pool,
                    &user.username,
                    &user.password,
                    user.role,
                    user.display_name.as_deref(),
                )
                .await?;

                user_id_map.insert(user.username.clone(), user_id);
            }

            let mut current_track: Option<i64> = None;
            let mut current_module: Option<i64> = None;
            let mut position = 0;

            for item in &self.content {
                position += 1;
                match item {
                    TestContent::Track(title) => {
                        let id = create_track(&pool, title, "", position).await?;
                        track_id_map.insert(title.clone(), id);
                        current_track = Some(id);
                        current_module = None;
                    }
                    TestContent::Module(title) => {
                        let track_id = current_track.ok_or_else(|| {
                            AppError::Internal(format!("Module {} declared before a track", title))
                        })?;
                        let id = create_module(&pool, track_id, title, position).await?;
                        module_id_map.insert(title.clone(), id);
                        current_module = Some(id);
                    }
                    TestContent::Lesson {
                        title,
                        points,
                        content,
                        status,
                    } => {
                        let module_id = current_module.ok_or_else(|| {
                            AppError::Internal(format!("Lesson {} declared before a module", title))
                        })?;
                        let id = create_lesson(
                            &pool, module_id, title, *points, content, *status, position,
                        )
                        .await?;
                        lesson_id_map.insert(title.clone(), id);
                    }
                }
            }

            Ok(TestDb {
                pool,
                user_id_map,
                track_id_map,
                lesson_id_map,
                file_path,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        pub track_id_map: HashMap<String, i64>,
        pub lesson_id_map: HashMap<String, i64>,
        file_path: Option<PathBuf>,
    }

    impl TestDb {
        pub fn user_id(&self, username: &str) -> Option<i64> {
            self.user_id_map.get(username).copied()
        }

        pub fn track_id(&self, title: &str) -> Option<i64> {
            self.track_id_map.get(title).copied()
        }

        pub fn lesson_id(&self, title: &str) -> Option<i64> {
            self.lesson_id_map.get(title).copied()
        }

        /// Closes the pool and removes the database file, if any.
        pub async fn cleanup(self) {
            self.pool.close().await;
            if let Some(path) = self.file_path {
                for suffix in ["", "-wal", "-shm"] {
                    let mut file = path.clone().into_os_string();
                    file.push(suffix);
                    let _ = std::fs::remove_file(file);
                }
            }
        }
    }
}

#[cfg(test)]
pub mod test_utils {
    use rocket::http::{ContentType, Header, Status};
    use rocket::local::asynchronous::{Client, LocalResponse};
    use serde_json::json;

    use crate::api::LoginResponse;
    use crate::env::Settings;
    use crate::init_rocket;

    pub use super::test_db::{STANDARD_PASSWORD, TestDb, TestDbBuilder};

    /// Two members, an admin and a super admin, plus a track mixing every
    /// lesson kind and one draft.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .member("member_user", Some("Member User"))
            .member("second_member", Some("Second Member"))
            .admin("admin_user", Some("Admin User"))
            .super_admin("super_user", Some("Super User"))
            .track("Rust Fundamentals")
            .module("Ownership")
            .video_lesson("What is ownership", 10)
            .quiz_lesson("Ownership quiz", 20, None)
            .quiz_lesson("Borrowing exam", 25, Some(70))
            .assignment_lesson("Write a linked list", 40)
            .draft_lesson("Unreleased lesson", 50)
            .build()
            .await
            .expect("Failed to build standard test database")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let rocket = init_rocket(test_db.pool.clone(), Settings::default()).await;
        let client = Client::untracked(rocket)
            .await
            .expect("Failed to build rocket client");
        (client, test_db)
    }

    pub async fn login_test_user(client: &Client, username: &str, password: &str) -> String {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": username,
                    "password": password
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        let login: LoginResponse = response
            .into_json()
            .await
            .expect("Login response was not JSON");
        assert!(login.success, "Login failed for {}", username);
        login.token.expect("Login response carried no token")
    }

    pub fn bearer(token: &str) -> Header<'static> {
        Header::new("Authorization", format!("Bearer {}", token))
    }

    pub async fn json_body(response: LocalResponse<'_>) -> serde_json::Value {
        response
            .into_json::<serde_json::Value>()
            .await
            .expect("Response body was not JSON")
    }
}
