#[cfg(test)]
pub mod test_utils {
    use crate::api::LoginResponse;
    use crate::auth::Role;
    use crate::config::AppConfig;
    use crate::db::{MIGRATOR, create_subject, create_user, update_grade};
    use crate::error::AppError;
    use crate::init_rocket;
    use crate::models::NewUser;
    use rocket::http::{ContentType, Header, Status};
    use rocket::local::asynchronous::Client;
    use rust_decimal::Decimal;
    use serde_json::json;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::str::FromStr;
    use std::sync::Once;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        subjects: Vec<String>,
        grades: Vec<TestGrade>,
    }

    pub struct TestUser {
        pub username: String,
        pub full_name: String,
        pub role: Role,
        pub password: String,
    }

    pub struct TestGrade {
        pub student_username: String,
        pub subject_name: String,
        pub grade_value: Option<Decimal>,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        fn user(mut self, username: &str, full_name: Option<&str>, role: Role) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                full_name: full_name.unwrap_or(username).to_string(),
                role,
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        pub fn student(self, username: &str, full_name: Option<&str>) -> Self {
            self.user(username, full_name, Role::Student)
        }

        pub fn teacher(self, username: &str, full_name: Option<&str>) -> Self {
            self.user(username, full_name, Role::Teacher)
        }

        pub fn admin(self, username: &str, full_name: Option<&str>) -> Self {
            self.user(username, full_name, Role::Admin)
        }

        pub fn user_with_password(
            mut self,
            username: &str,
            full_name: Option<&str>,
            role: Role,
            password: &str,
        ) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                full_name: full_name.unwrap_or(username).to_string(),
                role,
                password: password.to_string(),
            });
            self
        }

        pub fn subject(mut self, name: &str) -> Self {
            self.subjects.push(name.to_string());
            self
        }

        pub fn grade(mut self, student_username: &str, subject_name: &str, value: &str) -> Self {
            self.grades.push(TestGrade {
                student_username: student_username.to_string(),
                subject_name: subject_name.to_string(),
                grade_value: Some(Decimal::from_str(value).expect("Invalid test grade")),
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::Builder::from_env(
                    env_logger::Env::default().default_filter_or("debug"),
                )
                .is_test(true)
                .try_init();
            });

            let pool = setup_test_pool().await?;

            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut subject_id_map: HashMap<String, i64> = HashMap::new();

            for user in &self.users {
                let email = test_email(&user.username);
                let created = create_user(
                    &pool,
                    &NewUser {
                        full_name: &user.full_name,
                        email: &email,
                        role: user.role,
                        username: &user.username,
                        password: &user.password,
                    },
                )
                .await?;

                user_id_map.insert(user.username.clone(), created.user_id);
            }

            for name in &self.subjects {
                let subject = create_subject(&pool, name).await?;
                subject_id_map.insert(name.clone(), subject.subject_id);
            }

            for grade in &self.grades {
                let student_id = user_id_map.get(&grade.student_username).copied();
                let subject_id = subject_id_map.get(&grade.subject_name).copied();

                if let (Some(student_id), Some(subject_id)) = (student_id, subject_id) {
                    update_grade(&pool, student_id, subject_id, grade.grade_value).await?;
                }
            }

            Ok(TestDb {
                pool,
                user_id_map,
                subject_id_map,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        pub subject_id_map: HashMap<String, i64>,
    }

    impl TestDb {
        pub fn user_id(&self, username: &str) -> Option<i64> {
            self.user_id_map.get(username).copied()
        }

        pub fn subject_id(&self, name: &str) -> Option<i64> {
            self.subject_id_map.get(name).copied()
        }

        pub async fn grade_row_count(&self, student_id: i64, subject_id: i64) -> i64 {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM grades WHERE student_id = ? AND subject_id = ?",
            )
            .bind(student_id)
            .bind(subject_id)
            .fetch_one(&self.pool)
            .await
            .expect("Failed to count grades")
        }

        pub async fn table_count(&self, table: &str) -> i64 {
            sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&self.pool)
                .await
                .expect("Failed to count rows")
        }
    }

    pub fn test_email(username: &str) -> String {
        format!("{}@school.test", username)
    }

    /// In-memory database with migrations applied. A single connection keeps
    /// every query on the same in-memory database.
    pub async fn setup_test_pool() -> Result<Pool<Sqlite>, AppError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(pool)
    }

    /// Standard fixture: one user per role, two subjects, one grade.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .admin("admin_user", Some("Admin User"))
            .teacher("teacher_user", Some("Teacher User"))
            .student("student_user", Some("Student User"))
            .student("other_student", Some("Other Student"))
            .subject("Math")
            .subject("Science")
            .grade("student_user", "Math", "88.5")
            .build()
            .await
            .expect("Failed to build standard test database")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let rocket = init_rocket(test_db.pool.clone(), AppConfig::default());

        let client = Client::untracked(rocket)
            .await
            .expect("Failed to create Rocket client");

        (client, test_db)
    }

    pub async fn login_test_user(client: &Client, username: &str, password: &str) -> String {
        let response = client
            .post("/api/auth/login")
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

        assert_eq!(response.status(), Status::Ok, "Login failed for {}", username);

        let body = response.into_string().await.expect("Empty login response");
        let login_response: LoginResponse =
            serde_json::from_str(&body).expect("Invalid login response");

        login_response.token
    }

    pub fn bearer(token: &str) -> Header<'static> {
        Header::new("Authorization", format!("Bearer {}", token))
    }
}
