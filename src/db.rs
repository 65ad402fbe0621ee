use crate::{
    auth::{DbUser, DbUserSession, Role, User, UserSession},
    error::AppError,
};
use chrono::{NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::{info, instrument};

use crate::models::{
    DbGrade, DbStudentGrade, DbSubject, Grade, NewUser, StudentGrade, Subject,
    grade_to_hundredths,
};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const USER_COLUMNS: &str = "user_id, username, full_name, email, role, created_at";

#[cfg(not(test))]
const PASSWORD_HASH_COST: u32 = bcrypt::DEFAULT_COST;
// Minimum cost keeps the test suite fast.
#[cfg(test)]
const PASSWORD_HASH_COST: u32 = 4;

#[derive(sqlx::FromRow)]
struct DbCredentials {
    #[sqlx(flatten)]
    user: DbUser,
    password: Option<String>,
}

/// Opens the pool with foreign keys enforced, creating the file if needed.
#[instrument]
pub async fn connect(database_url: &str) -> Result<Pool<Sqlite>, AppError> {
    info!("Connecting to database");
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    Ok(SqlitePoolOptions::new().connect_with(options).await?)
}

/// Maps a UNIQUE constraint failure to `Conflict`; other errors stay database errors.
pub fn unique_violation_as_conflict(err: sqlx::Error, message: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::Conflict(message.to_string())
        }
        _ => AppError::from(err),
    }
}

async fn fetch_user(
    pool: &Pool<Sqlite>,
    filter: &str,
    value: impl for<'q> sqlx::Encode<'q, Sqlite> + sqlx::Type<Sqlite> + Send + 'static,
) -> Result<Option<User>, AppError> {
    let query = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, filter);

    let row = sqlx::query_as::<_, DbUser>(&query)
        .bind(value)
        .fetch_optional(pool)
        .await?;

    row.map(User::try_from).transpose()
}

async fn fetch_users(pool: &Pool<Sqlite>, query: &str) -> Result<Vec<User>, AppError> {
    let rows = sqlx::query_as::<_, DbUser>(query).fetch_all(pool).await?;

    rows.into_iter().map(User::try_from).collect()
}

#[instrument]
pub async fn get_user_by_id(pool: &Pool<Sqlite>, user_id: i64) -> Result<Option<User>, AppError> {
    info!("Fetching user by ID");
    fetch_user(pool, "user_id = ?", user_id).await
}

#[instrument]
pub async fn get_user_by_email(pool: &Pool<Sqlite>, email: &str) -> Result<Option<User>, AppError> {
    info!("Fetching user by email");
    fetch_user(pool, "email = ?", email.to_string()).await
}

#[instrument]
pub async fn get_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    info!("Fetching user by username");
    fetch_user(pool, "username = ?", username.to_string()).await
}

#[instrument]
pub async fn get_student_by_id(
    pool: &Pool<Sqlite>,
    student_id: i64,
) -> Result<Option<User>, AppError> {
    info!("Fetching student by ID");
    let user = get_user_by_id(pool, student_id).await?;

    Ok(user.filter(|u| u.role == Role::Student))
}

#[instrument]
pub async fn get_all_students(pool: &Pool<Sqlite>) -> Result<Vec<User>, AppError> {
    info!("Getting all students");
    fetch_users(
        pool,
        &format!(
            "SELECT {} FROM users WHERE role = 'student' ORDER BY user_id",
            USER_COLUMNS
        ),
    )
    .await
}

#[instrument]
pub async fn list_all_users(pool: &Pool<Sqlite>) -> Result<Vec<User>, AppError> {
    info!("Listing all users");
    fetch_users(
        pool,
        &format!("SELECT {} FROM users ORDER BY user_id", USER_COLUMNS),
    )
    .await
}

#[instrument(skip_all, fields(username = %new_user.username, role = %new_user.role))]
pub async fn create_user(pool: &Pool<Sqlite>, new_user: &NewUser<'_>) -> Result<User, AppError> {
    info!("Creating new user");

    if get_user_by_email(pool, new_user.email).await?.is_some() {
        return Err(AppError::Conflict("User already exists".to_string()));
    }

    if get_user_by_username(pool, new_user.username).await?.is_some() {
        return Err(AppError::Conflict(format!(
            "Username '{}' already exists",
            new_user.username
        )));
    }

    let hashed_password = bcrypt::hash(new_user.password, PASSWORD_HASH_COST)?;

    let query = format!(
        "INSERT INTO users (username, password, full_name, email, role)
         VALUES (?, ?, ?, ?, ?)
         RETURNING {}",
        USER_COLUMNS
    );

    let row = sqlx::query_as::<_, DbUser>(&query)
        .bind(new_user.username)
        .bind(hashed_password)
        .bind(new_user.full_name)
        .bind(new_user.email)
        .bind(new_user.role.as_str())
        .fetch_one(pool)
        .await
        // A concurrent insert can still win the race past the checks above.
        .map_err(|err| unique_violation_as_conflict(err, "User already exists"))?;

    User::try_from(row)
}

/// Creates the user unless one with the same email already exists.
#[instrument(skip_all, fields(email = %new_user.email))]
pub async fn ensure_user(pool: &Pool<Sqlite>, new_user: &NewUser<'_>) -> Result<User, AppError> {
    match get_user_by_email(pool, new_user.email).await? {
        Some(user) => {
            info!(user_id = user.user_id, "User already present");
            Ok(user)
        }
        None => create_user(pool, new_user).await,
    }
}

#[instrument]
pub async fn delete_user(pool: &Pool<Sqlite>, user_id: i64) -> Result<bool, AppError> {
    info!("Deleting user");
    let result = sqlx::query("DELETE FROM users WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    Ok(true)
}

/// Matches `login` against username or email, then verifies the bcrypt hash.
#[instrument(skip_all, fields(login = %login))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    login: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let query = format!(
        "SELECT {}, password FROM users WHERE username = ? OR email = ? ORDER BY user_id",
        USER_COLUMNS
    );

    let candidates = sqlx::query_as::<_, DbCredentials>(&query)
        .bind(login)
        .bind(login)
        .fetch_all(pool)
        .await?;

    for candidate in candidates {
        let hash = candidate.password.unwrap_or_default();
        // An unparseable hash is a failed match, not a server error.
        if bcrypt::verify(password, &hash).unwrap_or(false) {
            return User::try_from(candidate.user).map(Some);
        }
    }

    Ok(None)
}

#[instrument]
pub async fn create_subject(pool: &Pool<Sqlite>, subject_name: &str) -> Result<Subject, AppError> {
    info!("Creating subject");
    let row = sqlx::query_as::<_, DbSubject>(
        "INSERT INTO subjects (subject_name) VALUES (?)
         RETURNING subject_id, subject_name, created_at",
    )
    .bind(subject_name)
    .fetch_one(pool)
    .await?;

    Ok(Subject::from(row))
}

#[instrument]
pub async fn list_subjects(pool: &Pool<Sqlite>) -> Result<Vec<Subject>, AppError> {
    info!("Listing subjects");
    let rows = sqlx::query_as::<_, DbSubject>(
        "SELECT subject_id, subject_name, created_at FROM subjects ORDER BY subject_id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Subject::from).collect())
}

#[instrument]
pub async fn get_subject(pool: &Pool<Sqlite>, subject_id: i64) -> Result<Option<Subject>, AppError> {
    info!("Fetching subject");
    let row = sqlx::query_as::<_, DbSubject>(
        "SELECT subject_id, subject_name, created_at FROM subjects WHERE subject_id = ?",
    )
    .bind(subject_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Subject::from))
}

#[instrument]
pub async fn delete_subject(pool: &Pool<Sqlite>, subject_id: i64) -> Result<bool, AppError> {
    info!("Deleting subject");
    let result = sqlx::query("DELETE FROM subjects WHERE subject_id = ?")
        .bind(subject_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Subject not found".to_string()));
    }

    Ok(true)
}

/// Every subject, with this student's grade where one exists.
#[instrument]
pub async fn get_student_grades(
    pool: &Pool<Sqlite>,
    student_id: i64,
) -> Result<Vec<StudentGrade>, AppError> {
    info!("Getting student grades");
    let rows = sqlx::query_as::<_, DbStudentGrade>(
        "SELECT g.grade_id, s.subject_id, s.subject_name, g.grade_hundredths
         FROM subjects s
         LEFT JOIN grades g ON g.subject_id = s.subject_id AND g.student_id = ?
         ORDER BY s.subject_id",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(StudentGrade::from).collect())
}

#[cfg(test)]
#[instrument]
pub async fn get_grade(
    pool: &Pool<Sqlite>,
    student_id: i64,
    subject_id: i64,
) -> Result<Option<Grade>, AppError> {
    let row = sqlx::query_as::<_, DbGrade>(
        "SELECT grade_id, student_id, subject_id, grade_hundredths, updated_at
         FROM grades WHERE student_id = ? AND subject_id = ?",
    )
    .bind(student_id)
    .bind(subject_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Grade::from))
}

/// Inserts or overwrites the grade for `(student_id, subject_id)` in one statement.
#[instrument]
pub async fn update_grade(
    pool: &Pool<Sqlite>,
    student_id: i64,
    subject_id: i64,
    grade_value: Option<Decimal>,
) -> Result<Grade, AppError> {
    info!("Updating grade");
    let hundredths = grade_value.map(grade_to_hundredths).transpose()?;
    let now = Utc::now().naive_utc();

    let row = sqlx::query_as::<_, DbGrade>(
        "INSERT INTO grades (student_id, subject_id, grade_hundredths, updated_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (student_id, subject_id) DO UPDATE
         SET grade_hundredths = excluded.grade_hundredths, updated_at = excluded.updated_at
         RETURNING grade_id, student_id, subject_id, grade_hundredths, updated_at",
    )
    .bind(student_id)
    .bind(subject_id)
    .bind(hundredths)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(Grade::from(row))
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
pub async fn get_session_by_token(pool: &Pool<Sqlite>, token: &str) -> Result<UserSession, AppError> {
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
