use chrono::Utc;
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite};
use rocket::serde::json::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{Pool, Sqlite};
use validator::{Validate, ValidationError};

use crate::auth::{Permission, Role, SESSION_COOKIE, SessionToken, User, UserSession, login};
use crate::config::AppConfig;
use crate::db::{
    create_subject, create_user, create_user_session, delete_subject, delete_user,
    get_all_students, get_student_by_id, get_student_grades, get_subject, invalidate_session,
    list_all_users, list_subjects, update_grade,
};
use crate::error::AppError;
use crate::models::{NewUser, StudentGrade, Subject};
use crate::validation::JsonValidateExt;

#[derive(Deserialize)]
pub struct LoginRequest {
    /// Username or email.
    username: String,
    password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserResponse {
    pub user_id: i64,
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub role: Role,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            user_id: user.user_id,
            username: user.username,
            full_name: user.full_name,
            email: user.email,
            role: user.role,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    pub token: String,
    pub expires_at: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SubjectResponse {
    pub subject_id: i64,
    pub subject_name: String,
}

impl From<Subject> for SubjectResponse {
    fn from(subject: Subject) -> Self {
        Self {
            subject_id: subject.subject_id,
            subject_name: subject.subject_name,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct GradeResponse {
    pub grade_id: Option<i64>,
    pub subject_id: i64,
    pub subject_name: String,
    pub grade_value: Option<Decimal>,
}

impl From<StudentGrade> for GradeResponse {
    fn from(grade: StudentGrade) -> Self {
        Self {
            grade_id: grade.grade_id,
            subject_id: grade.subject_id,
            subject_name: grade.subject_name,
            grade_value: grade.grade_value,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct StudentGradesResponse {
    pub student: UserResponse,
    pub grades: Vec<GradeResponse>,
}

async fn student_grades_response(
    db: &Pool<Sqlite>,
    student: User,
) -> Result<Json<StudentGradesResponse>, AppError> {
    let grades = get_student_grades(db, student.user_id).await?;

    Ok(Json(StudentGradesResponse {
        student: UserResponse::from(student),
        grades: grades.into_iter().map(GradeResponse::from).collect(),
    }))
}

#[get("/")]
pub fn index() -> Json<MessageResponse> {
    MessageResponse::new("Grade Entry System API")
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

#[post("/auth/login", data = "<credentials>")]
pub async fn api_login(
    credentials: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Json<LoginResponse>, AppError> {
    let user = login(db, &credentials.username, &credentials.password).await?;

    let token = UserSession::generate_token();
    let expires_at = Utc::now() + config.session_ttl();

    create_user_session(db, user.user_id, &token, expires_at.naive_utc()).await?;

    cookies.add_private(
        Cookie::build((SESSION_COOKIE, token.clone()))
            .same_site(SameSite::Lax)
            .http_only(true)
            .max_age(rocket::time::Duration::hours(config.session_ttl_hours)),
    );

    Ok(Json(LoginResponse {
        user: UserResponse::from(user),
        token,
        expires_at: expires_at.to_rfc3339(),
    }))
}

#[post("/auth/logout")]
pub async fn api_logout(
    token: SessionToken,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    if let Some(token) = token.0 {
        invalidate_session(db, &token).await?;
    }

    cookies.remove_private(Cookie::build(SESSION_COOKIE));

    Ok(MessageResponse::new("Logged out"))
}

#[get("/auth/me")]
pub async fn api_me(user: User) -> Result<Json<UserResponse>, AppError> {
    user.require_permission(Permission::ViewOwnProfile)?;

    Ok(Json(UserResponse::from(user)))
}

#[get("/students")]
pub async fn api_get_students(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<UserResponse>>, AppError> {
    user.require_permission(Permission::ViewStudents)?;

    let students = get_all_students(db).await?;

    Ok(Json(students.into_iter().map(UserResponse::from).collect()))
}

#[get("/grades/my-grades")]
pub async fn api_get_my_grades(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<StudentGradesResponse>, AppError> {
    if !user.has_permission(Permission::ViewOwnGrades) {
        return Err(AppError::Authorization(
            "Only students can view their own grades".to_string(),
        ));
    }

    student_grades_response(db, user).await
}

#[get("/grades/student/<student_id>")]
pub async fn api_get_student_grades(
    student_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<StudentGradesResponse>, AppError> {
    user.require_permission(Permission::ViewStudentGrades)?;

    let student = get_student_by_id(db, student_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Student not found".to_string()))?;

    student_grades_response(db, student).await
}

#[derive(Deserialize)]
pub struct GradeUpdateRequest {
    /// Required key; an explicit `null` clears the grade.
    #[serde(deserialize_with = "nullable_grade")]
    grade_value: Option<Decimal>,
}

// A `deserialize_with` field has no implicit default, so a missing key is rejected.
fn nullable_grade<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Decimal>::deserialize(deserializer)
}

#[put("/grades/student/<student_id>/subject/<subject_id>", data = "<update>")]
pub async fn api_update_grade(
    student_id: i64,
    subject_id: i64,
    update: Json<GradeUpdateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    user.require_permission(Permission::EditGrades)?;

    if get_student_by_id(db, student_id).await?.is_none() {
        return Err(AppError::NotFound("Student not found".to_string()));
    }

    if get_subject(db, subject_id).await?.is_none() {
        return Err(AppError::NotFound("Subject not found".to_string()));
    }

    update_grade(db, student_id, subject_id, update.grade_value).await?;

    Ok(MessageResponse::new("Grade updated successfully"))
}

#[get("/subjects")]
pub async fn api_get_subjects(
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<SubjectResponse>>, AppError> {
    let subjects = list_subjects(db).await?;

    Ok(Json(subjects.into_iter().map(SubjectResponse::from).collect()))
}

#[derive(Deserialize, Validate)]
pub struct SubjectCreateRequest {
    #[validate(custom(function = "validate_subject_name"))]
    subject_name: String,
}

fn validate_subject_name(name: &str) -> Result<(), ValidationError> {
    let length = name.trim().chars().count();

    if length == 0 || length > 100 {
        let mut error = ValidationError::new("length");
        error.message = Some("Subject name must be 1-100 characters".into());
        return Err(error);
    }

    Ok(())
}

#[post("/subjects", data = "<subject>")]
pub async fn api_create_subject(
    subject: Json<SubjectCreateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<SubjectResponse>, AppError> {
    user.require_permission(Permission::ManageSubjects)?;

    let validated = subject.validate_custom()?;
    let created = create_subject(db, validated.subject_name.trim()).await?;

    Ok(Json(SubjectResponse::from(created)))
}

#[delete("/subjects/<subject_id>")]
pub async fn api_delete_subject(
    subject_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    user.require_permission(Permission::ManageSubjects)?;

    delete_subject(db, subject_id).await?;

    Ok(MessageResponse::new("Subject deleted successfully"))
}

#[derive(Deserialize, Validate)]
pub struct UserCreateRequest {
    #[validate(length(min = 1, max = 100, message = "Full name must be 1-100 characters"))]
    full_name: String,
    #[validate(email(message = "Invalid email address"))]
    email: String,
    role: Role,
    #[validate(length(min = 1, max = 50, message = "Username must be 1-50 characters"))]
    username: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    password: String,
}

#[post("/users", data = "<registration>")]
pub async fn api_create_user(
    registration: Json<UserCreateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<UserResponse>, AppError> {
    user.require_permission(Permission::ManageUsers)?;

    let validated = registration.validate_custom()?;

    let created = create_user(
        db,
        &NewUser {
            full_name: &validated.full_name,
            email: &validated.email,
            role: validated.role,
            username: &validated.username,
            password: &validated.password,
        },
    )
    .await?;

    Ok(Json(UserResponse::from(created)))
}

#[get("/users")]
pub async fn api_get_users(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<UserResponse>>, AppError> {
    user.require_permission(Permission::ManageUsers)?;

    let users = list_all_users(db).await?;

    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

#[delete("/users/<user_id>")]
pub async fn api_delete_user(
    user_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    user.require_permission(Permission::ManageUsers)?;

    delete_user(db, user_id).await?;

    Ok(MessageResponse::new("User deleted successfully"))
}
