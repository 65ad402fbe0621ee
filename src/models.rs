use chrono::{NaiveDateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use crate::auth::Role;
use crate::error::AppError;

/// Grades carry two fractional digits and are stored as integer hundredths.
pub const GRADE_SCALE: u32 = 2;
pub const GRADE_MIN: Decimal = Decimal::ZERO;
pub const GRADE_MAX: Decimal = Decimal::ONE_HUNDRED;

pub fn grade_from_hundredths(hundredths: i64) -> Decimal {
    Decimal::new(hundredths, GRADE_SCALE)
}

/// Rounds to two decimals and checks the 0-100 range.
pub fn grade_to_hundredths(value: Decimal) -> Result<i64, AppError> {
    let rounded = value.round_dp(GRADE_SCALE);

    if rounded < GRADE_MIN || rounded > GRADE_MAX {
        return Err(AppError::validation(
            "grade_value",
            format!("Grade must be between {} and {}", GRADE_MIN, GRADE_MAX),
        ));
    }

    (rounded * Decimal::ONE_HUNDRED)
        .to_i64()
        .ok_or_else(|| AppError::validation("grade_value", "Grade is not representable"))
}

/// Fields needed to create an account; `password` is plaintext until hashed.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub full_name: &'a str,
    pub email: &'a str,
    pub role: Role,
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize, Clone)]
pub struct Subject {
    pub subject_id: i64,
    pub subject_name: String,
    pub created_at: NaiveDateTime,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbSubject {
    pub subject_id: Option<i64>,
    pub subject_name: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbSubject> for Subject {
    fn from(subject: DbSubject) -> Self {
        Self {
            subject_id: subject.subject_id.unwrap_or_default(),
            subject_name: subject.subject_name.unwrap_or_default(),
            created_at: subject
                .created_at
                .unwrap_or_else(|| Utc::now().naive_utc()),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct Grade {
    pub grade_id: i64,
    pub student_id: i64,
    pub subject_id: i64,
    pub grade_value: Option<Decimal>,
    pub updated_at: NaiveDateTime,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbGrade {
    pub grade_id: Option<i64>,
    pub student_id: Option<i64>,
    pub subject_id: Option<i64>,
    pub grade_hundredths: Option<i64>,
    pub updated_at: Option<NaiveDateTime>,
}

impl From<DbGrade> for Grade {
    fn from(grade: DbGrade) -> Self {
        Self {
            grade_id: grade.grade_id.unwrap_or_default(),
            student_id: grade.student_id.unwrap_or_default(),
            subject_id: grade.subject_id.unwrap_or_default(),
            grade_value: grade.grade_hundredths.map(grade_from_hundredths),
            updated_at: grade
                .updated_at
                .unwrap_or_else(|| Utc::now().naive_utc()),
        }
    }
}

/// One line of a student's report: a subject and the grade for it, if any.
#[derive(Debug, Serialize, Clone)]
pub struct StudentGrade {
    pub grade_id: Option<i64>,
    pub subject_id: i64,
    pub subject_name: String,
    pub grade_value: Option<Decimal>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbStudentGrade {
    pub grade_id: Option<i64>,
    pub subject_id: Option<i64>,
    pub subject_name: Option<String>,
    pub grade_hundredths: Option<i64>,
}

impl From<DbStudentGrade> for StudentGrade {
    fn from(row: DbStudentGrade) -> Self {
        Self {
            grade_id: row.grade_id,
            subject_id: row.subject_id.unwrap_or_default(),
            subject_name: row.subject_name.unwrap_or_default(),
            grade_value: row.grade_hundredths.map(grade_from_hundredths),
        }
    }
}
