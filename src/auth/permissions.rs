use anyhow::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

pub const ADMIN_ONLY: &[Role] = &[Role::Admin];
pub const TEACHER_AND_ADMIN: &[Role] = &[Role::Admin, Role::Teacher];
pub const STUDENT_ONLY: &[Role] = &[Role::Student];
pub const ALL_ROLES: &[Role] = &[Role::Admin, Role::Teacher, Role::Student];

/// An action guarded by a role allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewOwnProfile,
    ViewOwnGrades,

    ViewStudents,
    ViewStudentGrades,
    EditGrades,

    ManageSubjects,
    ManageUsers,
}

impl Permission {
    pub fn allowed_roles(&self) -> &'static [Role] {
        match self {
            Permission::ViewOwnProfile => ALL_ROLES,
            Permission::ViewOwnGrades => STUDENT_ONLY,
            Permission::ViewStudents | Permission::ViewStudentGrades | Permission::EditGrades => {
                TEACHER_AND_ADMIN
            }
            Permission::ManageSubjects | Permission::ManageUsers => ADMIN_ONLY,
        }
    }
}

impl Role {
    pub fn has_permission(&self, permission: Permission) -> bool {
        permission.allowed_roles().contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            _ => Err(Error::msg(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
