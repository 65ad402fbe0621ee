#[cfg(test)]
mod tests {
    use crate::auth::{Permission, Role};
    use std::str::FromStr;

    #[test]
    fn test_role_permissions() {
        assert!(Role::Admin.has_permission(Permission::ManageUsers));
        assert!(Role::Admin.has_permission(Permission::EditGrades));
        assert!(!Role::Admin.has_permission(Permission::ViewOwnGrades));

        assert!(Role::Teacher.has_permission(Permission::ViewStudents));
        assert!(Role::Teacher.has_permission(Permission::EditGrades));
        assert!(!Role::Teacher.has_permission(Permission::ManageSubjects));
        assert!(!Role::Teacher.has_permission(Permission::ManageUsers));

        assert!(Role::Student.has_permission(Permission::ViewOwnGrades));
        assert!(!Role::Student.has_permission(Permission::ViewStudents));
        assert!(!Role::Student.has_permission(Permission::EditGrades));

        for role in [Role::Admin, Role::Teacher, Role::Student] {
            assert!(role.has_permission(Permission::ViewOwnProfile));
        }
    }

    #[test]
    fn test_role_parsing_is_closed() {
        assert_eq!(Role::from_str("teacher").unwrap(), Role::Teacher);
        assert_eq!(Role::Student.to_string(), "student");
        assert!(Role::from_str("principal").is_err());
        assert!(Role::from_str("Admin").is_err());

        let parsed: Role = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(parsed, Role::Admin);
        assert!(serde_json::from_str::<Role>("\"janitor\"").is_err());
    }
}
