use rocket::figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};

/// Application settings layered over Rocket's own figment
/// (`Rocket.toml`, `ROCKET_*` variables) plus a raw `DATABASE_URL`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub database_url: String,
    pub cors_origin: String,
    pub session_ttl_hours: i64,
    #[serde(default)]
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

/// Account created at startup when no user with its email exists yet.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BootstrapAdmin {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://gradebook.db".to_string(),
            cors_origin: "http://localhost:3000".to_string(),
            session_ttl_hours: 12,
            bootstrap_admin: None,
        }
    }
}

impl AppConfig {
    pub fn figment() -> Figment {
        rocket::Config::figment()
            .join(Serialized::defaults(AppConfig::default()))
            .merge(Env::raw().only(&["database_url"]).global())
    }

    pub fn load() -> Result<Self, rocket::figment::Error> {
        Self::figment().extract()
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_database_url_comes_from_raw_env() {
        temp_env::with_vars(
            [
                ("DATABASE_URL", Some("sqlite://from-env.db")),
                ("ROCKET_CORS_ORIGIN", Some("https://grades.example.org")),
                ("ROCKET_SESSION_TTL_HOURS", Some("2")),
            ],
            || {
                let config = AppConfig::load().expect("Failed to load config");

                assert_eq!(config.database_url, "sqlite://from-env.db");
                assert_eq!(config.cors_origin, "https://grades.example.org");
                assert_eq!(config.session_ttl_hours, 2);
                assert_eq!(config.session_ttl(), chrono::Duration::hours(2));
            },
        );
    }

    #[test]
    #[serial]
    fn test_defaults_apply_without_env() {
        temp_env::with_vars_unset(
            [
                "DATABASE_URL",
                "ROCKET_CORS_ORIGIN",
                "ROCKET_SESSION_TTL_HOURS",
                "ROCKET_DATABASE_URL",
                "ROCKET_CONFIG",
            ],
            || {
                let config = Figment::from(Serialized::defaults(AppConfig::default()))
                    .extract::<AppConfig>()
                    .expect("Failed to extract defaults");

                assert_eq!(config.database_url, "sqlite://gradebook.db");
                assert_eq!(config.cors_origin, "http://localhost:3000");
                assert_eq!(config.session_ttl_hours, 12);
                assert!(config.bootstrap_admin.is_none());
            },
        );
    }
}
