#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod config;
mod cors;
mod db;
mod env;
mod error;
mod models;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use api::{
    api_create_subject, api_create_user, api_delete_subject, api_delete_user, api_get_my_grades,
    api_get_student_grades, api_get_students, api_get_subjects, api_get_users, api_login,
    api_logout, api_me, api_update_grade, health, index,
};
use auth::{
    Role, bad_request_api, forbidden_api, internal_error_api, not_found_api, unauthorized_api,
    unprocessable_api,
};
use config::{AppConfig, BootstrapAdmin};
use cors::CorsFairing;
use db::{MIGRATOR, clean_expired_sessions, connect, ensure_user};
use error::AppError;
use models::NewUser;
use rocket::{Build, Rocket};
use telemetry::{TelemetryFairing, init_tracing};
use thiserror::Error;

use sqlx::{Pool, Sqlite};
use tracing::{error, info, warn};

const SESSION_CLEANUP_DELAY_SECS: u64 = 5;
const SESSION_CLEANUP_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Env(#[from] dotenvy::Error),
    #[error("{0}")]
    Figment(Box<rocket::figment::Error>),
    #[error("{0}")]
    Rocket(Box<rocket::Error>),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

impl From<rocket::figment::Error> for Error {
    fn from(value: rocket::figment::Error) -> Self {
        Error::Figment(Box::new(value))
    }
}

impl From<rocket::Error> for Error {
    fn from(value: rocket::Error) -> Self {
        Error::Rocket(Box::new(value))
    }
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    let env_files = env::load_environment()?;
    let _telemetry = init_tracing();
    env_files.iter().for_each(env::EnvFile::log);

    let config = AppConfig::load()?;
    let pool = connect(&config.database_url).await?;

    info!("Running database migrations...");
    MIGRATOR.run(&pool).await.map_err(AppError::from)?;
    info!("Migrations completed successfully");

    if let Some(admin) = &config.bootstrap_admin {
        bootstrap_admin(&pool, admin).await?;
    }

    spawn_session_cleanup(pool.clone());

    init_rocket(pool, config).launch().await?;

    Ok(())
}

async fn bootstrap_admin(pool: &Pool<Sqlite>, admin: &BootstrapAdmin) -> Result<(), AppError> {
    let user = ensure_user(
        pool,
        &NewUser {
            full_name: &admin.full_name,
            email: &admin.email,
            role: Role::Admin,
            username: &admin.username,
            password: &admin.password,
        },
    )
    .await?;

    if user.role != Role::Admin {
        warn!(email = %admin.email, role = %user.role, "Bootstrap admin email belongs to a non-admin user");
    }

    Ok(())
}

fn spawn_session_cleanup(pool: Pool<Sqlite>) {
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(SESSION_CLEANUP_DELAY_SECS)).await;

        loop {
            match clean_expired_sessions(&pool).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(SESSION_CLEANUP_INTERVAL_SECS))
                .await;
        }
    });
}

pub fn init_rocket(pool: Pool<Sqlite>, config: AppConfig) -> Rocket<Build> {
    info!("Starting gradebook");

    rocket::build()
        .attach(CorsFairing::new(config.cors_origin.clone()))
        .manage(pool)
        .manage(config)
        .mount("/", routes![index])
        .mount(
            "/api",
            routes![
                api_login,
                api_logout,
                api_me,
                api_get_students,
                api_get_my_grades,
                api_get_student_grades,
                api_update_grade,
                api_get_subjects,
                api_create_subject,
                api_delete_subject,
                api_create_user,
                api_get_users,
                api_delete_user,
                health,
            ],
        )
        .register(
            "/",
            catchers![
                bad_request_api,
                unauthorized_api,
                forbidden_api,
                not_found_api,
                unprocessable_api,
                internal_error_api,
            ],
        )
        .attach(TelemetryFairing)
}
