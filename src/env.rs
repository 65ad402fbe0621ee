use std::io::ErrorKind;
use std::path::Path;

use tracing::{info, warn};

const COMMON_ENV: &str = "config/common.env";
const SECRETS_ENV: &str = ".secrets.env";

/// Outcome of one env file, kept so it can be logged once tracing is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvFile {
    Loaded(&'static str),
    Missing(&'static str),
}

impl EnvFile {
    pub fn log(&self) {
        match self {
            EnvFile::Loaded(path) => info!(path = %path, "Loaded environment file"),
            EnvFile::Missing(path) => warn!(path = %path, "Environment file not found, skipping"),
        }
    }
}

/// Later files override earlier ones; missing files are skipped.
pub fn load_environment() -> Result<Vec<EnvFile>, dotenvy::Error> {
    let profile = dotenvy::var("ROCKET_PROFILE").unwrap_or_else(|_| "debug".to_string());

    [COMMON_ENV, profile_env_file(&profile), SECRETS_ENV]
        .into_iter()
        .map(load_env_file)
        .collect()
}

fn profile_env_file(profile: &str) -> &'static str {
    match profile {
        "release" | "production" => "config/prod.env",
        _ => "config/dev.env",
    }
}

fn load_env_file(path: &'static str) -> Result<EnvFile, dotenvy::Error> {
    match dotenvy::from_path_override(Path::new(path)) {
        Ok(()) => Ok(EnvFile::Loaded(path)),
        Err(dotenvy::Error::Io(err)) if err.kind() == ErrorKind::NotFound => {
            Ok(EnvFile::Missing(path))
        }
        Err(err) => Err(err),
    }
}
