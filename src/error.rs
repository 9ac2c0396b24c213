use std::fmt::Formatter;

use crate::config::ConfigError;
use crate::data::repo::RepoError;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Pool(r2d2::Error),
    Migration(String),
    Http(reqwest::Error),
    Collect(RepoError),
    Blocking(String),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "Configuration error: {}", err),
            AppError::Pool(err) => write!(f, "Could not create connection pool: {}", err),
            AppError::Migration(err) => write!(f, "Error while running migrations: {}", err),
            AppError::Http(err) => write!(f, "Could not build HTTP client: {}", err),
            AppError::Collect(err) => write!(f, "Collection failed: {}", err),
            AppError::Blocking(err) => write!(f, "Blocking task failed: {}", err),
        }
    }
}

impl std::error::Error for AppError {}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<r2d2::Error> for AppError {
    fn from(err: r2d2::Error) -> Self {
        AppError::Pool(err)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Http(err)
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        AppError::Collect(err)
    }
}

impl From<actix_rt::task::JoinError> for AppError {
    fn from(err: actix_rt::task::JoinError) -> Self {
        AppError::Blocking(err.to_string())
    }
}
