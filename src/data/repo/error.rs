use std::fmt::Formatter;

#[derive(Debug)]
pub enum RepoError {
    Database(diesel::result::Error),
    Pool(r2d2::Error),
    /// The blocking task running the query panicked or was cancelled
    Blocking(String),
    /// A stored value could not be read back, e.g. a malformed postcode
    InvalidData(String),
}

impl std::fmt::Display for RepoError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let msg = match self {
            RepoError::Database(inner) => format!("Database: {}", inner),
            RepoError::Pool(inner) => format!("Connection pool: {}", inner),
            RepoError::Blocking(inner) => format!("Blocking task: {}", inner),
            RepoError::InvalidData(inner) => format!("Invalid stored data: {}", inner),
        };
        write!(f, "Repository error: {}", msg)
    }
}

impl std::error::Error for RepoError {}

impl From<diesel::result::Error> for RepoError {
    fn from(error: diesel::result::Error) -> Self {
        RepoError::Database(error)
    }
}

impl From<r2d2::Error> for RepoError {
    fn from(error: r2d2::Error) -> Self {
        RepoError::Pool(error)
    }
}

impl From<actix_rt::task::JoinError> for RepoError {
    fn from(error: actix_rt::task::JoinError) -> Self {
        RepoError::Blocking(error.to_string())
    }
}

impl From<crate::postcode::InvalidCep> for RepoError {
    fn from(error: crate::postcode::InvalidCep) -> Self {
        RepoError::InvalidData(error.to_string())
    }
}
