use diesel::pg::PgConnection;
use diesel::r2d2::ConnectionManager;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::config::DatabaseConfig;

pub type Pool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub fn init_connection_pool(config: &DatabaseConfig) -> Result<Pool, r2d2::Error> {
    let manager = ConnectionManager::<PgConnection>::new(config.url.as_str());
    r2d2::Pool::builder()
        .max_size(config.pool_size)
        .build(manager)
}

/// Applies pending migrations and returns how many ran.
pub fn run_migrations(conn: &mut PgConnection) -> Result<usize, String> {
    conn.run_pending_migrations(MIGRATIONS)
        .map(|versions| versions.len())
        .map_err(|err| err.to_string())
}

#[cfg(test)]
pub fn init_test_connection_pool() -> Pool {
    dotenv::dotenv().ok();

    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set");

    let manager = ConnectionManager::<PgConnection>::new(database_url);
    r2d2::Pool::builder()
        .max_size(2)
        .build(manager)
        .expect("Failed to create test db pool")
}
