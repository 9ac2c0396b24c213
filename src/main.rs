use std::sync::Arc;

use indicatif::ProgressBar;
use log::{error, info};

use crate::collector::{CancelFlag, CollectionRunner};
use crate::config::AppConfig;
use crate::data::repo::{AddressRepository, PgRepository};
use crate::db::{init_connection_pool, run_migrations};
use crate::error::AppError;
use crate::providers::{http_client, Provider, ProviderChain};

mod collector;
mod config;
mod data;
mod db;
mod error;
mod postcode;
mod providers;
mod text;

#[actix_rt::main]
async fn main() -> Result<(), AppError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env()?;

    let pool = init_connection_pool(&config.database)?;
    let migration_pool = pool.clone();
    let applied = actix_rt::task::spawn_blocking(move || -> Result<usize, AppError> {
        let mut conn = migration_pool.get()?;
        run_migrations(&mut conn).map_err(AppError::Migration)
    })
    .await??;
    info!("Applied {} pending migrations", applied);

    let repo = Arc::new(PgRepository::new(pool));

    let client = http_client(config.http_timeout)?;
    let providers: Vec<Box<dyn Provider>> = config
        .providers
        .iter()
        .map(|kind| kind.build(client.clone()))
        .collect();
    let chain = match ProviderChain::new(providers, config.retry.clone()) {
        Some(chain) => chain,
        None => return Err(AppError::Config(config::ConfigError::Missing("CEP_PROVIDERS"))),
    };

    let cancel = CancelFlag::new();
    let signal_cancel = cancel.clone();
    actix_rt::spawn(async move {
        if actix_rt::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current code");
            signal_cancel.cancel();
        }
    });

    let runner = CollectionRunner::new(repo.clone(), chain)
        .with_cancel_flag(cancel)
        .with_progress(ProgressBar::new(config.max_results));

    let stats = runner.collect(config.collect_options()).await?;
    info!(
        "Finished ({:?}): {} new, {} stored matching the filter, last code {}",
        stats.state,
        stats.found,
        stats.total_persisted_matching_filter,
        stats.last_code.map_or("-".to_string(), |code| code.to_string())
    );

    match repo.count_by_city().await {
        Ok(cities) => {
            for (city, count) in cities.iter() {
                info!("{}: {}", city, count);
            }
        }
        Err(err) => error!("Could not count addresses by city: {}", err),
    }

    Ok(())
}
