use std::collections::BTreeMap;

use async_trait::async_trait;
use diesel::prelude::*;

use crate::data::models::{CheckpointKey, NormalizedAddress};
use crate::data::repo::{addresses, checkpoints, AddressRepository, RepoError, UpsertOutcome};
use crate::db::Pool;
use crate::postcode::{Cep, CepRange};
use crate::text::CityFilter;

/// PostgreSQL-backed repository. Diesel is synchronous, so every query runs
/// on the blocking pool with its own pooled connection.
#[derive(Clone)]
pub struct PgRepository {
    pool: Pool,
}

impl PgRepository {
    pub fn new(pool: Pool) -> PgRepository {
        PgRepository { pool }
    }

    async fn run<F, T>(&self, query: F) -> Result<T, RepoError>
    where
        F: FnOnce(&mut PgConnection) -> QueryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        actix_rt::task::spawn_blocking(move || -> Result<T, RepoError> {
            let mut conn = pool.get()?;
            query(&mut *conn).map_err(RepoError::from)
        })
        .await?
    }
}

#[async_trait]
impl AddressRepository for PgRepository {
    async fn exists(&self, code: Cep) -> Result<bool, RepoError> {
        let code = code.to_string();
        self.run(move |conn| addresses::address_exists(conn, &code)).await
    }

    async fn upsert(&self, address: &NormalizedAddress) -> Result<UpsertOutcome, RepoError> {
        let address = address.clone();
        self.run(move |conn| addresses::create_or_update_address(conn, &address)).await
    }

    async fn max_code_in_range(
        &self,
        range: &CepRange,
        city_filter: Option<&CityFilter>,
    ) -> Result<Option<Cep>, RepoError> {
        let range = *range;
        let city_filter = city_filter.cloned();
        let max = self
            .run(move |conn| addresses::max_code_in_range(conn, &range, city_filter.as_ref()))
            .await?;

        match max {
            Some(code) => Ok(Some(code.parse::<Cep>()?)),
            None => Ok(None),
        }
    }

    async fn count_in_range(
        &self,
        range: &CepRange,
        city_filter: Option<&CityFilter>,
    ) -> Result<i64, RepoError> {
        let range = *range;
        let city_filter = city_filter.cloned();
        self.run(move |conn| addresses::count_in_range(conn, &range, city_filter.as_ref()))
            .await
    }

    async fn count_by_city(&self) -> Result<BTreeMap<String, i64>, RepoError> {
        self.run(addresses::count_by_city).await
    }

    async fn checkpoint(&self, key: &CheckpointKey) -> Result<Option<Cep>, RepoError> {
        let key = key.clone();
        let last_code = self
            .run(move |conn| checkpoints::current_checkpoint(conn, &key))
            .await?;

        match last_code {
            Some(code) => Ok(Some(code.parse::<Cep>()?)),
            None => Ok(None),
        }
    }

    async fn save_checkpoint(&self, key: &CheckpointKey, code: Cep) -> Result<(), RepoError> {
        let key = key.clone();
        let code = code.to_string();
        self.run(move |conn| checkpoints::advance_checkpoint(conn, &key, code))
            .await
            .map(|_| ())
    }
}
