use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::data::models::{CheckpointKey, NormalizedAddress};
use crate::postcode::{Cep, CepRange};
use crate::text::CityFilter;

pub use self::error::RepoError;
pub use self::memory::MemoryRepository;
pub use self::postgres::PgRepository;

pub mod addresses;
pub mod checkpoints;
pub mod error;
pub mod memory;
pub mod postgres;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Storage seen by the collector. Each call is atomic on its own row; the
/// collector never needs a transaction spanning several codes.
#[async_trait]
pub trait AddressRepository: Send + Sync {
    async fn exists(&self, code: Cep) -> Result<bool, RepoError>;

    async fn upsert(&self, address: &NormalizedAddress) -> Result<UpsertOutcome, RepoError>;

    /// Highest stored code inside `range` whose city matches the filter.
    async fn max_code_in_range(
        &self,
        range: &CepRange,
        city_filter: Option<&CityFilter>,
    ) -> Result<Option<Cep>, RepoError>;

    async fn count_in_range(
        &self,
        range: &CepRange,
        city_filter: Option<&CityFilter>,
    ) -> Result<i64, RepoError>;

    async fn count_by_city(&self) -> Result<BTreeMap<String, i64>, RepoError>;

    async fn checkpoint(&self, key: &CheckpointKey) -> Result<Option<Cep>, RepoError>;

    /// Records `code` as the last processed one for `key`. A code lower than
    /// the stored one leaves the checkpoint untouched.
    async fn save_checkpoint(&self, key: &CheckpointKey, code: Cep) -> Result<(), RepoError>;
}
