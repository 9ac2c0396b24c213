use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::data::models::{Address, CheckpointKey, NormalizedAddress};
use crate::data::repo::{AddressRepository, RepoError, UpsertOutcome};
use crate::postcode::{Cep, CepRange};
use crate::text::CityFilter;

/// Repository kept entirely in process memory, used by the collector tests.
#[derive(Default)]
pub struct MemoryRepository {
    addresses: Mutex<BTreeMap<Cep, Address>>,
    checkpoints: Mutex<HashMap<CheckpointKey, Cep>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<T>, RepoError> {
    mutex
        .lock()
        .map_err(|_| RepoError::Blocking("memory store lock poisoned".into()))
}

impl MemoryRepository {
    pub fn new() -> MemoryRepository {
        MemoryRepository::default()
    }

    pub fn get(&self, code: Cep) -> Option<Address> {
        lock(&self.addresses)
            .ok()
            .and_then(|addresses| addresses.get(&code).cloned())
    }

    pub fn len(&self) -> usize {
        lock(&self.addresses).map(|addresses| addresses.len()).unwrap_or(0)
    }

    fn matching<'a>(
        addresses: &'a BTreeMap<Cep, Address>,
        range: &CepRange,
        city_filter: Option<&'a CityFilter>,
    ) -> impl DoubleEndedIterator<Item = (&'a Cep, &'a Address)> + 'a {
        addresses
            .range(range.start..=range.end)
            .filter(move |(_, address)| city_filter.map_or(true, |f| f.matches(&address.city)))
    }
}

#[async_trait]
impl AddressRepository for MemoryRepository {
    async fn exists(&self, code: Cep) -> Result<bool, RepoError> {
        Ok(lock(&self.addresses)?.contains_key(&code))
    }

    async fn upsert(&self, address: &NormalizedAddress) -> Result<UpsertOutcome, RepoError> {
        let now = Utc::now().naive_utc();
        let mut addresses = lock(&self.addresses)?;
        match addresses.get_mut(&address.record.postcode) {
            Some(existing) => {
                existing.apply(address, now);
                Ok(UpsertOutcome::Updated)
            }
            None => {
                addresses.insert(address.record.postcode, Address::new(address, now));
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn max_code_in_range(
        &self,
        range: &CepRange,
        city_filter: Option<&CityFilter>,
    ) -> Result<Option<Cep>, RepoError> {
        let addresses = lock(&self.addresses)?;
        let max = Self::matching(&addresses, range, city_filter)
            .next_back()
            .map(|(code, _)| *code);
        Ok(max)
    }

    async fn count_in_range(
        &self,
        range: &CepRange,
        city_filter: Option<&CityFilter>,
    ) -> Result<i64, RepoError> {
        let addresses = lock(&self.addresses)?;
        Ok(Self::matching(&addresses, range, city_filter).count() as i64)
    }

    async fn count_by_city(&self) -> Result<BTreeMap<String, i64>, RepoError> {
        let addresses = lock(&self.addresses)?;
        let mut counts = BTreeMap::new();
        for address in addresses.values() {
            *counts.entry(address.city.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn checkpoint(&self, key: &CheckpointKey) -> Result<Option<Cep>, RepoError> {
        Ok(lock(&self.checkpoints)?.get(key).copied())
    }

    async fn save_checkpoint(&self, key: &CheckpointKey, code: Cep) -> Result<(), RepoError> {
        let mut checkpoints = lock(&self.checkpoints)?;
        let entry = checkpoints.entry(key.clone()).or_insert(code);
        if code > *entry {
            *entry = code;
        }
        Ok(())
    }
}
