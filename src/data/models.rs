use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::data::schema::{addresses, checkpoints};
use crate::postcode::{Cep, CepRange};
use crate::text::{normalize, CityFilter};

/// Address as answered by an upstream provider, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressRecord {
    pub postcode: Cep,
    pub street: String,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    pub complement: String,
    pub source: String,
}

impl AddressRecord {
    pub fn normalized(self) -> NormalizedAddress {
        NormalizedAddress {
            street_normalized: normalize(&self.street),
            neighborhood_normalized: normalize(&self.neighborhood),
            city_normalized: normalize(&self.city),
            record: self,
        }
    }
}

/// A provider record with its accent-insensitive search keys, ready to be
/// persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAddress {
    pub record: AddressRecord,
    pub street_normalized: String,
    pub neighborhood_normalized: String,
    pub city_normalized: String,
}

#[derive(Queryable, Debug, Clone, PartialEq)]
pub struct Address {
    pub id: Uuid,
    pub postcode: String,
    pub street: String,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    pub complement: String,
    pub street_normalized: String,
    pub neighborhood_normalized: String,
    pub city_normalized: String,
    pub source: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Address {
    pub fn new(address: &NormalizedAddress, now: NaiveDateTime) -> Address {
        let record = &address.record;
        Address {
            id: Uuid::new_v4(),
            postcode: record.postcode.to_string(),
            street: record.street.clone(),
            neighborhood: record.neighborhood.clone(),
            city: record.city.clone(),
            state: record.state.clone(),
            complement: record.complement.clone(),
            street_normalized: address.street_normalized.clone(),
            neighborhood_normalized: address.neighborhood_normalized.clone(),
            city_normalized: address.city_normalized.clone(),
            source: record.source.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrites the mutable fields, keeping identity and `created_at`.
    pub fn apply(&mut self, address: &NormalizedAddress, now: NaiveDateTime) {
        let record = &address.record;
        self.street = record.street.clone();
        self.neighborhood = record.neighborhood.clone();
        self.city = record.city.clone();
        self.state = record.state.clone();
        self.complement = record.complement.clone();
        self.street_normalized = address.street_normalized.clone();
        self.neighborhood_normalized = address.neighborhood_normalized.clone();
        self.city_normalized = address.city_normalized.clone();
        self.source = record.source.clone();
        self.updated_at = now;
    }
}

#[derive(Insertable)]
#[diesel(table_name = addresses)]
pub struct NewAddress<'a> {
    pub id: Uuid,
    pub postcode: String,
    pub street: &'a str,
    pub neighborhood: &'a str,
    pub city: &'a str,
    pub state: &'a str,
    pub complement: &'a str,
    pub street_normalized: &'a str,
    pub neighborhood_normalized: &'a str,
    pub city_normalized: &'a str,
    pub source: &'a str,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl<'a> NewAddress<'a> {
    pub fn from_normalized(address: &'a NormalizedAddress, now: NaiveDateTime) -> NewAddress<'a> {
        let record = &address.record;
        NewAddress {
            id: Uuid::new_v4(),
            postcode: record.postcode.to_string(),
            street: &record.street,
            neighborhood: &record.neighborhood,
            city: &record.city,
            state: &record.state,
            complement: &record.complement,
            street_normalized: &address.street_normalized,
            neighborhood_normalized: &address.neighborhood_normalized,
            city_normalized: &address.city_normalized,
            source: &record.source,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Identifies the scan a checkpoint belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointKey {
    pub range_start: String,
    pub range_end: String,
    pub city_filter: String,
}

impl CheckpointKey {
    pub fn new(range: &CepRange, city_filter: Option<&CityFilter>) -> CheckpointKey {
        CheckpointKey {
            range_start: range.start.to_string(),
            range_end: range.end.to_string(),
            city_filter: city_filter
                .map(|f| f.normalized().to_owned())
                .unwrap_or_default(),
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = checkpoints)]
pub struct NewCheckpoint<'a> {
    pub id: Uuid,
    pub range_start: &'a str,
    pub range_end: &'a str,
    pub city_filter: &'a str,
    pub last_code: String,
    pub updated_at: NaiveDateTime,
}
