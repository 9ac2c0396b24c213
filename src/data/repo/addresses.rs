use std::collections::BTreeMap;

use chrono::{NaiveDateTime, Utc};
use diesel::dsl::count_star;
use diesel::pg::upsert::excluded;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::Bool;

use crate::data::models::{NewAddress, NormalizedAddress};
use crate::data::repo::UpsertOutcome;
use crate::data::schema::addresses;
use crate::postcode::CepRange;
use crate::text::CityFilter;

type AddressPredicate = Box<dyn BoxableExpression<addresses::table, Pg, SqlType = Bool>>;

pub fn address_exists(conn: &mut PgConnection, code: &str) -> QueryResult<bool> {
    use crate::data::schema::addresses::dsl::*;

    diesel::select(diesel::dsl::exists(addresses.filter(postcode.eq(code))))
        .get_result(conn)
}

pub fn create_or_update_address(
    conn: &mut PgConnection,
    address: &NormalizedAddress,
) -> QueryResult<UpsertOutcome> {
    use crate::data::schema::addresses::dsl::*;

    let now = Utc::now().naive_utc();
    let new_address = NewAddress::from_normalized(address, now);

    let (created, updated) = diesel::insert_into(addresses)
        .values(&new_address)
        .on_conflict(postcode)
        .do_update()
        .set((
            street.eq(excluded(street)),
            neighborhood.eq(excluded(neighborhood)),
            city.eq(excluded(city)),
            state.eq(excluded(state)),
            complement.eq(excluded(complement)),
            street_normalized.eq(excluded(street_normalized)),
            neighborhood_normalized.eq(excluded(neighborhood_normalized)),
            city_normalized.eq(excluded(city_normalized)),
            source.eq(excluded(source)),
            updated_at.eq(excluded(updated_at))
        ))
        .returning((created_at, updated_at))
        .get_result::<(NaiveDateTime, NaiveDateTime)>(conn)?;

    // A conflicting row keeps its original creation time
    if created == updated {
        Ok(UpsertOutcome::Inserted)
    } else {
        Ok(UpsertOutcome::Updated)
    }
}

fn in_range(range: &CepRange) -> AddressPredicate {
    use crate::data::schema::addresses::dsl::*;

    Box::new(postcode.between(range.start.to_string(), range.end.to_string()))
}

/// `%filter%` with the LIKE wildcards in the filter itself escaped.
fn contains_pattern(filter: &CityFilter) -> String {
    let mut pattern = String::from("%");
    for c in filter.normalized().chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Stored city contains the filter, or the filter contains the stored city.
fn city_matches(filter: &CityFilter) -> AddressPredicate {
    use crate::data::schema::addresses::dsl::*;

    Box::new(
        city_normalized
            .like(contains_pattern(filter))
            .escape('\\')
            .or(city_normalized.eq_any(filter.fragments()))
    )
}

pub fn max_code_in_range(
    conn: &mut PgConnection,
    range: &CepRange,
    city_filter: Option<&CityFilter>,
) -> QueryResult<Option<String>> {
    use crate::data::schema::addresses::dsl::*;

    let mut query = addresses
        .select(postcode)
        .filter(in_range(range))
        .into_boxed();
    if let Some(filter) = city_filter {
        query = query.filter(city_matches(filter));
    }

    query
        .order(postcode.desc())
        .first(conn)
        .optional()
}

pub fn count_in_range(
    conn: &mut PgConnection,
    range: &CepRange,
    city_filter: Option<&CityFilter>,
) -> QueryResult<i64> {
    use crate::data::schema::addresses::dsl::*;

    let mut query = addresses
        .select(count_star())
        .filter(in_range(range))
        .into_boxed();
    if let Some(filter) = city_filter {
        query = query.filter(city_matches(filter));
    }

    query.get_result(conn)
}

pub fn count_by_city(conn: &mut PgConnection) -> QueryResult<BTreeMap<String, i64>> {
    use crate::data::schema::addresses::dsl::*;

    let rows = addresses
        .group_by(city)
        .select((city, count_star()))
        .load::<(String, i64)>(conn)?;

    Ok(rows.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_pattern_escapes_wildcards() {
        let plain = CityFilter::new("Uberlândia").unwrap();
        assert_eq!(contains_pattern(&plain), "%UBERLANDIA%");

        let wild = CityFilter::new("a_b%c\\d").unwrap();
        assert_eq!(contains_pattern(&wild), "%A\\_B\\%C\\\\D%");
    }
}
