use chrono::Utc;
use diesel::pg::upsert::excluded;
use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use crate::data::models::{CheckpointKey, NewCheckpoint};

/// Last code recorded for `key`.
pub fn current_checkpoint(
    conn: &mut PgConnection,
    key: &CheckpointKey,
) -> QueryResult<Option<String>> {
    use crate::data::schema::checkpoints::dsl::*;

    checkpoints
        .select(last_code)
        .filter(range_start.eq(&key.range_start))
        .filter(range_end.eq(&key.range_end))
        .filter(city_filter.eq(&key.city_filter))
        .first(conn)
        .optional()
}

/// Moves the checkpoint for `key` forward to `code`. Codes are fixed width,
/// so comparing the strings compares the numbers.
pub fn advance_checkpoint(
    conn: &mut PgConnection,
    key: &CheckpointKey,
    code: String,
) -> QueryResult<usize> {
    use crate::data::schema::checkpoints::dsl::*;

    conn.transaction(|conn| {
        let current = current_checkpoint(conn, key)?;
        if current.map_or(false, |stored| stored >= code) {
            return Ok(0);
        }

        let new_checkpoint = NewCheckpoint {
            id: Uuid::new_v4(),
            range_start: &key.range_start,
            range_end: &key.range_end,
            city_filter: &key.city_filter,
            last_code: code,
            updated_at: Utc::now().naive_utc()
        };

        diesel::insert_into(checkpoints)
            .values(&new_checkpoint)
            .on_conflict((range_start, range_end, city_filter))
            .do_update()
            .set((
                last_code.eq(excluded(last_code)),
                updated_at.eq(excluded(updated_at))
            ))
            .execute(conn)
    })
}
