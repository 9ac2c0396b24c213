diesel::table! {
    addresses (id) {
        id -> Uuid,
        postcode -> Text,
        street -> Text,
        neighborhood -> Text,
        city -> Text,
        state -> Text,
        complement -> Text,
        street_normalized -> Text,
        neighborhood_normalized -> Text,
        city_normalized -> Text,
        source -> Text,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    checkpoints (id) {
        id -> Uuid,
        range_start -> Text,
        range_end -> Text,
        city_filter -> Text,
        last_code -> Text,
        updated_at -> Timestamp,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    addresses,
    checkpoints,
);
