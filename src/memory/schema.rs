diesel::table! {
    memories (id) {
        id -> Integer,
        summary -> Text,
        kind -> Text,
        word_count -> Integer,
        embedding -> Nullable<Binary>,
        last_used_at -> Nullable<BigInt>,
        created_at -> BigInt,
    }
}

diesel::table! {
    conversation_messages (id) {
        id -> Integer,
        role -> Text,
        content -> Text,
        created_at -> BigInt,
    }
}

diesel::allow_tables_to_appear_in_same_query!(memories, conversation_messages);
