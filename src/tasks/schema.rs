diesel::table! {
    tasks (id) {
        id -> Integer,
        title -> Text,
        priority -> Text,
        status -> Text,
        created_at -> BigInt,
    }
}
