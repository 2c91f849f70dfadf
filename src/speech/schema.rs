diesel::table! {
    pronunciations (term) {
        term -> Text,
        pronunciation -> Text,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}
