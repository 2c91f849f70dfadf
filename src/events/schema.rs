diesel::table! {
    events (id) {
        id -> Integer,
        title -> Text,
        event_date -> Text,
        start_hhmm -> Nullable<Text>,
        end_hhmm -> Nullable<Text>,
        all_day -> Bool,
        reminder_preset -> Text,
        created_at -> BigInt,
    }
}
