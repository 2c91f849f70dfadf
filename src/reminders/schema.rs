diesel::table! {
    reminder_schedules (id) {
        id -> Integer,
        reminder_key -> Text,
        label -> Text,
        speak_text -> Text,
        time_hhmm -> Text,
        day_type -> Text,
        repeat_every_min -> Integer,
        enabled -> Bool,
    }
}

diesel::table! {
    active_reminders (id) {
        id -> Integer,
        reminder_key -> Text,
        label -> Text,
        speak_text -> Text,
        dose_date -> Text,
        scheduled_hhmm -> Text,
        status -> Text,
        next_fire_at -> BigInt,
        created_at -> BigInt,
    }
}

diesel::table! {
    reminder_log (id) {
        id -> Integer,
        reminder_key -> Text,
        action -> Text,
        ts -> BigInt,
    }
}

diesel::allow_tables_to_appear_in_same_query!(reminder_schedules, active_reminders, reminder_log);
