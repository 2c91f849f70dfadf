diesel::table! {
    work_days (date) {
        date -> Text,
        is_work -> Bool,
        start_hhmm -> Nullable<Text>,
        end_hhmm -> Nullable<Text>,
    }
}
