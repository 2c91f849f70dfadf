mod common;

use serde_json::json;

use kitchen_pa::intents::resolve::ResolveAction;
use kitchen_pa::matcher::ItemKind;
use kitchen_pa::reminders::ReminderStatus;
use kitchen_pa::services::{Assistant, Outcome};
use kitchen_pa::tasks::{Priority, TaskStatus};

use common::{clock_at, open_assistant, ScriptedLlm};

async fn reminder_status(assistant: &Assistant, key: &str) -> ReminderStatus {
    assistant
        .reminders()
        .store()
        .list_for_date("2024-06-01")
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.reminder_key == key)
        .unwrap()
        .status
}

#[tokio::test]
async fn took_morning_meds_resolves_the_morning_reminder() {
    let llm = ScriptedLlm::new();
    let (assistant, _dir) = open_assistant(llm, clock_at("2024-06-01", "08:40")).await;
    assistant.reminders().arm_today().await.unwrap();

    let outcome = assistant.resolve("I took my morning meds").await.unwrap();
    let Outcome::Resolved {
        action,
        item,
        changed,
        message,
    } = outcome
    else {
        panic!("expected resolved outcome");
    };
    assert_eq!(action, ResolveAction::Complete);
    assert_eq!(item.kind, ItemKind::Reminder);
    assert_eq!(item.label, "Morning meds");
    assert!(changed);
    assert_eq!(message, "Marked \"Morning meds\" as done.");

    assert_eq!(reminder_status(&assistant, "morning_meds").await, ReminderStatus::Done);
    assert_eq!(reminder_status(&assistant, "evening_meds").await, ReminderStatus::Active);
}

#[tokio::test]
async fn second_resolution_reports_already_handled() {
    let llm = ScriptedLlm::new();
    let (assistant, _dir) = open_assistant(llm, clock_at("2024-06-01", "08:40")).await;
    assistant.reminders().arm_today().await.unwrap();

    assistant.resolve("took my morning meds").await.unwrap();
    let outcome = assistant.resolve("took my morning meds").await.unwrap();
    let Outcome::Resolved { changed, message, .. } = outcome else {
        panic!("expected resolved outcome");
    };
    assert!(!changed);
    assert!(message.contains("already taken care of"));
}

#[tokio::test]
async fn listed_id_from_the_model_is_used() {
    let llm = ScriptedLlm::new();
    let (assistant, _dir) = open_assistant(llm.clone(), clock_at("2024-06-01", "10:00")).await;
    let plumber = assistant.add_task("Call the plumber", None).await.unwrap();
    assistant.add_task("Call mum", None).await.unwrap();
    llm.script(
        "resolve_intent",
        json!({"action": "delete", "target": "task", "target_id": plumber.id, "title": null}),
    );

    let outcome = assistant.resolve("scrap that plumber job").await.unwrap();
    let Outcome::Resolved { action, item, message, .. } = outcome else {
        panic!("expected resolved outcome");
    };
    assert_eq!(action, ResolveAction::Delete);
    assert_eq!(item.id, plumber.id);
    assert_eq!(message, "Removed \"Call the plumber\".");

    let open: Vec<String> = assistant
        .tasks()
        .list_open()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.title)
        .collect();
    assert_eq!(open, vec!["Call mum"]);
}

#[tokio::test]
async fn completing_a_task_by_title() {
    let llm = ScriptedLlm::new();
    let (assistant, _dir) = open_assistant(llm.clone(), clock_at("2024-06-01", "10:00")).await;
    let task = assistant.add_task("Hoover the stairs", Some("trivial")).await.unwrap();
    llm.script(
        "resolve_intent",
        json!({"action": "complete", "target": "task", "target_id": null, "title": "hoover"}),
    );

    assistant.resolve("finished hoovering").await.unwrap();
    let stored = assistant.tasks().get(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Done);
}

#[tokio::test]
async fn chatter_without_a_completion_verb_is_no_intent() {
    let llm = ScriptedLlm::new();
    let (assistant, _dir) = open_assistant(llm, clock_at("2024-06-01", "08:40")).await;
    assistant.reminders().arm_today().await.unwrap();

    let outcome = assistant.resolve("meds are boring").await.unwrap();
    assert_eq!(outcome.status(), "no_intent");
}

#[tokio::test]
async fn unknown_target_is_no_match() {
    let llm = ScriptedLlm::new();
    llm.script(
        "resolve_intent",
        json!({"action": "delete", "target": "event", "target_id": null, "title": "school fete"}),
    );
    let (assistant, _dir) = open_assistant(llm, clock_at("2024-06-01", "10:00")).await;

    let outcome = assistant.resolve("cancel the school fete").await.unwrap();
    assert_eq!(outcome.status(), "no_match");
}

#[tokio::test]
async fn provider_outage_falls_back_to_local_matching() {
    let llm = ScriptedLlm::new();
    llm.go_offline();
    let (assistant, _dir) = open_assistant(llm, clock_at("2024-06-01", "08:40")).await;
    assistant.reminders().arm_today().await.unwrap();

    let outcome = assistant.resolve("I took my evening meds").await.unwrap();
    let Outcome::Resolved { item, .. } = outcome else {
        panic!("expected resolved outcome");
    };
    assert_eq!(item.label, "Evening meds");
}

#[tokio::test]
async fn task_becomes_an_event() {
    let llm = ScriptedLlm::new();
    let (assistant, _dir) = open_assistant(llm.clone(), clock_at("2024-06-01", "10:00")).await;
    let task = assistant.add_task("Book the car service", None).await.unwrap();
    llm.script(
        "reclassify_intent",
        json!({"target_type": "event", "title": "car service", "date": "2024-06-05", "time": "14:00"}),
    );

    let outcome = assistant
        .reclassify("make the car service an event on Wednesday at 2pm")
        .await
        .unwrap();
    let Outcome::Created { created, message } = outcome else {
        panic!("expected created outcome");
    };
    assert_eq!(message, "Turned \"Book the car service\" into an event.");
    let event = &created.events[0];
    assert_eq!(event.title, "Book the car service");
    assert_eq!(event.event_date, "2024-06-05");
    assert_eq!(event.start_hhmm.as_deref(), Some("14:00"));
    assert_eq!(event.end_hhmm.as_deref(), Some("14:30"));
    assert!(assistant.tasks().get(task.id).await.unwrap().is_none());
}

#[tokio::test]
async fn ambiguous_reclassify_asks_first() {
    let llm = ScriptedLlm::new();
    let (assistant, _dir) = open_assistant(llm.clone(), clock_at("2024-06-01", "10:00")).await;
    let first = assistant.add_task("Dentist forms", None).await.unwrap();
    assistant.add_task("Dentist payment", None).await.unwrap();
    llm.script(
        "reclassify_intent",
        json!({"target_type": "reminder", "title": "dentist", "date": null, "time": null}),
    );

    let outcome = assistant
        .reclassify("turn the dentist thing into a reminder")
        .await
        .unwrap();
    let Outcome::NeedsConfirmation { target, options, .. } = outcome else {
        panic!("expected a confirmation request");
    };
    assert_eq!(target, ItemKind::Reminder);
    assert_eq!(options.len(), 2);

    let confirmed = assistant
        .confirm_reclassify(ItemKind::Reminder, ItemKind::Task, first.id)
        .await
        .unwrap();
    let Outcome::Created { created, .. } = confirmed else {
        panic!("expected created outcome");
    };
    assert_eq!(created.reminders[0].label, "Dentist forms");
    assert_eq!(created.reminders[0].scheduled_hhmm, "11:00");
    assert!(assistant.tasks().get(first.id).await.unwrap().is_none());
}

#[tokio::test]
async fn confirming_a_missing_item_is_not_found() {
    let llm = ScriptedLlm::new();
    let (assistant, _dir) = open_assistant(llm, clock_at("2024-06-01", "10:00")).await;

    let err = assistant
        .confirm_reclassify(ItemKind::Event, ItemKind::Task, 404)
        .await
        .unwrap_err();
    assert!(matches!(err, kitchen_pa::error::KitchenPaError::NotFound(_)));
}

#[tokio::test]
async fn priority_change_uses_the_keyword_fallback() {
    let llm = ScriptedLlm::new();
    let (assistant, _dir) = open_assistant(llm, clock_at("2024-06-01", "10:00")).await;
    assistant.add_task("Tax return", None).await.unwrap();
    assistant.add_task("Hoover", None).await.unwrap();

    let outcome = assistant
        .change_priority("the tax return is urgent")
        .await
        .unwrap();
    let Outcome::Updated { task, message } = outcome else {
        panic!("expected updated outcome");
    };
    let task = task.unwrap();
    assert_eq!(task.title, "Tax return");
    assert_eq!(task.priority, Priority::Vital);
    assert_eq!(message, "\"Tax return\" is now vital.");

    let next = assistant.tasks().next_task().await.unwrap().unwrap();
    assert_eq!(next.title, "Tax return");
}
