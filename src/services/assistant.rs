use std::sync::Arc;

use serde::Serialize;

use super::conversation;
use super::today::{compose_summary, plural, summary_alerts, Dashboard, TodaySummary};
use crate::clock::{format_date, format_hhmm, parse_iso_date, SharedClock};
use crate::config::Config;
use crate::db::SqlitePool;
use crate::error::{KitchenPaError, Result};
use crate::events::{Event, EventStore, NewEventInput};
use crate::intents::prefilter::{self, Prefiltered, PRONUNCIATION_LOOKBACK};
use crate::intents::priority::extract_priority;
use crate::intents::reclassify::{choose_source, extract_reclassify, ReclassifyChoice, ReclassifyIntent};
use crate::intents::resolve::{
    extract_resolve, fallback_completion, pick_target, ResolveAction, ResolveIntent, ResolvePools,
};
use crate::intents::schedule::{extract_schedule, ScheduleIntent};
use crate::interfaces::providers::LlmProvider;
use crate::matcher::{self, Candidate, ItemKind, Scored};
use crate::memory::{MemoryLimits, MemoryStore, Role, DEFAULT_TOP_K};
use crate::reminders::{ActiveReminder, ReminderEngine, ReminderStore};
use crate::scheduling::{Created, SchedulingEngine};
use crate::speech::PronunciationStore;
use crate::tasks::{Priority, Task, TaskStore};
use crate::workdays::{Workday, WorkdayStore};

const RECENT_REMINDER_LIMIT: i64 = 20;
const DEFAULT_SNOOZE_MINUTES: i64 = 10;

/// Result of one assistant entry point, tagged by `status` on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Created {
        created: Created,
        message: String,
    },
    Resolved {
        action: ResolveAction,
        item: Candidate,
        changed: bool,
        message: String,
    },
    NeedsConfirmation {
        target: ItemKind,
        options: Vec<Scored>,
        message: String,
    },
    NoIntent {
        message: String,
    },
    NoMatch {
        message: String,
    },
    Updated {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        task: Option<Task>,
    },
    Reply {
        text: String,
    },
}

impl Outcome {
    pub fn status(&self) -> &'static str {
        match self {
            Outcome::Created { .. } => "created",
            Outcome::Resolved { .. } => "resolved",
            Outcome::NeedsConfirmation { .. } => "needs_confirmation",
            Outcome::NoIntent { .. } => "no_intent",
            Outcome::NoMatch { .. } => "no_match",
            Outcome::Updated { .. } => "updated",
            Outcome::Reply { .. } => "reply",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub user_name: String,
    pub assistant_name: String,
    pub history_hours: i64,
    pub top_k: usize,
    pub harvest: bool,
    pub snooze_minutes: i64,
}

impl AssistantSettings {
    pub fn from_config(config: &Config) -> Self {
        let memory = config.memory();
        Self {
            user_name: config.user_name(),
            assistant_name: config.assistant_name(),
            history_hours: config.history_hours(),
            top_k: memory.top_k.unwrap_or(DEFAULT_TOP_K),
            harvest: memory.harvest_enabled.unwrap_or(true),
            snooze_minutes: config
                .reminders()
                .snooze_minutes
                .unwrap_or(DEFAULT_SNOOZE_MINUTES),
        }
    }
}

fn memory_limits(config: &Config) -> MemoryLimits {
    let memory = config.memory();
    let defaults = MemoryLimits::default();
    MemoryLimits {
        top_k: memory.top_k.unwrap_or(defaults.top_k),
        fallback_limit: memory.fallback_limit.unwrap_or(defaults.fallback_limit),
        short_cap: memory.short_cap.unwrap_or(defaults.short_cap),
        long_cap: memory.long_cap.unwrap_or(defaults.long_cap),
    }
}

fn require_text(text: &str) -> Result<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Err(KitchenPaError::validation("text is required"));
    }
    Ok(text)
}

fn with_article(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Task => "a task",
        ItemKind::Reminder => "a reminder",
        ItemKind::Event => "an event",
    }
}

fn describe_created(created: &Created) -> String {
    let counts = [
        (created.tasks.len(), "task", "tasks"),
        (created.reminders.len(), "reminder", "reminders"),
        (created.events.len(), "event", "events"),
        (created.workdays.len(), "workday", "workdays"),
    ];
    let parts: Vec<String> = counts
        .into_iter()
        .filter(|(count, _, _)| *count > 0)
        .map(|(count, one, many)| plural(count, one, many))
        .collect();
    let mut message = format!("Saved {}.", parts.join(", "));
    if !created.skipped.is_empty() {
        message.push_str(&format!(" Skipped: {}.", created.skipped.join("; ")));
    }
    message
}

/// Entry points behind the `/api/ai/*` routes plus the CRUD helpers the daemon needs.
pub struct Assistant {
    llm: Arc<dyn LlmProvider>,
    clock: SharedClock,
    tasks: Arc<TaskStore>,
    events: Arc<EventStore>,
    workdays: Arc<WorkdayStore>,
    memory: Arc<MemoryStore>,
    pronunciations: Arc<PronunciationStore>,
    reminders: Arc<ReminderEngine>,
    scheduling: SchedulingEngine,
    settings: AssistantSettings,
}

impl Assistant {
    /// Opens the database, seeds the default reminder schedules and wires every store.
    pub async fn open(config: &Config, llm: Arc<dyn LlmProvider>, clock: SharedClock) -> Result<Self> {
        let pool = crate::db::open_pool(&config.sqlite_path()).await?;
        let assistant = Self::with_pool(pool, config, llm, clock);
        assistant.reminders.store().seed_defaults_if_empty().await?;
        Ok(assistant)
    }

    pub fn with_pool(
        pool: SqlitePool,
        config: &Config,
        llm: Arc<dyn LlmProvider>,
        clock: SharedClock,
    ) -> Self {
        let settings = AssistantSettings::from_config(config);
        let tasks = Arc::new(TaskStore::with_pool(pool.clone()));
        let events = Arc::new(EventStore::with_pool(pool.clone()));
        let workdays = Arc::new(WorkdayStore::with_pool(pool.clone()));
        let reminder_store = Arc::new(ReminderStore::with_pool(pool.clone()));
        let pronunciations = Arc::new(PronunciationStore::with_pool(pool.clone()));
        let memory = Arc::new(
            MemoryStore::with_pool(pool)
                .with_embedder(llm.clone(), config.memory().embedding_model)
                .with_limits(memory_limits(config)),
        );
        let reminders = Arc::new(ReminderEngine::new(
            reminder_store,
            events.clone(),
            workdays.clone(),
            clock.clone(),
            settings.user_name.clone(),
        ));
        let scheduling = SchedulingEngine::new(
            tasks.clone(),
            events.clone(),
            workdays.clone(),
            reminders.clone(),
            clock.clone(),
        );
        Self {
            llm,
            clock,
            tasks,
            events,
            workdays,
            memory,
            pronunciations,
            reminders,
            scheduling,
            settings,
        }
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn settings(&self) -> &AssistantSettings {
        &self.settings
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    pub fn events(&self) -> &Arc<EventStore> {
        &self.events
    }

    pub fn workdays(&self) -> &Arc<WorkdayStore> {
        &self.workdays
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn pronunciations(&self) -> &Arc<PronunciationStore> {
        &self.pronunciations
    }

    pub fn reminders(&self) -> &Arc<ReminderEngine> {
        &self.reminders
    }

    pub fn scheduling(&self) -> &SchedulingEngine {
        &self.scheduling
    }

    pub async fn schedule(&self, text: &str) -> Result<Outcome> {
        let text = require_text(text)?;
        let intent = extract_schedule(self.llm.as_ref(), text, self.clock.today()).await?;
        if intent == ScheduleIntent::None {
            return Ok(Outcome::NoIntent {
                message: "I couldn't find anything to schedule in that.".to_string(),
            });
        }
        let created = self.scheduling.apply(&intent, text).await?;
        if created.is_empty() {
            let message = if created.skipped.is_empty() {
                "Nothing was scheduled.".to_string()
            } else {
                format!("Nothing was scheduled: {}.", created.skipped.join("; "))
            };
            return Ok(Outcome::NoIntent { message });
        }
        let message = describe_created(&created);
        Ok(Outcome::Created { created, message })
    }

    /// Snapshots of everything a resolve or reclassify request may refer to: open tasks,
    /// active and recent reminders, and events from today on.
    pub async fn resolve_pools(&self) -> Result<ResolvePools> {
        let today = format_date(self.clock.today());
        let tasks = self
            .tasks
            .list_open()
            .await?
            .into_iter()
            .map(|t| Candidate::new(ItemKind::Task, t.id, t.title))
            .collect();

        let store = self.reminders.store();
        let mut reminders: Vec<ActiveReminder> = store.list_active().await?;
        for recent in store.list_recent(RECENT_REMINDER_LIMIT).await? {
            if !reminders.iter().any(|r| r.id == recent.id) {
                reminders.push(recent);
            }
        }
        let reminders = reminders
            .into_iter()
            .map(|r| Candidate::new(ItemKind::Reminder, r.id, r.label))
            .collect();

        let events = self
            .events
            .list_from_date(&today)
            .await?
            .into_iter()
            .map(|e| Candidate::new(ItemKind::Event, e.id, e.title))
            .collect();

        Ok(ResolvePools {
            tasks,
            reminders,
            events,
        })
    }

    pub async fn resolve(&self, text: &str) -> Result<Outcome> {
        let text = require_text(text)?;
        let pools = self.resolve_pools().await?;
        let intent = match extract_resolve(self.llm.as_ref(), text, &pools).await {
            Ok(intent) => intent,
            Err(err) => {
                tracing::warn!(error = %err, "Resolve extractor failed; using local fallback");
                ResolveIntent::Abstain
            }
        };

        let (action, hit) = match intent {
            ResolveIntent::Act {
                action,
                target,
                target_id,
                title,
            } => {
                let hit = pick_target(text, target, target_id, title.as_deref(), &pools)
                    .or_else(|| {
                        if action == ResolveAction::Complete {
                            fallback_completion(text, &pools)
                        } else {
                            None
                        }
                    });
                (action, hit)
            }
            ResolveIntent::Abstain => match fallback_completion(text, &pools) {
                Some(hit) => (ResolveAction::Complete, Some(hit)),
                None => {
                    return Ok(Outcome::NoIntent {
                        message: "I couldn't tell what you finished.".to_string(),
                    })
                }
            },
        };
        let Some(hit) = hit else {
            return Ok(Outcome::NoMatch {
                message: "I couldn't find a matching item.".to_string(),
            });
        };

        let item = hit.candidate;
        let changed = self.apply_resolution(action, &item).await?;
        let message = match (action, changed) {
            (ResolveAction::Delete, true) => format!("Removed \"{}\".", item.label),
            (_, true) => format!("Marked \"{}\" as done.", item.label),
            (_, false) => format!("\"{}\" was already taken care of.", item.label),
        };
        tracing::info!(kind = item.kind.as_str(), id = item.id, changed, "Resolved item");
        Ok(Outcome::Resolved {
            action,
            item,
            changed,
            message,
        })
    }

    async fn apply_resolution(&self, action: ResolveAction, item: &Candidate) -> Result<bool> {
        let now = self.clock.now_ts();
        match (item.kind, action) {
            (ItemKind::Task, ResolveAction::Delete) => self.tasks.delete(item.id).await,
            (ItemKind::Task, _) => self.tasks.complete(item.id).await,
            (ItemKind::Reminder, ResolveAction::Delete) => {
                self.reminders.store().delete(item.id, now).await
            }
            (ItemKind::Reminder, _) => self.reminders.store().mark_done(item.id, now).await,
            (ItemKind::Event, _) => self.remove_event(item.id).await,
        }
    }

    pub async fn reclassify(&self, text: &str) -> Result<Outcome> {
        let text = require_text(text)?;
        let ReclassifyIntent::Convert {
            target,
            title_hint,
            date,
            time,
        } = extract_reclassify(self.llm.as_ref(), text).await?
        else {
            return Ok(Outcome::NoIntent {
                message: "I couldn't tell what to change.".to_string(),
            });
        };

        let pools = self.resolve_pools().await?;
        let hint = title_hint.as_deref().unwrap_or(text);
        match choose_source(hint, target, &pools) {
            ReclassifyChoice::Single(hit) => {
                let created = self
                    .scheduling
                    .convert(&hit.candidate, target, date, time)
                    .await?;
                let message = format!(
                    "Turned \"{}\" into {}.",
                    hit.candidate.label,
                    with_article(target)
                );
                Ok(Outcome::Created { created, message })
            }
            ReclassifyChoice::Confirm(options) => Ok(Outcome::NeedsConfirmation {
                target,
                message: format!(
                    "Which one should become {}? {}",
                    with_article(target),
                    options
                        .iter()
                        .map(|o| format!("{} \"{}\"", o.candidate.kind.as_str(), o.candidate.label))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                options,
            }),
            ReclassifyChoice::NoMatch => Ok(Outcome::NoMatch {
                message: "I couldn't find the item to change.".to_string(),
            }),
        }
    }

    /// Follow-up to a `needs_confirmation` reclassify answer.
    pub async fn confirm_reclassify(
        &self,
        target: ItemKind,
        item_type: ItemKind,
        item_id: i32,
    ) -> Result<Outcome> {
        let source = Candidate::new(item_type, item_id, "");
        let created = self.scheduling.convert(&source, target, None, None).await?;
        Ok(Outcome::Created {
            message: format!("Done, it's {} now.", with_article(target)),
            created,
        })
    }

    pub async fn change_priority(&self, text: &str) -> Result<Outcome> {
        let text = require_text(text)?;
        let intent = extract_priority(self.llm.as_ref(), text).await?;
        let open: Vec<Candidate> = self
            .tasks
            .list_open()
            .await?
            .into_iter()
            .map(|t| Candidate::new(ItemKind::Task, t.id, t.title))
            .collect();
        let hit = intent
            .title
            .as_deref()
            .and_then(|hint| matcher::best_match(hint, &open))
            .or_else(|| matcher::best_match(text, &open));
        let Some(hit) = hit else {
            return Ok(Outcome::NoMatch {
                message: "I couldn't find that task.".to_string(),
            });
        };
        let task = self.set_task_priority(hit.candidate.id, intent.priority).await?;
        Ok(Outcome::Updated {
            message: format!("\"{}\" is now {}.", task.title, task.priority.as_str()),
            task: Some(task),
        })
    }

    /// Conversational turn: regex pre-filters first, otherwise one model reply grounded
    /// in selected memories and recent history. Fact harvesting runs in the background.
    pub async fn converse(&self, text: &str) -> Result<Outcome> {
        let text = require_text(text)?;
        let now = self.clock.now_ts();
        let recent = self
            .memory
            .recent_user_messages(PRONUNCIATION_LOOKBACK as i64)
            .await?;

        if let Some(hit) = prefilter::classify(text, &recent) {
            let reply = self.answer_prefiltered(hit, now).await?;
            self.record_turn(text, &reply, now).await?;
            return Ok(Outcome::Reply { text: reply });
        }

        let memories = match self.memory.select(text, self.settings.top_k, now).await {
            Ok(memories) => memories,
            Err(err) => {
                tracing::warn!(error = %err, "Memory selection failed");
                Vec::new()
            }
        };
        let history = self
            .memory
            .messages_since(now - self.settings.history_hours * 3600)
            .await?;
        let system = conversation::system_prompt(
            &self.settings.assistant_name,
            &self.settings.user_name,
            &format_date(self.clock.today()),
            &memories,
        );
        let prompt = conversation::conversation_prompt(
            &history,
            &self.settings.user_name,
            &self.settings.assistant_name,
            text,
        );
        let reply = self.llm.generate_text(&prompt, &system).await?;
        let reply = reply.trim().to_string();
        self.record_turn(text, &reply, now).await?;

        if self.settings.harvest {
            conversation::spawn_harvest(self.llm.clone(), self.memory.clone(), text.to_string(), now);
        }
        Ok(Outcome::Reply { text: reply })
    }

    async fn answer_prefiltered(&self, hit: Prefiltered, now: i64) -> Result<String> {
        Ok(match hit {
            Prefiltered::Remember { fact } | Prefiltered::Fact { fact } => {
                if self.memory.remember(&fact, now).await? {
                    "Got it, I'll remember that.".to_string()
                } else {
                    "I already knew that.".to_string()
                }
            }
            Prefiltered::Pronunciation {
                term,
                pronunciation,
            } => {
                self.pronunciations.upsert(&term, &pronunciation, now).await?;
                format!("Okay, I'll say {term} like {pronunciation}.")
            }
            Prefiltered::TodayQuery => self.today_summary().await?.text,
        })
    }

    async fn record_turn(&self, text: &str, reply: &str, now: i64) -> Result<()> {
        self.memory.append_message(Role::User, text, now).await?;
        self.memory.append_message(Role::Assistant, reply, now).await
    }

    pub async fn remember(&self, text: &str) -> Result<Outcome> {
        let text = require_text(text)?;
        let fact = match prefilter::classify(text, &[]) {
            Some(Prefiltered::Remember { fact }) | Some(Prefiltered::Fact { fact }) => fact,
            _ => text.to_string(),
        };
        let stored = self.memory.remember(&fact, self.clock.now_ts()).await?;
        let message = if stored {
            "Got it, I'll remember that."
        } else {
            "I already knew that."
        };
        Ok(Outcome::Updated {
            message: message.to_string(),
            task: None,
        })
    }

    pub async fn today_summary(&self) -> Result<TodaySummary> {
        let date = format_date(self.clock.today());
        let events = self.events.list_for_date(&date).await?;
        let tasks = self.tasks.list_open().await?;
        let alerts = summary_alerts(self.reminders.store().list_for_date(&date).await?);
        let text = compose_summary(&events, &tasks, &alerts);
        Ok(TodaySummary {
            date,
            text,
            events,
            tasks,
            alerts,
        })
    }

    pub async fn dashboard(&self) -> Result<Dashboard> {
        let now = self.clock.now();
        let summary = self.today_summary().await?;
        let alerts = self.reminders.store().list_for_date(&summary.date).await?;
        let alerts = alerts
            .into_iter()
            .filter(|r| r.status == crate::reminders::ReminderStatus::Active)
            .collect();
        Ok(Dashboard {
            now: format_hhmm(&now),
            workday: self.workdays.get(&summary.date).await?,
            date: summary.date,
            today_summary: summary.text,
            alerts,
            next_task: self.tasks.next_task().await?,
        })
    }

    pub async fn add_task(&self, title: &str, priority: Option<&str>) -> Result<Task> {
        self.tasks
            .create(title, Priority::parse_or_default(priority), self.clock.now_ts())
            .await
    }

    pub async fn complete_task(&self, id: i32) -> Result<()> {
        if !self.tasks.complete(id).await? {
            return Err(KitchenPaError::NotFound(format!("task {id}")));
        }
        Ok(())
    }

    pub async fn set_task_priority(&self, id: i32, priority: Priority) -> Result<Task> {
        if !self.tasks.set_priority(id, priority).await? {
            return Err(KitchenPaError::NotFound(format!("task {id}")));
        }
        self.tasks
            .get(id)
            .await?
            .ok_or_else(|| KitchenPaError::NotFound(format!("task {id}")))
    }

    /// Stores one event row; events from today on re-arm today's reminders.
    pub async fn add_event(&self, input: NewEventInput) -> Result<Event> {
        let event = self.events.create(input, self.clock.now_ts()).await?;
        if parse_iso_date(&event.event_date)? >= self.clock.today() {
            self.reminders.arm_today().await?;
        }
        Ok(event)
    }

    pub async fn delete_event(&self, id: i32) -> Result<()> {
        if !self.remove_event(id).await? {
            return Err(KitchenPaError::NotFound(format!("event {id}")));
        }
        Ok(())
    }

    async fn remove_event(&self, id: i32) -> Result<bool> {
        let removed = self.events.delete(id).await?;
        if removed {
            self.reminders.store().delete_event_reminders(id).await?;
        }
        Ok(removed)
    }

    pub async fn set_workday(
        &self,
        date: &str,
        is_work: bool,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Workday> {
        let workday = self.workdays.upsert(date, is_work, start, end).await?;
        if workday.date == format_date(self.clock.today()) {
            self.reminders.arm_today().await?;
        }
        Ok(workday)
    }

    pub async fn acknowledge_reminder(&self, id: i32) -> Result<bool> {
        if self.reminders.store().get(id).await?.is_none() {
            return Err(KitchenPaError::NotFound(format!("reminder {id}")));
        }
        self.reminders
            .store()
            .mark_done(id, self.clock.now_ts())
            .await
    }

    pub async fn snooze_reminder(&self, id: i32, minutes: Option<i64>) -> Result<ActiveReminder> {
        let minutes = minutes.unwrap_or(self.settings.snooze_minutes);
        self.reminders
            .store()
            .snooze(id, minutes, self.clock.now_ts())
            .await?
            .ok_or_else(|| KitchenPaError::NotFound(format!("active reminder {id}")))
    }
}
