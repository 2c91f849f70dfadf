use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Json, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::clock::{format_date, SharedClock, SystemClock};
use crate::config::Config;
use crate::error::{KitchenPaError, Result};
use crate::events::{Event, NewEventInput};
use crate::interfaces::providers::LlmProvider;
use crate::interfaces::speech::Transcript;
use crate::matcher::ItemKind;
use crate::memory::Memory;
use crate::providers::openai::OpenAiProvider;
use crate::reminders::{ActiveReminder, FiredAlert};
use crate::scheduler::{seconds, ArmRemindersJob, NagTickJob, Scheduler};
use crate::services::{Assistant, Dashboard, Outcome, TodaySummary};
use crate::speech::{AudioWorker, Pronunciation, VoiceSettings};
use crate::tasks::{Priority, Task};
use crate::workdays::Workday;

const ALERT_CHANNEL_CAPACITY: usize = 64;
const DEFAULT_MEMORY_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub assistant: Arc<Assistant>,
    pub audio: Option<Arc<AudioWorker>>,
    pub alerts: broadcast::Sender<FiredAlert>,
    pub token: Option<String>,
    pub audio_format: String,
    pub input_format: String,
}

impl AppState {
    /// State without audio; requests to the speech routes fail until `audio` is set.
    pub fn new(assistant: Arc<Assistant>, token: Option<String>) -> Self {
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        let voice = VoiceSettings::default();
        Self {
            assistant,
            audio: None,
            alerts,
            token,
            audio_format: voice.format,
            input_format: "webm".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

struct ApiError(KitchenPaError);

impl From<KitchenPaError> for ApiError {
    fn from(err: KitchenPaError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            KitchenPaError::Validation(_) => StatusCode::BAD_REQUEST,
            KitchenPaError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Deserialize)]
struct TextRequest {
    text: String,
}

#[derive(Deserialize)]
struct ConfirmRequest {
    target: ItemKind,
    item_type: ItemKind,
    item_id: i32,
}

#[derive(Deserialize)]
struct NewTaskRequest {
    title: String,
    priority: Option<String>,
}

#[derive(Deserialize)]
struct PriorityRequest {
    priority: String,
}

#[derive(Deserialize)]
struct TasksQuery {
    all: Option<bool>,
}

#[derive(Deserialize)]
struct EventsQuery {
    date: Option<String>,
}

#[derive(Deserialize)]
struct WorkdayRequest {
    date: String,
    is_work: bool,
    start_hhmm: Option<String>,
    end_hhmm: Option<String>,
}

#[derive(Deserialize)]
struct ReminderIdRequest {
    id: i32,
}

#[derive(Deserialize)]
struct SnoozeRequest {
    id: i32,
    minutes: Option<i64>,
}

#[derive(Deserialize)]
struct SttQuery {
    format: Option<String>,
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct PronunciationRequest {
    term: String,
    pronunciation: String,
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/ai/schedule", post(ai_schedule))
        .route("/api/ai/resolve", post(ai_resolve))
        .route("/api/ai/reclassify", post(ai_reclassify))
        .route("/api/ai/reclassify/confirm", post(ai_reclassify_confirm))
        .route("/api/ai/priority", post(ai_priority))
        .route("/api/ai/respond", post(ai_respond))
        .route("/api/ai/remember", post(ai_remember))
        .route("/api/today", get(today))
        .route("/api/dashboard", get(dashboard))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/{id}/done", post(complete_task))
        .route("/api/tasks/{id}/priority", post(set_task_priority))
        .route("/api/events", get(list_events).post(create_event))
        .route("/api/events/{id}", delete(delete_event))
        .route("/api/workdays", post(set_workday))
        .route("/api/workdays/{date}", get(get_workday))
        .route("/api/reminders/active", get(active_reminders))
        .route("/api/reminders/done", post(reminder_done))
        .route("/api/reminders/snooze", post(reminder_snooze))
        .route("/api/reminders/stream", get(reminder_stream))
        .route("/api/tts", post(tts))
        .route("/api/stt", post(stt))
        .route("/api/memories", get(list_memories))
        .route(
            "/api/pronunciations",
            get(list_pronunciations).post(upsert_pronunciation),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Err(err) = authorize(request.headers(), state.token.as_deref()) {
        return err.into_response();
    }
    next.run(request).await
}

/// Passes when no token is configured; otherwise `Authorization: Bearer` or `x-api-key`
/// must carry it.
fn authorize(
    headers: &HeaderMap,
    token: Option<&str>,
) -> std::result::Result<(), (StatusCode, Json<ErrorResponse>)> {
    let Some(expected) = token.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(());
    };
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or_default()
        .trim();
    let api_key = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .trim();
    if bearer == expected || api_key == expected {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Unauthorized".to_string(),
            }),
        ))
    }
}

async fn ai_schedule(State(state): State<AppState>, Json(body): Json<TextRequest>) -> ApiResult<Outcome> {
    Ok(Json(state.assistant.schedule(&body.text).await?))
}

async fn ai_resolve(State(state): State<AppState>, Json(body): Json<TextRequest>) -> ApiResult<Outcome> {
    Ok(Json(state.assistant.resolve(&body.text).await?))
}

async fn ai_reclassify(
    State(state): State<AppState>,
    Json(body): Json<TextRequest>,
) -> ApiResult<Outcome> {
    Ok(Json(state.assistant.reclassify(&body.text).await?))
}

async fn ai_reclassify_confirm(
    State(state): State<AppState>,
    Json(body): Json<ConfirmRequest>,
) -> ApiResult<Outcome> {
    Ok(Json(
        state
            .assistant
            .confirm_reclassify(body.target, body.item_type, body.item_id)
            .await?,
    ))
}

async fn ai_priority(State(state): State<AppState>, Json(body): Json<TextRequest>) -> ApiResult<Outcome> {
    Ok(Json(state.assistant.change_priority(&body.text).await?))
}

async fn ai_respond(State(state): State<AppState>, Json(body): Json<TextRequest>) -> ApiResult<Outcome> {
    Ok(Json(state.assistant.converse(&body.text).await?))
}

async fn ai_remember(State(state): State<AppState>, Json(body): Json<TextRequest>) -> ApiResult<Outcome> {
    Ok(Json(state.assistant.remember(&body.text).await?))
}

async fn today(State(state): State<AppState>) -> ApiResult<TodaySummary> {
    Ok(Json(state.assistant.today_summary().await?))
}

async fn dashboard(State(state): State<AppState>) -> ApiResult<Dashboard> {
    Ok(Json(state.assistant.dashboard().await?))
}

async fn list_tasks(State(state): State<AppState>, Query(query): Query<TasksQuery>) -> ApiResult<Vec<Task>> {
    let tasks = state.assistant.tasks();
    let items = if query.all.unwrap_or(false) {
        tasks.list_all().await?
    } else {
        tasks.list_open().await?
    };
    Ok(Json(items))
}

async fn create_task(State(state): State<AppState>, Json(body): Json<NewTaskRequest>) -> ApiResult<Task> {
    Ok(Json(
        state
            .assistant
            .add_task(&body.title, body.priority.as_deref())
            .await?,
    ))
}

async fn complete_task(State(state): State<AppState>, Path(id): Path<i32>) -> ApiResult<Value> {
    state.assistant.complete_task(id).await?;
    Ok(Json(json!({"ok": true})))
}

async fn set_task_priority(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<PriorityRequest>,
) -> ApiResult<Task> {
    let priority = Priority::parse(&body.priority).ok_or_else(|| {
        KitchenPaError::validation(format!("unknown priority `{}`", body.priority))
    })?;
    Ok(Json(state.assistant.set_task_priority(id, priority).await?))
}

async fn list_events(State(state): State<AppState>, Query(query): Query<EventsQuery>) -> ApiResult<Vec<Event>> {
    let events = state.assistant.events();
    let items = match query.date.as_deref() {
        Some(date) => events.list_for_date(date).await?,
        None => {
            let today = format_date(state.assistant.clock().today());
            events.list_from_date(&today).await?
        }
    };
    Ok(Json(items))
}

async fn create_event(State(state): State<AppState>, Json(body): Json<NewEventInput>) -> ApiResult<Event> {
    Ok(Json(state.assistant.add_event(body).await?))
}

async fn delete_event(State(state): State<AppState>, Path(id): Path<i32>) -> ApiResult<Value> {
    state.assistant.delete_event(id).await?;
    Ok(Json(json!({"ok": true})))
}

async fn set_workday(State(state): State<AppState>, Json(body): Json<WorkdayRequest>) -> ApiResult<Workday> {
    Ok(Json(
        state
            .assistant
            .set_workday(
                &body.date,
                body.is_work,
                body.start_hhmm.as_deref(),
                body.end_hhmm.as_deref(),
            )
            .await?,
    ))
}

async fn get_workday(State(state): State<AppState>, Path(date): Path<String>) -> ApiResult<Workday> {
    Ok(Json(state.assistant.workdays().get(&date).await?))
}

async fn active_reminders(State(state): State<AppState>) -> ApiResult<Vec<ActiveReminder>> {
    Ok(Json(state.assistant.reminders().store().list_active().await?))
}

async fn reminder_done(
    State(state): State<AppState>,
    Json(body): Json<ReminderIdRequest>,
) -> ApiResult<Value> {
    let changed = state.assistant.acknowledge_reminder(body.id).await?;
    Ok(Json(json!({"ok": true, "changed": changed})))
}

async fn reminder_snooze(
    State(state): State<AppState>,
    Json(body): Json<SnoozeRequest>,
) -> ApiResult<ActiveReminder> {
    Ok(Json(
        state
            .assistant
            .snooze_reminder(body.id, body.minutes)
            .await?,
    ))
}

async fn reminder_stream(State(state): State<AppState>) -> Response {
    let mut rx = state.alerts.subscribe();
    let body = Body::from_stream(async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(alert) => {
                    let Ok(payload) = serde_json::to_string(&alert) else {
                        continue;
                    };
                    yield Ok::<Bytes, Infallible>(Bytes::from(format!("data: {payload}\n\n")));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Reminder stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

fn audio_worker(state: &AppState) -> std::result::Result<&Arc<AudioWorker>, ApiError> {
    state
        .audio
        .as_ref()
        .ok_or_else(|| ApiError(KitchenPaError::Config("speech is not configured".to_string())))
}

fn audio_content_type(format: &str) -> &'static str {
    match format {
        "mp3" => "audio/mpeg",
        "opus" => "audio/ogg",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

async fn tts(
    State(state): State<AppState>,
    Json(body): Json<TextRequest>,
) -> std::result::Result<Response, ApiError> {
    let audio = audio_worker(&state)?.synthesize(&body.text).await?;
    Ok((
        [(header::CONTENT_TYPE, audio_content_type(&state.audio_format))],
        audio,
    )
        .into_response())
}

async fn stt(
    State(state): State<AppState>,
    Query(query): Query<SttQuery>,
    body: Bytes,
) -> ApiResult<Transcript> {
    let format = query.format.unwrap_or_else(|| state.input_format.clone());
    Ok(Json(
        audio_worker(&state)?
            .transcribe(body.to_vec(), &format)
            .await?,
    ))
}

async fn list_memories(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<Memory>> {
    let limit = query.limit.unwrap_or(DEFAULT_MEMORY_LIMIT);
    Ok(Json(state.assistant.memory().list_recent(limit).await?))
}

async fn list_pronunciations(State(state): State<AppState>) -> ApiResult<Vec<Pronunciation>> {
    Ok(Json(state.assistant.pronunciations().list().await?))
}

async fn upsert_pronunciation(
    State(state): State<AppState>,
    Json(body): Json<PronunciationRequest>,
) -> ApiResult<Value> {
    let now = state.assistant.clock().now_ts();
    state
        .assistant
        .pronunciations()
        .upsert(&body.term, &body.pronunciation, now)
        .await?;
    Ok(Json(json!({"ok": true})))
}

pub async fn run(config: Config) -> Result<()> {
    run_with_shutdown(config, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "Could not listen for ctrl-c");
            futures::future::pending::<()>().await;
        }
    })
    .await
}

pub async fn run_with_shutdown<F>(config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let clock: SharedClock = Arc::new(SystemClock::new(config.timezone()?));
    let speech = config.speech();
    let mut provider = OpenAiProvider::from_config(&config.openai.clone().unwrap_or_default())?;
    if let Some(language) = speech.language.clone() {
        provider = provider.with_language(language);
    }
    let provider = Arc::new(provider);
    tracing::info!(model = provider.model(), "Using OpenAI provider");
    let llm: Arc<dyn LlmProvider> = provider.clone();

    let assistant = Arc::new(Assistant::open(&config, llm, clock.clone()).await?);

    let defaults = VoiceSettings::default();
    let voice = VoiceSettings {
        voice: speech.voice.clone().unwrap_or(defaults.voice),
        format: speech.format.clone().unwrap_or(defaults.format),
    };
    let audio_format = voice.format.clone();
    let audio = Arc::new(AudioWorker::spawn(
        provider.clone(),
        provider,
        Some(assistant.pronunciations().clone()),
        voice,
        speech.workers.unwrap_or(1),
    ));
    tracing::info!(workers = audio.worker_count(), "Audio workers started");

    let reminder_config = config.reminders();
    let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
    let mut scheduler = Scheduler::new();
    scheduler.register_job(Arc::new(ArmRemindersJob::new(
        assistant.reminders().clone(),
        clock.clone(),
        seconds(reminder_config.arm_poll_seconds.unwrap_or(60)),
    )));
    scheduler.register_job(Arc::new(NagTickJob::new(
        assistant.reminders().clone(),
        seconds(reminder_config.tick_seconds.unwrap_or(5)),
        alerts.clone(),
    )));
    scheduler.start();

    let daemon = config.daemon();
    let state = AppState {
        assistant,
        audio: Some(audio),
        alerts,
        token: daemon.token.clone(),
        audio_format,
        input_format: speech.input_format.unwrap_or_else(|| "webm".to_string()),
    };
    let app = build_router(state);

    let host = daemon.host.unwrap_or_else(|| "127.0.0.1".to_string());
    let port = daemon.port.unwrap_or(7979);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| KitchenPaError::Runtime(e.to_string()))?;
    tracing::info!(%addr, "Daemon listening");
    let shutdown = async move {
        shutdown.await;
        scheduler.stop().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| KitchenPaError::Runtime(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn authorize_accepts_bearer_or_api_key() {
        let mut headers = HeaderMap::new();
        assert!(authorize(&headers, None).is_ok());
        assert!(authorize(&headers, Some("  ")).is_ok());
        assert!(authorize(&headers, Some("secret")).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        assert!(authorize(&headers, Some("secret")).is_ok());

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("secret"));
        assert!(authorize(&headers, Some("secret")).is_ok());
        assert!(authorize(&headers, Some("other")).is_err());
    }

    #[test]
    fn error_kinds_map_to_status_codes() {
        let status = |err| ApiError(err).into_response().status();
        assert_eq!(status(KitchenPaError::validation("bad")), StatusCode::BAD_REQUEST);
        assert_eq!(status(KitchenPaError::NotFound("task 9".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status(KitchenPaError::Http("down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn audio_formats_have_content_types() {
        assert_eq!(audio_content_type("mp3"), "audio/mpeg");
        assert_eq!(audio_content_type("opus"), "audio/ogg");
        assert_eq!(audio_content_type("weird"), "application/octet-stream");
    }
}
