mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use kitchen_pa::daemon::{build_router, AppState};
use kitchen_pa::services::Assistant;

use common::{clock_at, open_assistant, ScriptedLlm};

struct TestApp {
    router: Router,
    assistant: Arc<Assistant>,
    llm: Arc<ScriptedLlm>,
    _dir: TempDir,
}

async fn app(token: Option<&str>) -> TestApp {
    let llm = ScriptedLlm::new();
    let (assistant, dir) = open_assistant(llm.clone(), clock_at("2024-06-01", "08:40")).await;
    let assistant = Arc::new(assistant);
    let state = AppState::new(assistant.clone(), token.map(str::to_string));
    TestApp {
        router: build_router(state),
        assistant,
        llm,
        _dir: dir,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_is_open_and_api_needs_the_token() {
    let app = app(Some("secret")).await;

    let (status, body) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&app.router, get("/api/tasks")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let bearer = Request::builder()
        .uri("/api/tasks")
        .header("authorization", "Bearer secret")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app.router, bearer).await.0, StatusCode::OK);

    let api_key = Request::builder()
        .uri("/api/tasks")
        .header("x-api-key", "secret")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app.router, api_key).await.0, StatusCode::OK);

    let wrong = Request::builder()
        .uri("/api/tasks")
        .header("authorization", "Bearer nope")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app.router, wrong).await.0, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn task_lifecycle_over_http() {
    let app = app(None).await;

    let (status, task) = send(
        &app.router,
        post("/api/tasks", json!({"title": "Descale the kettle", "priority": "vital"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["title"], "Descale the kettle");
    assert_eq!(task["priority"], "vital");
    let id = task["id"].as_i64().unwrap();

    let (_, open) = send(&app.router, get("/api/tasks")).await;
    assert_eq!(open.as_array().unwrap().len(), 1);

    let (status, _) = send(
        &app.router,
        post(&format!("/api/tasks/{id}/priority"), json!({"priority": "trivial"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app.router, post(&format!("/api/tasks/{id}/done"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (_, open) = send(&app.router, get("/api/tasks")).await;
    assert!(open.as_array().unwrap().is_empty());
    let (_, all) = send(&app.router, get("/api/tasks?all=true")).await;
    assert_eq!(all[0]["status"], "done");
    assert_eq!(all[0]["priority"], "trivial");
}

#[tokio::test]
async fn validation_and_missing_items_map_to_status_codes() {
    let app = app(None).await;

    let (status, body) = send(&app.router, post("/api/tasks", json!({"title": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("title"));

    let (status, _) = send(&app.router, post("/api/tasks/999/done", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app.router,
        post("/api/tasks/1/priority", json!({"priority": "sometime"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        post(
            "/api/events",
            json!({"title": "Swim", "event_date": "2024-06-03", "start_hhmm": "11:00", "end_hhmm": "10:00"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app.router, post("/api/ai/schedule", json!({"text": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn events_are_listed_by_date_and_deleted() {
    let app = app(None).await;

    let (status, event) = send(
        &app.router,
        post(
            "/api/events",
            json!({"title": "Swim", "event_date": "2024-06-03", "start_hhmm": "10:00", "end_hhmm": "11:00"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = event["id"].as_i64().unwrap();

    let (_, listed) = send(&app.router, get("/api/events?date=2024-06-03")).await;
    assert_eq!(listed[0]["title"], "Swim");
    let (_, upcoming) = send(&app.router, get("/api/events")).await;
    assert_eq!(upcoming.as_array().unwrap().len(), 1);

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/api/events/{id}"))
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app.router, delete).await.0, StatusCode::OK);

    let delete_again = Request::builder()
        .method("DELETE")
        .uri(format!("/api/events/{id}"))
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app.router, delete_again).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reminders_can_be_acknowledged_and_snoozed() {
    let app = app(None).await;
    app.assistant.reminders().arm_today().await.unwrap();

    let (_, active) = send(&app.router, get("/api/reminders/active")).await;
    let active = active.as_array().unwrap();
    assert_eq!(active.len(), 3);
    let morning = active
        .iter()
        .find(|r| r["reminder_key"] == "morning_meds")
        .unwrap();
    let lunch = active
        .iter()
        .find(|r| r["reminder_key"] == "lunch_meds")
        .unwrap();

    let (status, body) = send(
        &app.router,
        post("/api/reminders/done", json!({"id": morning["id"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);

    let (status, snoozed) = send(
        &app.router,
        post("/api/reminders/snooze", json!({"id": lunch["id"], "minutes": 15})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let now = app.assistant.clock().now_ts();
    assert_eq!(snoozed["next_fire_at"].as_i64().unwrap(), now + 15 * 60);

    let (status, body) = send(
        &app.router,
        post(
            "/api/reminders/snooze",
            json!({"id": lunch["id"], "minutes": 4_611_686_018_427_387_903i64}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("snooze"));

    let (status, _) = send(&app.router, post("/api/reminders/done", json!({"id": 9999}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn schedule_route_returns_the_outcome() {
    let app = app(None).await;
    app.llm.script(
        "schedule_intent",
        json!({"action": "task", "title": "Buy bin bags", "tasks": ["Buy bin bags"]}),
    );

    let (status, body) = send(
        &app.router,
        post("/api/ai/schedule", json!({"text": "add bin bags to my list"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "created");
    assert_eq!(body["created"]["tasks"][0]["title"], "Buy bin bags");
    assert_eq!(body["message"], "Saved 1 task.");
}

#[tokio::test]
async fn today_and_workday_routes() {
    let app = app(None).await;

    let (status, today) = send(&app.router, get("/api/today")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(today["date"], "2024-06-01");
    assert_eq!(today["text"], "Nothing on today.");

    let (status, workday) = send(
        &app.router,
        post(
            "/api/workdays",
            json!({"date": "2024-06-04", "is_work": false}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(workday["is_work"], false);

    let (_, fetched) = send(&app.router, get("/api/workdays/2024-06-04")).await;
    assert_eq!(fetched["is_work"], false);
    let (_, default_day) = send(&app.router, get("/api/workdays/2024-06-05")).await;
    assert_eq!(default_day["is_work"], true);
}

#[tokio::test]
async fn speech_routes_fail_without_audio() {
    let app = app(None).await;
    let (status, _) = send(&app.router, post("/api/tts", json!({"text": "hello"}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}
