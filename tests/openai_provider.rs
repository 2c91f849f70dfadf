use httpmock::Method::POST;
use httpmock::MockServer;
use serde_json::json;

use kitchen_pa::error::KitchenPaError;
use kitchen_pa::interfaces::providers::LlmProvider;
use kitchen_pa::intents::resolve::resolve_schema;
use kitchen_pa::providers::openai::OpenAiProvider;

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1,
        "model": "gpt-4.1-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

fn provider(server: &MockServer) -> OpenAiProvider {
    OpenAiProvider::new("test-key".to_string(), None, Some(server.base_url()))
}

#[tokio::test]
async fn generate_text_sends_system_and_user_messages() {
    let server = MockServer::start_async().await;
    let chat = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("authorization", "Bearer test-key")
                .body_includes("\"role\":\"system\"")
                .body_includes("Sam: Morning");
            then.status(200).json_body(completion("Morning, Sam!"));
        })
        .await;

    let reply = provider(&server)
        .generate_text("Sam: Morning", "You are Pip")
        .await
        .unwrap();
    assert_eq!(reply, "Morning, Sam!");
    chat.assert_async().await;
}

#[tokio::test]
async fn structured_output_names_the_schema() {
    let server = MockServer::start_async().await;
    let chat = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .body_includes("\"name\":\"resolve_intent\"")
                .body_includes("\"strict\":true");
            then.status(200).json_body(completion(
                r#"{"action":"complete","target":"task","target_id":3,"title":null}"#,
            ));
        })
        .await;

    let value = provider(&server)
        .parse_structured_output("done with the ironing", "system", resolve_schema())
        .await
        .unwrap();
    assert_eq!(value["action"], "complete");
    assert_eq!(value["target_id"], 3);
    chat.assert_async().await;
}

#[tokio::test]
async fn non_json_structured_reply_is_a_serialization_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(completion("I think you finished the ironing."));
        })
        .await;

    let err = provider(&server)
        .parse_structured_output("done with the ironing", "system", resolve_schema())
        .await
        .unwrap_err();
    assert!(matches!(err, KitchenPaError::Serialization(_)));
}

#[tokio::test]
async fn rejected_request_is_an_http_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(401)
                .json_body(json!({"error": {"message": "bad key", "type": "invalid_request_error"}}));
        })
        .await;

    let err = provider(&server)
        .generate_text("hello", "")
        .await
        .unwrap_err();
    match err {
        KitchenPaError::Http(message) => assert!(message.contains("401"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn embeddings_come_back_in_input_order() {
    let server = MockServer::start_async().await;
    let embeddings = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/embeddings")
                .body_includes("\"model\":\"text-embedding-3-small\"");
            then.status(200).json_body(json!({
                "object": "list",
                "model": "text-embedding-3-small",
                "data": [
                    {"object": "embedding", "index": 1, "embedding": [0.0, 1.0]},
                    {"object": "embedding", "index": 0, "embedding": [1.0, 0.0]}
                ],
                "usage": {"prompt_tokens": 4, "total_tokens": 4}
            }));
        })
        .await;

    let vectors = provider(&server)
        .embed(
            vec!["first".to_string(), "second".to_string()],
            Some("text-embedding-3-small"),
        )
        .await
        .unwrap();
    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    embeddings.assert_async().await;
}
