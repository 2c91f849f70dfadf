mod common;

use std::sync::Arc;

use tempfile::tempdir;

use kitchen_pa::memory::{MemoryKind, MemoryLimits, MemoryStore, Role};

use common::ScriptedLlm;

async fn store_with(llm: Option<Arc<ScriptedLlm>>, limits: MemoryLimits) -> (MemoryStore, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("memory.db");
    let mut store = MemoryStore::new(db_path.to_str().unwrap())
        .await
        .unwrap()
        .with_limits(limits);
    if let Some(llm) = llm {
        store = store.with_embedder(llm, Some("test-embedding".to_string()));
    }
    (store, dir)
}

#[tokio::test]
async fn duplicate_and_blank_facts_are_ignored() {
    let (store, _dir) = store_with(None, MemoryLimits::default()).await;

    assert!(store.remember("Sam's sister is called Jo", 100).await.unwrap());
    assert!(!store.remember("Sam's sister is called Jo", 200).await.unwrap());
    assert!(!store.remember("   ", 300).await.unwrap());

    let all = store.list_recent(10).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].kind, MemoryKind::Short);
}

#[tokio::test]
async fn prune_keeps_the_most_recently_used() {
    let limits = MemoryLimits {
        short_cap: 2,
        ..MemoryLimits::default()
    };
    let (store, _dir) = store_with(None, limits).await;

    store.remember("Likes tea with oat milk", 100).await.unwrap();
    store.remember("Allergic to peanuts", 200).await.unwrap();
    let oldest = store
        .list_kind(MemoryKind::Short)
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.summary == "Likes tea with oat milk")
        .unwrap();
    store.touch(&[oldest.id], 500).await.unwrap();

    store.remember("Bins go out on Thursday", 300).await.unwrap();

    let mut kept: Vec<String> = store
        .list_kind(MemoryKind::Short)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.summary)
        .collect();
    kept.sort();
    assert_eq!(kept, vec!["Bins go out on Thursday", "Likes tea with oat milk"]);
}

#[tokio::test]
async fn long_facts_have_their_own_cap() {
    let limits = MemoryLimits {
        short_cap: 1,
        long_cap: 5,
        ..MemoryLimits::default()
    };
    let (store, _dir) = store_with(None, limits).await;
    let long_fact = vec!["word"; 60].join(" ");

    store.remember(&long_fact, 100).await.unwrap();
    store.remember("Short one", 200).await.unwrap();
    store.remember("Short two", 300).await.unwrap();

    assert_eq!(store.list_kind(MemoryKind::Long).await.unwrap().len(), 1);
    let short = store.list_kind(MemoryKind::Short).await.unwrap();
    assert_eq!(short.len(), 1);
    assert_eq!(short[0].summary, "Short two");
}

#[tokio::test]
async fn select_ranks_by_similarity() {
    let llm = ScriptedLlm::new();
    llm.embedding("Jo is Sam's sister", vec![1.0, 0.0, 0.0]);
    llm.embedding("The boiler was serviced in May", vec![0.0, 1.0, 0.0]);
    llm.embedding("Likes gardening", vec![0.0, 0.0, 1.0]);
    llm.embedding("when is the boiler due", vec![0.1, 0.9, 0.0]);
    let limits = MemoryLimits {
        top_k: 1,
        ..MemoryLimits::default()
    };
    let (store, _dir) = store_with(Some(llm), limits).await;

    store.remember("Jo is Sam's sister", 100).await.unwrap();
    store.remember("The boiler was serviced in May", 110).await.unwrap();
    store.remember("Likes gardening", 120).await.unwrap();

    let picked = store.select("when is the boiler due", 1, 900).await.unwrap();
    assert_eq!(picked.len(), 1);
    assert_eq!(picked[0].summary, "The boiler was serviced in May");
    assert_eq!(picked[0].last_used_at, Some(900));
}

#[tokio::test]
async fn select_falls_back_to_recent_when_embedding_fails() {
    let llm = ScriptedLlm::new();
    llm.embedding("Jo is Sam's sister", vec![1.0, 0.0]);
    let limits = MemoryLimits {
        fallback_limit: 2,
        ..MemoryLimits::default()
    };
    let (store, _dir) = store_with(Some(llm), limits).await;

    store.remember("Jo is Sam's sister", 100).await.unwrap();
    store.remember("Car MOT is in March", 200).await.unwrap();
    store.remember("Prefers mornings", 300).await.unwrap();

    let picked = store.select("unembedded prompt", 5, 400).await.unwrap();
    let summaries: Vec<&str> = picked.iter().map(|m| m.summary.as_str()).collect();
    assert_eq!(summaries, vec!["Prefers mornings", "Car MOT is in March"]);
}

#[tokio::test]
async fn conversation_log_round_trips_in_order() {
    let (store, _dir) = store_with(None, MemoryLimits::default()).await;

    store.append_message(Role::User, "hi", 100).await.unwrap();
    store.append_message(Role::Assistant, "hello", 101).await.unwrap();
    store.append_message(Role::User, "what's on", 200).await.unwrap();

    let since = store.messages_since(101).await.unwrap();
    let contents: Vec<&str> = since.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["hello", "what's on"]);

    let users = store.recent_user_messages(5).await.unwrap();
    assert_eq!(users, vec!["hi", "what's on"]);
}
