#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono_tz::Europe::London;
use serde_json::Value;
use tempfile::TempDir;

use kitchen_pa::clock::FixedClock;
use kitchen_pa::config::Config;
use kitchen_pa::error::{KitchenPaError, Result};
use kitchen_pa::interfaces::providers::LlmProvider;
use kitchen_pa::services::Assistant;

/// In-process model: structured replies are queued per schema title, free-text replies
/// in order, embeddings per exact input.
#[derive(Default)]
pub struct ScriptedLlm {
    structured: Mutex<HashMap<String, VecDeque<Value>>>,
    replies: Mutex<VecDeque<String>>,
    embeddings: Mutex<HashMap<String, Vec<f32>>>,
    offline: Mutex<bool>,
    calls: Mutex<Vec<String>>,
    prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, title: &str, value: Value) {
        self.structured
            .lock()
            .unwrap()
            .entry(title.to_string())
            .or_default()
            .push_back(value);
    }

    pub fn reply(&self, text: &str) {
        self.replies.lock().unwrap().push_back(text.to_string());
    }

    pub fn embedding(&self, text: &str, vector: Vec<f32>) {
        self.embeddings
            .lock()
            .unwrap()
            .insert(text.to_string(), vector);
    }

    /// Every call fails as if the provider were unreachable.
    pub fn go_offline(&self) {
        *self.offline.lock().unwrap() = true;
    }

    /// Schema titles (or `text`) of every call so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// `(system, prompt)` pairs sent to `generate_text`.
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().unwrap().clone()
    }

    fn check_online(&self) -> Result<()> {
        if *self.offline.lock().unwrap() {
            return Err(KitchenPaError::Http("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate_text(&self, prompt: &str, system_prompt: &str) -> Result<String> {
        self.calls.lock().unwrap().push("text".to_string());
        self.check_online()?;
        self.prompts
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), prompt.to_string()));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| KitchenPaError::Http("no reply scripted".to_string()))
    }

    async fn parse_structured_output(
        &self,
        _prompt: &str,
        _system_prompt: &str,
        json_schema: Value,
    ) -> Result<Value> {
        let title = json_schema
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.calls.lock().unwrap().push(title.clone());
        self.check_online()?;
        self.structured
            .lock()
            .unwrap()
            .get_mut(&title)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| KitchenPaError::Serialization(format!("nothing scripted for {title}")))
    }

    async fn embed(&self, inputs: Vec<String>, _model: Option<&str>) -> Result<Vec<Vec<f32>>> {
        self.check_online()?;
        let embeddings = self.embeddings.lock().unwrap();
        inputs
            .iter()
            .map(|input| {
                embeddings
                    .get(input)
                    .cloned()
                    .ok_or_else(|| KitchenPaError::Http(format!("no embedding for {input}")))
            })
            .collect()
    }
}

pub fn clock_at(date: &str, hhmm: &str) -> Arc<FixedClock> {
    Arc::new(FixedClock::at(London, date, hhmm).unwrap())
}

pub fn test_config(dir: &TempDir) -> Config {
    let db_path = dir.path().join("kitchen-pa.db");
    let mut config = Config::convention_defaults(db_path.to_str().unwrap());
    if let Some(memory) = config.memory.as_mut() {
        memory.harvest_enabled = Some(false);
    }
    config
}

pub async fn open_assistant(llm: Arc<ScriptedLlm>, clock: Arc<FixedClock>) -> (Assistant, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let assistant = Assistant::open(&config, llm, clock).await.unwrap();
    (assistant, dir)
}
