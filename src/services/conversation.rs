//! Prompt assembly for conversational replies and the post-turn fact harvest.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::intents::{extract, object_schema, titled};
use crate::interfaces::providers::LlmProvider;
use crate::memory::{ConversationMessage, Memory, MemoryStore, Role};

const HARVEST_SYSTEM_PROMPT: &str = "Extract durable facts about the user, their family, \
home, health or preferences from the message. Each fact must stand alone as a short \
sentence. Ignore appointments, reminders, tasks, dates and anything else that belongs on a \
calendar. Return an empty list when there is nothing worth keeping.";

#[derive(Debug, Deserialize)]
struct HarvestReply {
    facts: Vec<String>,
}

pub fn harvest_schema() -> Value {
    titled(
        "memory_harvest",
        object_schema(vec![(
            "facts",
            json!({"type": "array", "items": {"type": "string"}}),
        )]),
    )
}

pub fn system_prompt(assistant_name: &str, user_name: &str, today: &str, memories: &[Memory]) -> String {
    let mut prompt = format!(
        "You are {assistant_name}, a warm and brief household assistant speaking with \
{user_name}. Today is {today}. Answer in one or two spoken-style sentences."
    );
    if !memories.is_empty() {
        prompt.push_str("\n\nThings you know:\n");
        for memory in memories {
            prompt.push_str("- ");
            prompt.push_str(&memory.summary);
            prompt.push('\n');
        }
    }
    prompt
}

/// Recent history as a transcript followed by the new user turn.
pub fn conversation_prompt(
    history: &[ConversationMessage],
    user_name: &str,
    assistant_name: &str,
    text: &str,
) -> String {
    let mut prompt = String::new();
    for message in history {
        let speaker = if message.role == Role::User.as_str() {
            user_name
        } else {
            assistant_name
        };
        prompt.push_str(&format!("{speaker}: {}\n", message.content));
    }
    prompt.push_str(&format!("{user_name}: {}", text.trim()));
    prompt
}

/// Asks the model for long-term facts in `text` and stores each one. A failed harvest
/// call writes nothing; a failed embedding stores the fact without a vector.
pub async fn harvest_facts(
    llm: &dyn LlmProvider,
    memory: &MemoryStore,
    text: &str,
    now: i64,
) -> Result<usize> {
    let reply: Option<HarvestReply> =
        extract(llm, HARVEST_SYSTEM_PROMPT, text.trim(), harvest_schema()).await?;
    let Some(reply) = reply else {
        return Ok(0);
    };
    let mut stored = 0;
    for fact in reply.facts {
        if memory.remember(&fact, now).await? {
            stored += 1;
        }
    }
    tracing::debug!(stored, "Harvested memories");
    Ok(stored)
}

/// Runs [`harvest_facts`] off the request path; failures are logged and dropped.
pub fn spawn_harvest(llm: Arc<dyn LlmProvider>, memory: Arc<MemoryStore>, text: String, now: i64) {
    tokio::spawn(async move {
        if let Err(err) = harvest_facts(llm.as_ref(), &memory, &text, now).await {
            tracing::warn!(error = %err, "Memory harvest failed");
        }
    });
}
