use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Language model seam used by the extractors, the conversational reply and memory
/// embeddings.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate_text(&self, prompt: &str, system_prompt: &str) -> Result<String>;

    /// Runs one completion constrained to `json_schema` (its `title` names the format)
    /// and returns the decoded JSON object.
    async fn parse_structured_output(
        &self,
        prompt: &str,
        system_prompt: &str,
        json_schema: Value,
    ) -> Result<Value>;

    async fn embed(&self, inputs: Vec<String>, model: Option<&str>) -> Result<Vec<Vec<f32>>>;
}
