use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::{
        audio::{
            AudioInput, AudioResponseFormat, CreateSpeechRequestArgs,
            CreateTranscriptionRequestArgs, SpeechModel, SpeechResponseFormat, Voice,
        },
        chat::{
            ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
            ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
            CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
            CreateChatCompletionResponse, ResponseFormat, ResponseFormatJsonSchema,
        },
        embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput},
        InputSource,
    },
    Client,
};

use crate::config::OpenAiConfig;
use crate::error::{KitchenPaError, Result};
use crate::interfaces::providers::LlmProvider;
use crate::interfaces::speech::{SpeechToText, TextToSpeech, Transcript};

pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const TRANSCRIPTION_MODEL: &str = "gpt-4o-mini-transcribe";

enum ChatCreateResult {
    Parsed(CreateChatCompletionResponse),
    Raw(Value),
}

#[derive(Clone)]
pub struct OpenAiProvider {
    model: String,
    client: Client<OpenAIConfig>,
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    language: Option<String>,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Self {
        let model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let config = OpenAIConfig::new()
            .with_api_key(api_key.clone())
            .with_api_base(base_url.clone());
        Self {
            model,
            client: Client::with_config(config),
            http: reqwest::Client::new(),
            api_key,
            base_url,
            language: None,
        }
    }

    /// Builds a provider from config; a missing API key is a config error.
    pub fn from_config(config: &OpenAiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| KitchenPaError::Config("openai.api_key is not set".to_string()))?;
        Ok(Self::new(
            api_key,
            config.model.clone(),
            config.base_url.clone(),
        ))
    }

    /// Language reported on transcripts.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn raw_chat_completion(&self, request: &CreateChatCompletionRequest) -> Result<Value> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        for attempt in 0..3 {
            let response = self
                .http
                .post(url.clone())
                .bearer_auth(&self.api_key)
                .json(request)
                .send()
                .await
                .map_err(|e| {
                    KitchenPaError::Http(format!("Chat completion transport failed: {e}"))
                })?;
            let status = response.status();
            let body = response.text().await.map_err(|e| {
                KitchenPaError::Http(format!("Chat completion read failed: {e}"))
            })?;

            if status == StatusCode::OK {
                return serde_json::from_str(&body).map_err(|e| {
                    KitchenPaError::Serialization(format!("Chat completion decode failed: {e}"))
                });
            }

            if status.is_server_error() && is_truncated_json(&body) && attempt < 2 {
                tokio::time::sleep(Duration::from_millis(150 * (attempt + 1) as u64)).await;
                continue;
            }

            return Err(KitchenPaError::Http(format!(
                "Chat completion failed ({status}): {body}"
            )));
        }

        Err(KitchenPaError::Http(
            "Chat completion failed after retries".to_string(),
        ))
    }

    /// Raw HTTP first; the typed client only gets a second go when the server kept
    /// returning truncated JSON.
    async fn chat_create_with_fallback(
        &self,
        request: CreateChatCompletionRequest,
    ) -> Result<ChatCreateResult> {
        match self.raw_chat_completion(&request).await {
            Ok(raw) => return Ok(ChatCreateResult::Raw(raw)),
            Err(KitchenPaError::Http(message)) if !is_truncated_json(&message) => {
                return Err(KitchenPaError::Http(message));
            }
            Err(err) => {
                tracing::warn!(error = %err, "Raw chat completion failed, retrying with client");
            }
        }

        match self.client.chat().create(request).await {
            Ok(response) => Ok(ChatCreateResult::Parsed(response)),
            Err(err) => Err(KitchenPaError::Http(err.to_string())),
        }
    }

    async fn complete(&self, request: CreateChatCompletionRequest) -> Result<String> {
        match self.chat_create_with_fallback(request).await? {
            ChatCreateResult::Parsed(parsed) => Self::extract_text_from_response(&parsed),
            ChatCreateResult::Raw(raw) => Self::extract_text_from_value(&raw)
                .ok_or_else(|| KitchenPaError::Runtime("Empty chat response".to_string())),
        }
    }

    fn build_messages(prompt: &str, system_prompt: &str) -> Result<Vec<ChatCompletionRequestMessage>> {
        let mut messages = Vec::new();
        if !system_prompt.is_empty() {
            let system = ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .map_err(|e| KitchenPaError::Runtime(e.to_string()))?;
            messages.push(ChatCompletionRequestMessage::System(system));
        }
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Text(
                prompt.to_string(),
            ))
            .build()
            .map_err(|e| KitchenPaError::Runtime(e.to_string()))?;
        messages.push(ChatCompletionRequestMessage::User(user));
        Ok(messages)
    }

    fn extract_text_from_value(response: &Value) -> Option<String> {
        response
            .get("choices")
            .and_then(|v| v.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(|text| text.to_string())
    }

    fn extract_text_from_response(response: &CreateChatCompletionResponse) -> Result<String> {
        let message = response
            .choices
            .first()
            .ok_or_else(|| KitchenPaError::Runtime("No choices returned".to_string()))?
            .message
            .content
            .clone()
            .unwrap_or_default();
        Ok(message)
    }

    fn voice_from_str(voice: &str) -> Voice {
        match voice.to_lowercase().as_str() {
            "alloy" => Voice::Alloy,
            "ash" => Voice::Ash,
            "coral" => Voice::Coral,
            "echo" => Voice::Echo,
            "fable" => Voice::Fable,
            "onyx" => Voice::Onyx,
            "nova" => Voice::Nova,
            "sage" => Voice::Sage,
            "shimmer" => Voice::Shimmer,
            other => Voice::Other(other.to_string()),
        }
    }

    fn speech_format_from_str(format: &str) -> SpeechResponseFormat {
        match format.to_lowercase().as_str() {
            "opus" => SpeechResponseFormat::Opus,
            "aac" => SpeechResponseFormat::Aac,
            "flac" => SpeechResponseFormat::Flac,
            "wav" => SpeechResponseFormat::Wav,
            "pcm" | "pcm16" => SpeechResponseFormat::Pcm,
            _ => SpeechResponseFormat::Mp3,
        }
    }
}

fn is_truncated_json(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("unexpected end of json")
        || lower.contains("unexpected end of input")
        || lower.contains("unexpected eof")
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate_text(&self, prompt: &str, system_prompt: &str) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(Self::build_messages(prompt, system_prompt)?)
            .build()
            .map_err(|e| KitchenPaError::Runtime(e.to_string()))?;
        self.complete(request).await
    }

    async fn parse_structured_output(
        &self,
        prompt: &str,
        system_prompt: &str,
        json_schema: Value,
    ) -> Result<Value> {
        let name = json_schema
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("structured_output")
            .to_string();
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                name,
                description: None,
                schema: Some(json_schema),
                strict: Some(true),
            },
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(Self::build_messages(prompt, system_prompt)?)
            .response_format(response_format)
            .build()
            .map_err(|e| KitchenPaError::Runtime(e.to_string()))?;

        let content = self.complete(request).await?;
        serde_json::from_str(&content).map_err(|e| KitchenPaError::Serialization(e.to_string()))
    }

    async fn embed(&self, inputs: Vec<String>, model: Option<&str>) -> Result<Vec<Vec<f32>>> {
        let model = model.unwrap_or(&self.model).to_string();
        let request = CreateEmbeddingRequestArgs::default()
            .model(model)
            .input(EmbeddingInput::StringArray(inputs))
            .build()
            .map_err(|e| KitchenPaError::Runtime(e.to_string()))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| KitchenPaError::Http(e.to_string()))?;
        let mut data = response.data;
        data.sort_by_key(|item| item.index);
        Ok(data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl TextToSpeech for OpenAiProvider {
    async fn synthesize(&self, text: &str, voice: &str, format: &str) -> Result<Vec<u8>> {
        let request = CreateSpeechRequestArgs::default()
            .model(SpeechModel::Tts1)
            .input(text)
            .voice(Self::voice_from_str(voice))
            .response_format(Self::speech_format_from_str(format))
            .build()
            .map_err(|e| KitchenPaError::Runtime(e.to_string()))?;

        let response = self
            .client
            .audio()
            .speech()
            .create(request)
            .await
            .map_err(|e| KitchenPaError::Http(e.to_string()))?;

        Ok(response.bytes.to_vec())
    }
}

#[async_trait]
impl SpeechToText for OpenAiProvider {
    async fn transcribe(&self, audio: Vec<u8>, input_format: &str) -> Result<Transcript> {
        let file = AudioInput {
            source: InputSource::VecU8 {
                filename: format!("audio.{input_format}"),
                vec: audio,
            },
        };

        let request = CreateTranscriptionRequestArgs::default()
            .file(file)
            .model(TRANSCRIPTION_MODEL)
            .response_format(AudioResponseFormat::Json)
            .build()
            .map_err(|e| KitchenPaError::Runtime(e.to_string()))?;

        let response = self
            .client
            .audio()
            .transcription()
            .create(request)
            .await
            .map_err(|e| KitchenPaError::Http(e.to_string()))?;

        Ok(Transcript {
            text: response.text.trim().to_string(),
            language: self.language.clone(),
            segments: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_voices_and_formats() {
        assert!(matches!(OpenAiProvider::voice_from_str("Fable"), Voice::Fable));
        assert!(matches!(
            OpenAiProvider::voice_from_str("custom"),
            Voice::Other(ref name) if name == "custom"
        ));
        assert!(matches!(
            OpenAiProvider::speech_format_from_str("OPUS"),
            SpeechResponseFormat::Opus
        ));
        assert!(matches!(
            OpenAiProvider::speech_format_from_str("unknown"),
            SpeechResponseFormat::Mp3
        ));
    }

    #[test]
    fn extracts_text_from_raw_payload() {
        let payload = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"action\":\"none\"}"}}]
        });
        assert_eq!(
            OpenAiProvider::extract_text_from_value(&payload).as_deref(),
            Some("{\"action\":\"none\"}")
        );
        assert!(OpenAiProvider::extract_text_from_value(&serde_json::json!({})).is_none());
    }

    #[test]
    fn missing_api_key_is_config_error() {
        let err = OpenAiProvider::from_config(&OpenAiConfig::default())
            .err()
            .expect("missing key");
        assert!(matches!(err, KitchenPaError::Config(_)));
    }

    #[test]
    fn truncated_json_detection() {
        assert!(is_truncated_json("Unexpected end of JSON input"));
        assert!(!is_truncated_json("rate limited"));
    }
}
