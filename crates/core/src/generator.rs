use crate::error::ChatError;
use crate::models::{Answer, ChatOptions, RetrievalResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/";
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

const GROUNDING_INSTRUCTION: &str = "You are a helpful assistant that answers questions \
using only the provided context from the user's documents. If the context does not contain \
the answer, say that the documents do not cover it instead of guessing.";

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String, ChatError>;
}

/// Grounding instruction, numbered context passages in the given order, then the question.
pub fn build_prompt(question: &str, context: &RetrievalResult) -> String {
    let mut prompt = String::new();
    prompt.push_str(GROUNDING_INSTRUCTION);
    prompt.push_str("\n\nContext:\n");

    if context.is_empty() {
        prompt.push_str("(no relevant passages were found)\n");
    }
    for (position, chunk) in context.chunks().enumerate() {
        prompt.push_str(&format!("[{}] {}\n", position + 1, chunk.text.trim()));
    }

    prompt.push_str("\nQuestion: ");
    prompt.push_str(question.trim());
    prompt.push('\n');
    prompt
}

pub async fn generate_answer(
    generator: &dyn Generator,
    question: &str,
    context: RetrievalResult,
) -> Result<Answer, ChatError> {
    let prompt = build_prompt(question, &context);
    debug!(
        model = generator.model_name(),
        passages = context.len(),
        prompt_chars = prompt.len(),
        "generating answer"
    );
    let text = generator.generate(&prompt).await?;
    Ok(Answer {
        text,
        grounding: context,
    })
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

enum Attempt {
    Done(String),
    Retryable(ChatError),
}

/// Client for the Gemini `generateContent` REST endpoint.
pub struct GeminiGenerator {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiGenerator {
    pub fn new(options: &ChatOptions) -> Result<Self, ChatError> {
        Self::with_base_url(options, GEMINI_BASE_URL)
    }

    pub fn with_base_url(options: &ChatOptions, base_url: &str) -> Result<Self, ChatError> {
        let api_key = options.require_api_key()?.to_string();
        let model = options.generation_model.trim();
        if model.is_empty() {
            return Err(ChatError::Configuration(
                "generation model name is empty".to_string(),
            ));
        }

        // `join` replaces the last path segment unless the base ends in a slash.
        let base = format!("{}/", base_url.trim_end_matches('/'));
        let endpoint = Url::parse(&base)
            .and_then(|base| base.join(&format!("models/{model}:generateContent")))
            .map_err(|error| ChatError::Configuration(format!("invalid model endpoint: {error}")))?;

        let client = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|error| ChatError::Configuration(format!("http client: {error}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model: model.to_string(),
            temperature: options.temperature,
            max_output_tokens: options.max_output_tokens,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn attempt(&self, prompt: &str) -> Result<Attempt, ChatError> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        };

        let response = match self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                return Ok(Attempt::Retryable(ChatError::generation_with_source(
                    format!("request to {} failed", self.model),
                    error,
                )))
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = ChatError::generation(format!(
                "{} returned {}: {}",
                self.model,
                status,
                body.trim()
            ));
            return if is_retryable(status) {
                Ok(Attempt::Retryable(error))
            } else {
                Err(error)
            };
        }

        let parsed: GenerateResponse = response.json().await.map_err(|error| {
            ChatError::generation_with_source(format!("unreadable response from {}", self.model), error)
        })?;
        extract_text(parsed).map(Attempt::Done)
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    /// One retry after a short backoff for transport errors, 429 and 5xx.
    async fn generate(&self, prompt: &str) -> Result<String, ChatError> {
        match self.attempt(prompt).await? {
            Attempt::Done(text) => return Ok(text),
            Attempt::Retryable(error) => {
                warn!(model = %self.model, error = %error, "generation failed, retrying once");
            }
        }

        tokio::time::sleep(RETRY_BACKOFF).await;
        match self.attempt(prompt).await? {
            Attempt::Done(text) => Ok(text),
            Attempt::Retryable(error) => Err(error),
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn extract_text(response: GenerateResponse) -> Result<String, ChatError> {
    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ChatError::generation("model returned no text"));
    }
    Ok(text)
}
