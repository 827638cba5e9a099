use anyhow::{Context, Result, anyhow};
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::future;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::model::Message;
use crate::providers::http_errors::api_request_error;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const CHAT_COMPLETIONS: &str = "chat/completions";
const STREAM_DONE: &str = "[DONE]";
const DALLE_2: &str = "dall-e-2";
const DEFAULT_IMAGE_SIZE: &str = "1024x1024";
const DALLE_2_SIZES: [&str; 3] = ["256x256", "512x512", "1024x1024"];
const DALLE_3_SIZES: [&str; 3] = ["1024x1024", "1792x1024", "1024x1792"];

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub content: String,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub owned_by: String,
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub model: String,
    pub size: String,
    pub quality: String,
    pub count: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedImage {
    Url(String),
    Base64(String),
}

#[derive(Debug, Clone)]
pub struct EmbeddingRequest {
    pub input: String,
    pub model: String,
    pub dimensions: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

impl<'a> ChatCompletionBody<'a> {
    fn new(request: &'a ChatRequest, stream: bool) -> Self {
        Self {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|msg| ChatMessage {
                    role: msg.role.as_str(),
                    content: &msg.content,
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
struct ImageBody<'a> {
    prompt: &'a str,
    model: &'a str,
    n: u8,
    size: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    quality: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingBody<'a> {
    input: &'a str,
    model: &'a str,
    encoding_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Thin typed client for an OpenAI-compatible HTTP API.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: String,
    debug: bool,
    timeout_secs: u64,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"****")
            .field("debug", &self.debug)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(
        http: Client,
        base_url: &str,
        api_key: impl Into<String>,
        debug: bool,
        timeout_secs: u64,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            debug,
            timeout_secs,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatReply> {
        let body = ChatCompletionBody::new(request, false);
        let response = self.post_json(CHAT_COMPLETIONS, &body).await?;
        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        debug!(
            model = %request.model,
            response_len = content.len(),
            "received chat completion"
        );
        Ok(ChatReply {
            content,
            usage: parsed.usage,
        })
    }

    /// Streams reply fragments in arrival order until `[DONE]` or end of body.
    ///
    /// Only the idle read timeout applies, so a slow but live reply is not cut
    /// off. The stream ends right after the first error it yields.
    pub async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let body = ChatCompletionBody::new(request, true);
        let response = self.post(CHAT_COMPLETIONS, &body, None).await?;
        let api_url = self.endpoint(CHAT_COMPLETIONS);
        let timeout_secs = self.timeout_secs;

        let fragments = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                future::ready(!matches!(event, Ok(event) if event.data.trim() == STREAM_DONE))
            })
            .filter_map(move |event| {
                future::ready(match event {
                    Ok(event) => parse_stream_chunk(&event.data).transpose(),
                    Err(err) => Some(Err(stream_error(err, &api_url, timeout_secs))),
                })
            })
            // A broken transport keeps reporting the same failure on every poll.
            .scan(false, |failed, item| {
                if *failed {
                    return future::ready(None);
                }
                *failed = item.is_err();
                future::ready(Some(item))
            })
            .boxed();
        Ok(fragments)
    }

    /// Available models, sorted by id.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self.get("models").await?;
        let parsed: ModelList = response
            .json()
            .await
            .context("Failed to parse model list response")?;

        let mut models = parsed.data;
        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
    }

    pub async fn create_images(&self, request: &ImageRequest) -> Result<Vec<GeneratedImage>> {
        let body = ImageBody {
            prompt: &request.prompt,
            model: &request.model,
            n: request.count,
            size: normalize_image_size(&request.model, &request.size),
            quality: image_quality(&request.model, &request.quality),
        };
        let response = self.post_json("images/generations", &body).await?;
        let parsed: ImageResponse = response
            .json()
            .await
            .context("Failed to parse image generation response")?;

        Ok(parsed
            .data
            .into_iter()
            .filter_map(|image| match (image.url, image.b64_json) {
                (Some(url), _) => Some(GeneratedImage::Url(url)),
                (None, Some(data)) => Some(GeneratedImage::Base64(data)),
                (None, None) => None,
            })
            .collect())
    }

    /// Fetches a generated image. The credential is not sent to the image host.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        self.log_request("GET", url);
        let response = self
            .http
            .get(url)
            .timeout(self.request_deadline())
            .send()
            .await
            .map_err(|err| api_request_error(err, url, self.timeout_secs))?;
        let response = self.ensure_success(url, response).await?;
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read image body from '{url}'"))?;
        Ok(bytes.to_vec())
    }

    pub async fn create_embedding(&self, request: &EmbeddingRequest) -> Result<Vec<f32>> {
        let body = EmbeddingBody {
            input: &request.input,
            model: &request.model,
            encoding_format: "float",
            dimensions: request.dimensions,
        };
        let response = self.post_json("embeddings", &body).await?;
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        Ok(parsed
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .unwrap_or_default())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Overall limit for requests whose body is read in one go.
    fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    async fn get(&self, path: &str) -> Result<Response> {
        let api_url = self.endpoint(path);
        self.log_request("GET", &api_url);

        let response = self
            .http
            .get(&api_url)
            .bearer_auth(&self.api_key)
            .timeout(self.request_deadline())
            .send()
            .await
            .map_err(|err| self.request_failed(err, &api_url))?;
        self.ensure_success(&api_url, response).await
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<Response> {
        self.post(path, body, Some(self.request_deadline())).await
    }

    async fn post<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        deadline: Option<Duration>,
    ) -> Result<Response> {
        let api_url = self.endpoint(path);
        self.log_request("POST", &api_url);

        let mut builder = self.http.post(&api_url).bearer_auth(&self.api_key).json(body);
        if let Some(deadline) = deadline {
            builder = builder.timeout(deadline);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| self.request_failed(err, &api_url))?;
        self.ensure_success(&api_url, response).await
    }

    fn log_request(&self, method: &str, api_url: &str) {
        if self.debug {
            info!(method, api_url = %api_url, "sending API request");
        } else {
            debug!(method, api_url = %api_url, "sending API request");
        }
    }

    fn request_failed(&self, err: reqwest::Error, api_url: &str) -> anyhow::Error {
        warn!(api_url = %api_url, error = %err, "API request failed");
        api_request_error(err, api_url, self.timeout_secs)
    }

    async fn ensure_success(&self, api_url: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if self.debug {
            info!(api_url = %api_url, status = %status, "received API response");
        }
        if status.is_success() {
            return Ok(response);
        }

        let response_body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read response body>".to_string());
        warn!(
            api_url = %api_url,
            status = %status,
            response_body_len = response_body.len(),
            "API returned non-success status"
        );
        Err(anyhow!(
            "API request failed with status {}: {}",
            status,
            response_body
        ))
    }
}

fn stream_error(
    err: EventStreamError<reqwest::Error>,
    api_url: &str,
    timeout_secs: u64,
) -> anyhow::Error {
    match err {
        EventStreamError::Transport(err) => api_request_error(err, api_url, timeout_secs),
        other => anyhow!("Streaming response failed: {other}"),
    }
}

fn parse_stream_chunk(data: &str) -> Result<Option<String>> {
    if data.trim().is_empty() {
        return Ok(None);
    }

    let chunk: ChatChunk =
        serde_json::from_str(data).context("Failed to parse streamed chat chunk")?;
    if let Some(error) = chunk.error {
        let message = error
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(anyhow!("API reported an error mid-stream: {message}"));
    }
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

/// Maps a requested size onto one the model accepts.
pub fn normalize_image_size(model: &str, size: &str) -> &'static str {
    let allowed: &[&'static str] = if model == DALLE_2 {
        &DALLE_2_SIZES
    } else {
        &DALLE_3_SIZES
    };
    allowed
        .iter()
        .copied()
        .find(|candidate| *candidate == size)
        .unwrap_or(DEFAULT_IMAGE_SIZE)
}

/// `dall-e-2` has no quality setting.
pub fn image_quality(model: &str, quality: &str) -> Option<&'static str> {
    if model == DALLE_2 {
        return None;
    }
    Some(if quality == "hd" { "hd" } else { "standard" })
}
