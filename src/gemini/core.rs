use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use anyhow::{Context, Error, Result, anyhow, bail};
use async_trait::async_trait;
use clap::ValueEnum;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::AppConfig;

/// Gemini models that can be selected by the user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum Model {
    #[default]
    #[serde(rename = "gemini-2.5-flash")]
    #[value(name = "gemini-2.5-flash")]
    Gemini25Flash,
    #[serde(rename = "gemini-2.5-pro")]
    #[value(name = "gemini-2.5-pro")]
    Gemini25Pro,
    #[serde(rename = "gemini-2.5-flash-lite")]
    #[value(name = "gemini-2.5-flash-lite")]
    Gemini25FlashLite,
}

impl Model {
    pub const ALL: [Model; 3] = [
        Model::Gemini25Flash,
        Model::Gemini25Pro,
        Model::Gemini25FlashLite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Gemini25Flash => "gemini-2.5-flash",
            Model::Gemini25Pro => "gemini-2.5-pro",
            Model::Gemini25FlashLite => "gemini-2.5-flash-lite",
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Model {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Model::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| anyhow!("Unknown model: {}", s))
    }
}

// {
//     "candidates": [
//         {
//             "content": {
//                 "parts": [{"text": "4"}],
//                 "role": "model"
//             },
//             "finishReason": "STOP",
//             "index": 0
//         }
//     ],
//     "usageMetadata": {
//         "promptTokenCount": 12,
//         "candidatesTokenCount": 1,
//         "totalTokenCount": 13
//     },
//     "modelVersion": "gemini-2.5-flash"
// }
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(text: &str) -> Self {
        Self {
            role: Some(String::from("user")),
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub max_output_tokens: u32,
    pub temperature: f64,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
    #[serde(default)]
    pub total_token_count: u32,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

impl GenerateContentResponse {
    /// Text of the first candidate with every part joined together.
    /// No candidates (e.g. the prompt was blocked) is an empty answer.
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[derive(Deserialize, Debug)]
struct ApiErrorDetail {
    #[serde(default)]
    code: u16,
    message: String,
    #[serde(default)]
    status: String,
}

#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

/// Everything needed for one call to the generation endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    pub model: Model,
    pub prompt: String,
    pub max_output_tokens: u32,
    pub temperature: f64,
}

impl From<&GenerationRequest> for GenerateContentRequest {
    fn from(req: &GenerationRequest) -> Self {
        Self {
            contents: vec![Content::user(&req.prompt)],
            generation_config: GenerationConfig {
                max_output_tokens: req.max_output_tokens,
                temperature: req.temperature,
            },
        }
    }
}

/// A text generation backend. Callers only ever see plain text so
/// nothing outside the implementation needs to know the provider's
/// response shape.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Generate the full answer in a single request.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, Error>;

    /// Generate an answer, sending each fragment to `tx` as it becomes
    /// available. Returns the full answer which is always the
    /// concatenation of the fragments sent.
    ///
    /// Backends that can't stream send the whole answer as one
    /// fragment.
    async fn generate_stream(
        &self,
        tx: mpsc::UnboundedSender<String>,
        request: &GenerationRequest,
    ) -> Result<String, Error> {
        let text = self.generate(request).await?;
        if !text.is_empty() {
            // The result is ignored here because the answer is still
            // needed if the receiver went away
            let _ = tx.send(text.clone());
        }
        Ok(text)
    }
}

pub type SharedCompletionClient = Arc<dyn CompletionClient + 'static>;

/// Client for the Gemini REST API.
#[derive(Clone, Debug)]
pub struct GeminiClient {
    api_hostname: String,
    api_key: String,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_hostname: &str, api_key: &str) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .build()
            .context("Error initializing Gemini client")?;
        Ok(Self {
            api_hostname: api_hostname.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        Self::new(&config.gemini_api_hostname, &config.gemini_api_key)
    }

    fn url(&self, model: Model, method: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.api_hostname, model, method)
    }

    async fn post(
        &self,
        url: String,
        request: &GenerationRequest,
        timeout: Duration,
    ) -> Result<reqwest::Response, Error> {
        let payload = GenerateContentRequest::from(request);
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(ApiErrorBody { error }) => bail!(
                "Gemini API error {} ({}): {}",
                error.code,
                error.status,
                error.message
            ),
            Err(_) => bail!("Gemini API returned {}: {}", status, body),
        }
    }
}

fn parse_response(data: &str) -> Result<GenerateContentResponse, Error> {
    serde_json::from_str::<GenerateContentResponse>(data)
        .inspect_err(|e| tracing::error!("Parsing Gemini response failed for {}\nError:{}", data, e))
        .context("Malformed response from Gemini API")
}

/// Pull the JSON payload out of one SSE event, if there is one. A
/// payload split over several `data:` lines is joined with newlines.
fn event_data(event: &str) -> Option<String> {
    let data = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect::<Vec<_>>()
        .join("\n");
    let data = data.trim();
    if data.is_empty() {
        None
    } else {
        Some(data.to_string())
    }
}

#[async_trait]
impl CompletionClient for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, Error> {
        let url = self.url(request.model, "generateContent");
        let body = self
            .post(url, request, Duration::from_secs(60 * 10))
            .await?
            .text()
            .await?;
        let resp = parse_response(&body)?;

        if let Some(usage) = &resp.usage_metadata {
            tracing::debug!(
                "Gemini usage: prompt={} answer={} total={}",
                usage.prompt_token_count,
                usage.candidates_token_count,
                usage.total_token_count
            );
        }

        Ok(resp.text())
    }

    async fn generate_stream(
        &self,
        tx: mpsc::UnboundedSender<String>,
        request: &GenerationRequest,
    ) -> Result<String, Error> {
        let url = format!("{}?alt=sse", self.url(request.model, "streamGenerateContent"));
        let response = self
            .post(url, request, Duration::from_secs(60 * 5))
            .await?;

        let mut stream = response.bytes_stream();
        let mut content_buf = String::new();
        // Bytes are buffered rather than decoded per chunk since a
        // multi-byte character can be split across network frames
        let mut buffer: Vec<u8> = Vec::new();

        let mut handle_event = |event: &str| -> Result<(), Error> {
            let Some(data) = event_data(event) else {
                return Ok(());
            };
            let fragment = parse_response(&data)?.text();
            if fragment.is_empty() {
                return Ok(());
            }
            // Keep going even if nobody is listening so the full
            // answer can still be returned
            let _ = tx.send(fragment.clone());
            content_buf.push_str(&fragment);
            Ok(())
        };

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Failed reading Gemini response stream")?;
            buffer.extend_from_slice(&chunk);

            // Process all complete SSE events from the buffer
            while let Some((end, sep_len)) = find_event_end(&buffer) {
                let event: Vec<u8> = buffer.drain(..end + sep_len).take(end).collect();
                let event = std::str::from_utf8(&event)?;
                handle_event(event)?;
            }
        }

        // The final event may not be followed by a blank line
        if !buffer.is_empty() {
            let event = std::str::from_utf8(&buffer)?;
            handle_event(event)?;
        }

        Ok(content_buf)
    }
}

/// Position and length of the first blank line separating SSE
/// events. Gemini uses `\r\n\r\n` but plain `\n\n` is also valid.
fn find_event_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    match (crlf, lf) {
        (Some(a), Some(b)) if a <= b => Some((a, 4)),
        (_, Some(b)) => Some((b, 2)),
        (Some(a), None) => Some((a, 4)),
        (None, None) => None,
    }
}
