//! Test utilities for integration tests
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{Error, bail};
use async_trait::async_trait;
use axum::{Router, body::Body};
use tokio::sync::Semaphore;

use qabot::api::AppState;
use qabot::api::app;
use qabot::core::AppConfig;
use qabot::gemini::{
    CompletionClient, GeminiClient, GenerationRequest, Model, SharedCompletionClient,
};

/// Creates a test application router that talks to a fake Gemini API
/// at `gemini_url` (usually a `mockito` server).
#[allow(dead_code)]
pub fn test_app(gemini_url: &str) -> Router {
    test_app_with_config(test_config(gemini_url))
}

#[allow(dead_code)]
pub fn test_config(gemini_url: &str) -> AppConfig {
    AppConfig {
        gemini_api_hostname: gemini_url.to_string(),
        gemini_api_key: String::from("test-api-key"),
        default_model: Model::Gemini25Flash,
        history_window: None,
    }
}

#[allow(dead_code)]
pub fn test_app_with_config(config: AppConfig) -> Router {
    let client = GeminiClient::from_config(&config).expect("Failed to create Gemini client");
    test_app_with_client(Arc::new(client), config)
}

#[allow(dead_code)]
pub fn test_app_with_client(client: SharedCompletionClient, config: AppConfig) -> Router {
    let app_state = AppState::new(client, config);
    app(Arc::new(RwLock::new(app_state)))
}

/// Completion client that holds every request until the test lets it
/// through with `release`. Answers come from a script in order and
/// every prompt is recorded.
#[allow(dead_code)]
pub struct GatedClient {
    gate: Semaphore,
    answers: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl GatedClient {
    pub fn new(answers: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Let `n` more requests complete.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for GatedClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, Error> {
        self.gate.acquire().await?.forget();
        self.prompts.lock().unwrap().push(request.prompt.clone());
        match self.answers.lock().unwrap().pop_front() {
            Some(answer) => Ok(answer),
            None => bail!("No more scripted answers"),
        }
    }
}

/// Read the whole response body. For SSE responses this waits until
/// the stream is closed.
#[allow(dead_code)]
pub async fn body_to_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Failed to read body");
    String::from_utf8(bytes.to_vec()).expect("Body is not UTF-8")
}

/// Server-sent events body for a streamed Gemini answer split into
/// `fragments`.
#[allow(dead_code)]
pub fn gemini_sse(fragments: &[&str]) -> String {
    fragments
        .iter()
        .map(|text| {
            let chunk = serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": text}], "role": "model"}}]
            });
            format!("data: {}\r\n\r\n", chunk)
        })
        .collect()
}

/// Matches a Gemini request whose prompt is exactly `prompt`.
#[allow(dead_code)]
pub fn prompt_matcher(prompt: &str) -> mockito::Matcher {
    mockito::Matcher::PartialJson(serde_json::json!({
        "contents": [{"role": "user", "parts": [{"text": prompt}]}]
    }))
}

#[allow(dead_code)]
pub fn stream_path() -> mockito::Matcher {
    mockito::Matcher::Regex(r"^/v1beta/models/gemini-2\.5-[a-z-]+:streamGenerateContent".into())
}
