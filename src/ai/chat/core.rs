use anyhow::{Error, Result};
use tokio::sync::mpsc;

use super::models::{GenerationSettings, Transcript, Turn};
use crate::ai::prompt::build_prompt;
use crate::gemini::{GenerationRequest, SharedCompletionClient};

/// Runs the next turn in chat by passing the history and a new
/// question to the LLM. When `tx` is set, fragments of the answer are
/// sent to it as they arrive.
///
/// Returns `None` when the model produced no text. Nothing is
/// recorded here, callers decide where the resulting `Turn` goes.
pub async fn answer(
    client: &SharedCompletionClient,
    settings: &GenerationSettings,
    history: &[Turn],
    question: &str,
    tx: Option<mpsc::UnboundedSender<String>>,
) -> Result<Option<Turn>, Error> {
    let question = question.trim();
    let request = GenerationRequest {
        model: settings.model,
        prompt: build_prompt(history, question)?,
        max_output_tokens: settings.max_output_tokens,
        temperature: settings.temperature,
    };

    tracing::debug!(
        "Generating answer with {} ({} prior turns, {} bytes of prompt)",
        request.model,
        history.len(),
        request.prompt.len()
    );

    let text = match tx {
        Some(tx) => client.generate_stream(tx, &request).await?,
        None => client.generate(&request).await?,
    };

    if text.is_empty() {
        tracing::warn!("Empty answer from {}", request.model);
        return Ok(None);
    }

    Ok(Some(Turn::new(question, &text)))
}

/// A stateful conversation with an LLM. Holds the transcript and
/// generation settings for one session.
///
/// Use `ChatBuilder` to construct a valid `Chat`.
pub struct Chat {
    client: SharedCompletionClient,
    settings: GenerationSettings,
    history_window: Option<usize>,
    streaming: bool,
    tx: Option<mpsc::UnboundedSender<String>>,
    transcript: Transcript,
}

impl Chat {
    /// Ask the next question. The turn is added to the transcript
    /// only when an answer was produced, errors leave the transcript
    /// untouched.
    pub async fn ask(&mut self, question: &str) -> Result<Option<Turn>, Error> {
        // ChatBuilder enforces that `streaming` and `tx` are always
        // set together
        let tx = if self.streaming { self.tx.clone() } else { None };
        let history = self.transcript.window(self.history_window);

        let turn = answer(&self.client, &self.settings, history, question, tx).await?;
        if let Some(turn) = &turn {
            self.transcript.append(turn.clone());
        }

        Ok(turn)
    }

    pub fn clear(&mut self) {
        self.transcript.clear();
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }
}

pub struct ChatBuilder {
    client: SharedCompletionClient,
    settings: GenerationSettings,
    history_window: Option<usize>,
    streaming: bool,
    tx: Option<mpsc::UnboundedSender<String>>,
    transcript: Transcript,
}

impl ChatBuilder {
    pub fn new(client: SharedCompletionClient) -> Self {
        Self {
            client,
            settings: GenerationSettings::default(),
            history_window: None,
            streaming: false,
            tx: None,
            transcript: Transcript::new(),
        }
    }

    pub fn build(self) -> Chat {
        Chat {
            client: self.client,
            settings: self.settings,
            history_window: self.history_window,
            streaming: self.streaming,
            tx: self.tx,
            transcript: self.transcript,
        }
    }

    pub fn settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn history_window(mut self, size: Option<usize>) -> Self {
        self.history_window = size;
        self
    }

    pub fn transcript(mut self, turns: Vec<Turn>) -> Self {
        self.transcript = Transcript::new_with_turns(turns);
        self
    }

    pub fn streaming(mut self, transmitter: mpsc::UnboundedSender<String>) -> Self {
        // Set the streaming flag and the transmitter
        self.streaming = true;
        self.tx = Some(transmitter);
        self
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use anyhow::bail;
    use async_trait::async_trait;

    use super::*;
    use crate::gemini::{CompletionClient, GeminiClient, Model};

    /// Answers from a script and records every prompt it was given.
    struct ScriptedClient {
        answers: Mutex<Vec<Result<String, String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(answers: Vec<Result<&str, &str>>) -> Arc<Self> {
            let mut answers: Vec<Result<String, String>> = answers
                .into_iter()
                .map(|a| a.map(String::from).map_err(String::from))
                .collect();
            answers.reverse();
            Arc::new(Self {
                answers: Mutex::new(answers),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, Error> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            match self.answers.lock().unwrap().pop() {
                Some(Ok(text)) => Ok(text),
                Some(Err(e)) => bail!(e),
                None => bail!("No more scripted answers"),
            }
        }
    }

    fn chat_with(client: Arc<ScriptedClient>) -> Chat {
        ChatBuilder::new(client).build()
    }

    #[test]
    fn test_builder_defaults() {
        let builder = ChatBuilder::new(ScriptedClient::new(vec![]));

        assert_eq!(builder.settings, GenerationSettings::default());
        assert_eq!(builder.history_window, None);
        assert!(!builder.streaming);
        assert!(builder.tx.is_none());
        assert!(builder.transcript.is_empty());
    }

    #[test]
    fn test_builder_chaining() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let settings = GenerationSettings::new(Model::Gemini25Pro, 1024, 0.2);

        let chat = ChatBuilder::new(ScriptedClient::new(vec![]))
            .settings(settings)
            .history_window(Some(4))
            .transcript(vec![Turn::new("Hello", "Hi")])
            .streaming(tx)
            .build();

        assert_eq!(chat.settings(), &settings);
        assert_eq!(chat.history_window, Some(4));
        assert_eq!(chat.transcript().len(), 1);
        assert!(chat.streaming);
        assert!(chat.tx.is_some());
    }

    #[tokio::test]
    async fn test_turns_are_appended_in_order() {
        let client = ScriptedClient::new(vec![Ok("4"), Ok("6"), Ok("8")]);
        let mut chat = chat_with(client.clone());

        chat.ask("What is 2+2?").await.unwrap();
        chat.ask("What is 3+3?").await.unwrap();
        let turn = chat.ask("What is 4+4?").await.unwrap();

        assert_eq!(turn, Some(Turn::new("What is 4+4?", "8")));
        assert_eq!(
            chat.transcript().snapshot(),
            vec![
                Turn::new("What is 2+2?", "4"),
                Turn::new("What is 3+3?", "6"),
                Turn::new("What is 4+4?", "8"),
            ]
        );
        assert_eq!(
            client.prompts(),
            vec![
                "User: What is 2+2?\nAssistant:",
                "User: What is 2+2?\nAssistant: 4\n\nUser: What is 3+3?\nAssistant:",
                "User: What is 2+2?\nAssistant: 4\n\nUser: What is 3+3?\nAssistant: 6\n\nUser: What is 4+4?\nAssistant:",
            ]
        );
    }

    #[tokio::test]
    async fn test_question_is_trimmed() {
        let client = ScriptedClient::new(vec![Ok("Hi")]);
        let mut chat = chat_with(client.clone());

        chat.ask("  Hello there \n").await.unwrap();

        assert_eq!(chat.transcript().snapshot(), vec![Turn::new("Hello there", "Hi")]);
        assert_eq!(client.prompts(), vec!["User: Hello there\nAssistant:"]);
    }

    #[tokio::test]
    async fn test_failure_does_not_append() {
        let client = ScriptedClient::new(vec![Ok("4"), Err("Service unavailable")]);
        let mut chat = chat_with(client);

        chat.ask("What is 2+2?").await.unwrap();
        let result = chat.ask("What is 3+3?").await;

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Service unavailable"));
        assert_eq!(chat.transcript().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_answer_does_not_append() {
        let client = ScriptedClient::new(vec![Ok("")]);
        let mut chat = chat_with(client);

        let turn = chat.ask("Anyone there?").await.unwrap();

        assert_eq!(turn, None);
        assert!(chat.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_clear_starts_fresh() {
        let client = ScriptedClient::new(vec![Ok("4"), Ok("6"), Ok("4")]);
        let mut chat = chat_with(client.clone());

        chat.ask("What is 2+2?").await.unwrap();
        chat.ask("What is 3+3?").await.unwrap();
        chat.clear();
        assert!(chat.transcript().is_empty());

        chat.ask("What is 2+2?").await.unwrap();

        let prompts = client.prompts();
        assert_eq!(prompts[2], prompts[0]);
        assert_eq!(prompts[2], "User: What is 2+2?\nAssistant:");
        assert_eq!(chat.transcript().len(), 1);
    }

    #[tokio::test]
    async fn test_history_window_limits_prompt() {
        let client = ScriptedClient::new(vec![Ok("1")]);
        let mut chat = ChatBuilder::new(client.clone())
            .history_window(Some(1))
            .transcript(vec![Turn::new("old", "a"), Turn::new("recent", "b")])
            .build();

        chat.ask("next").await.unwrap();

        assert_eq!(
            client.prompts(),
            vec!["User: recent\nAssistant: b\n\nUser: next\nAssistant:"]
        );
        // The window only limits what is sent, the transcript keeps
        // everything
        assert_eq!(chat.transcript().len(), 3);
    }

    #[tokio::test]
    async fn test_streaming_without_native_support() {
        let client = ScriptedClient::new(vec![Ok("Hello World")]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut chat = ChatBuilder::new(client).streaming(tx).build();

        chat.ask("Say hello").await.unwrap();

        assert_eq!(rx.try_recv().unwrap(), "Hello World");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_chat_basic_response() {
        let mut server = mockito::Server::new_async().await;

        let response_body = r#"{
            "candidates": [{
                "content": {
                    "parts": [{"text": "Hello! How can I help you today?"}],
                    "role": "model"
                },
                "finishReason": "STOP",
                "index": 0
            }]
        }"#;

        let _mock = server
            .mock("POST", "/v1beta/models/gemini-2.5-flash:generateContent")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(response_body)
            .create_async()
            .await;

        let client = GeminiClient::new(&server.url(), "test-key").unwrap();
        let mut chat = ChatBuilder::new(Arc::new(client)).build();

        let turn = chat.ask("Hi").await.unwrap();

        assert_eq!(
            turn,
            Some(Turn::new("Hi", "Hello! How can I help you today?"))
        );
        assert_eq!(chat.transcript().len(), 1);
    }

    #[tokio::test]
    async fn test_chat_stream_basic() {
        let mut server = mockito::Server::new_async().await;

        let sse_response = r#"data: {"candidates":[{"content":{"parts":[{"text":"Hello"}],"role":"model"}}]}

data: {"candidates":[{"content":{"parts":[{"text":" World"}],"role":"model"}}]}

data: {"candidates":[{"content":{"parts":[{"text":"!"}],"role":"model"},"finishReason":"STOP"}]}

"#;

        let _mock = server
            .mock(
                "POST",
                mockito::Matcher::Regex(
                    r"^/v1beta/models/gemini-2\.5-flash:streamGenerateContent".into(),
                ),
            )
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(sse_response)
            .create_async()
            .await;

        let client = GeminiClient::new(&server.url(), "test-key").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut chat = ChatBuilder::new(Arc::new(client)).streaming(tx).build();

        let turn = chat.ask("Say hello").await.unwrap().unwrap();
        assert_eq!(turn.answer, "Hello World!");

        let mut fragments = String::new();
        let mut count = 0;
        while let Ok(fragment) = rx.try_recv() {
            fragments.push_str(&fragment);
            count += 1;
        }
        assert_eq!(count, 3);
        assert_eq!(fragments, turn.answer);
    }

    #[tokio::test]
    async fn test_chat_provider_error() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/v1beta/models/gemini-2.5-flash:generateContent")
            .with_status(500)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":{"code":500,"message":"Internal error","status":"INTERNAL"}}"#)
            .create_async()
            .await;

        let client = GeminiClient::new(&server.url(), "test-key").unwrap();
        let mut chat = ChatBuilder::new(Arc::new(client))
            .transcript(vec![Turn::new("What is 2+2?", "4")])
            .build();

        let result = chat.ask("What is 3+3?").await;

        assert!(result.is_err());
        assert_eq!(chat.transcript().len(), 1);
    }
}
