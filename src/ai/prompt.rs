//! Reusable prompts using Handlebars for templating. Handlebars adds
//! additional security controls since it can't do much out of the box
//! without registering your own helpers. This is ideal since user and
//! LLM text should be considered untrusted.
//!
//! Prompts are plain text sent to the model so HTML escaping is turned
//! off.

use std::fmt;
use std::sync::LazyLock;

use anyhow::Result;
use handlebars::Handlebars;
use serde_json::json;

use super::chat::models::Turn;

#[derive(Debug)]
pub enum Prompt {
    Conversation,
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// Every block tag shares a line with text so Handlebars never strips
// the surrounding whitespace.
const CONVERSATION_PROMPT: &str = "{{#each history}}User: {{question}}\nAssistant: {{answer}}\n\n{{/each}}User: {{question}}\nAssistant:";

pub fn templates<'a>() -> Handlebars<'a> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    registry.register_escape_fn(handlebars::no_escape);
    registry
        .register_template_string(&Prompt::Conversation.to_string(), CONVERSATION_PROMPT)
        .expect("Failed to register template");
    registry
}

static TEMPLATES: LazyLock<Handlebars<'static>> = LazyLock::new(templates);

/// Flatten the conversation so far plus the new question into the
/// text block sent to the model. The whole history is replayed in
/// order every time.
pub fn build_prompt(history: &[Turn], question: &str) -> Result<String> {
    let prompt = TEMPLATES.render(
        &Prompt::Conversation.to_string(),
        &json!({
            "history": history,
            "question": question,
        }),
    )?;
    Ok(prompt)
}
