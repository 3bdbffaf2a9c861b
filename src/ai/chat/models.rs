//! The core models for managing a stateful chat with an LLM.
use std::ops::RangeInclusive;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::gemini::Model;

/// One question and the answer it received.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

impl Turn {
    pub fn new(question: &str, answer: &str) -> Self {
        Self {
            question: question.to_string(),
            answer: answer.to_string(),
        }
    }
}

/// Ordered history of completed turns for a single session. Turns
/// are only ever appended once their answer is known.
#[derive(Clone, Default, Debug)]
pub struct Transcript(Vec<Turn>);

impl Transcript {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn new_with_turns(turns: Vec<Turn>) -> Self {
        Self(turns)
    }

    pub fn append(&mut self, turn: Turn) {
        self.0.push(turn)
    }

    pub fn clear(&mut self) {
        self.0.clear()
    }

    pub fn snapshot(&self) -> Vec<Turn> {
        self.0.clone()
    }

    /// The most recent `size` turns, or all of them when `size` is
    /// `None`.
    pub fn window(&self, size: Option<usize>) -> &[Turn] {
        match size {
            Some(n) => &self.0[self.0.len().saturating_sub(n)..],
            None => &self.0,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Turn> {
        self.0.iter()
    }
}

pub const MAX_OUTPUT_TOKENS_RANGE: RangeInclusive<u32> = 64..=2048;
pub const MAX_OUTPUT_TOKENS_STEP: u32 = 64;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 512;
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = 0.0..=1.0;
pub const TEMPERATURE_STEP: f64 = 0.05;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// User adjustable generation settings.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct GenerationSettings {
    pub model: Model,
    pub max_output_tokens: u32,
    pub temperature: f64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: Model::default(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

impl GenerationSettings {
    pub fn new(model: Model, max_output_tokens: u32, temperature: f64) -> Self {
        Self {
            model,
            max_output_tokens,
            temperature,
        }
    }

    /// Check the settings are within the ranges offered to the user.
    pub fn validate(&self) -> Result<()> {
        if !MAX_OUTPUT_TOKENS_RANGE.contains(&self.max_output_tokens) {
            bail!(
                "max_tokens must be between {} and {}, got {}",
                MAX_OUTPUT_TOKENS_RANGE.start(),
                MAX_OUTPUT_TOKENS_RANGE.end(),
                self.max_output_tokens
            );
        }
        if !TEMPERATURE_RANGE.contains(&self.temperature) {
            bail!(
                "temperature must be between {} and {}, got {}",
                TEMPERATURE_RANGE.start(),
                TEMPERATURE_RANGE.end(),
                self.temperature
            );
        }
        Ok(())
    }
}
