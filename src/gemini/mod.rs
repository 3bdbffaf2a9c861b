//! Client for Google's Gemini text generation API.

mod core;

pub use self::core::*;
