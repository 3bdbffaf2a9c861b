pub mod core;
pub mod models;

pub use self::core::{Chat, ChatBuilder, answer};
pub use models::{GenerationSettings, Transcript, Turn};
