//! Public types for the settings API
use serde::Serialize;

use crate::gemini::Model;

#[derive(Serialize)]
pub struct Range<T: Serialize> {
    pub min: T,
    pub max: T,
    pub step: T,
    pub default: T,
}

#[derive(Serialize)]
pub struct SettingsResponse {
    pub models: Vec<Model>,
    pub default_model: Model,
    pub max_tokens: Range<u32>,
    pub temperature: Range<f64>,
}
