use std::fmt;
use std::str::FromStr;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

pub const API_KEY_ENV: &str = "GROQ_API_KEY";
pub const MODEL_ENV: &str = "GROQ_MODEL";

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// groq models offered in the selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroqModel {
    #[default]
    #[serde(rename = "llama-3.1-8b-instant")]
    Llama31_8bInstant,
    #[serde(rename = "meta-llama/llama-guard-4-12b")]
    LlamaGuard4_12b,
}

impl GroqModel {
    pub const ALL: [GroqModel; 2] = [GroqModel::Llama31_8bInstant, GroqModel::LlamaGuard4_12b];

    pub fn id(self) -> &'static str {
        match self {
            GroqModel::Llama31_8bInstant => "llama-3.1-8b-instant",
            GroqModel::LlamaGuard4_12b => "meta-llama/llama-guard-4-12b",
        }
    }

    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|m| *m == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    pub fn prev(self) -> Self {
        let idx = Self::ALL.iter().position(|m| *m == self).unwrap_or(0);
        Self::ALL[(idx + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

impl fmt::Display for GroqModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown model id '{0}'")]
pub struct UnknownModel(pub String);

impl FromStr for GroqModel {
    type Err = UnknownModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.id() == s.trim())
            .ok_or_else(|| UnknownModel(s.to_string()))
    }
}

/// operator-supplied settings. the key lives in memory only.
#[derive(Resource, Clone, Default, PartialEq, Eq)]
pub struct ChatSettings {
    pub api_key: String,
    pub model: GroqModel,
}

impl ChatSettings {
    pub fn new(api_key: impl Into<String>, model: GroqModel) -> Self {
        Self { api_key: api_key.into(), model }
    }

    /// seeds from `GROQ_API_KEY` / `GROQ_MODEL`; both optional.
    pub fn from_env() -> Self {
        let api_key = std::env::var(API_KEY_ENV).unwrap_or_default();
        let model = match std::env::var(MODEL_ENV) {
            Ok(raw) => raw.parse::<GroqModel>().unwrap_or_else(|err| {
                warn!(target: "bevy_llm_chat", "{err}, falling back to {}", GroqModel::default());
                GroqModel::default()
            }),
            Err(_) => GroqModel::default(),
        };
        info!(
            target: "bevy_llm_chat",
            "settings from env: model='{}', key_present={}",
            model, !api_key.is_empty()
        );
        Self { api_key, model }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

impl fmt::Debug for ChatSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatSettings")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .finish()
    }
}

pub(crate) fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "<empty>" } else { "<redacted>" }
}
