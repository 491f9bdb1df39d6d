//! Static model catalog
//!
//! Describes the models the engine can route to. The catalog is built once
//! at startup and injected wherever model lookup is needed; model names are
//! unique across the catalog.

use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, ProviderResult};
use crate::roles::ModelRole;

/// Environment variable holding the OpenAI API key
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";
/// Environment variable holding the OpenRouter API key
pub const OPENROUTER_API_KEY_VAR: &str = "OPENROUTER_API_KEY";
/// Environment variable holding the Together API key
pub const TOGETHER_API_KEY_VAR: &str = "TOGETHER_API_KEY";

/// Providers the engine knows how to talk to (all OpenAI-compatible)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelProvider {
    OpenAi,
    OpenRouter,
    Together,
}

impl ModelProvider {
    /// Environment variable that holds this provider's API key
    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            ModelProvider::OpenAi => OPENAI_API_KEY_VAR,
            ModelProvider::OpenRouter => OPENROUTER_API_KEY_VAR,
            ModelProvider::Together => TOGETHER_API_KEY_VAR,
        }
    }

    /// Base URL of the provider's OpenAI-compatible API
    pub fn base_url(&self) -> &'static str {
        match self {
            ModelProvider::OpenAi => "https://api.openai.com/v1",
            ModelProvider::OpenRouter => "https://openrouter.ai/api/v1",
            ModelProvider::Together => "https://api.together.xyz/v1",
        }
    }
}

/// Capability set of a model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCompatibility {
    pub openai_compatible: bool,
    pub json_response_mode: bool,
    pub streaming: bool,
    pub function_calling: bool,
    pub streaming_function_calls: bool,
    pub image_support: bool,
}

impl ModelCompatibility {
    /// Every capability enabled
    pub const FULL: ModelCompatibility = ModelCompatibility {
        openai_compatible: true,
        json_response_mode: true,
        streaming: true,
        function_calling: true,
        streaming_function_calls: true,
        image_support: true,
    };

    /// Every capability except image input
    pub const FULL_EXCEPT_IMAGE: ModelCompatibility = ModelCompatibility {
        image_support: false,
        ..ModelCompatibility::FULL
    };

    /// True when this set covers everything `required` asks for
    pub fn covers(&self, required: &ModelCompatibility) -> bool {
        (!required.openai_compatible || self.openai_compatible)
            && (!required.json_response_mode || self.json_response_mode)
            && (!required.streaming || self.streaming)
            && (!required.function_calling || self.function_calling)
            && (!required.streaming_function_calls || self.streaming_function_calls)
            && (!required.image_support || self.image_support)
    }
}

/// A static descriptor for one model the engine can use
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableModel {
    /// Human-readable description
    pub description: String,
    /// Provider serving the model
    pub provider: ModelProvider,
    /// Model name as sent on the wire; unique across the catalog
    pub model_name: String,
    /// Maximum context window in tokens
    pub max_tokens: usize,
    /// Default cap on conversation tokens for the planner role
    pub default_max_convo_tokens: usize,
    /// Default number of tokens reserved for model output
    pub default_reserved_output_tokens: usize,
    /// Environment variable holding the API key for this model
    pub api_key_env_var: String,
    /// Base URL of the serving endpoint
    pub base_url: String,
    /// Capability set
    pub compatibility: ModelCompatibility,
}

impl AvailableModel {
    fn new(
        description: &str,
        provider: ModelProvider,
        model_name: &str,
        max_tokens: usize,
        default_max_convo_tokens: usize,
        default_reserved_output_tokens: usize,
        compatibility: ModelCompatibility,
    ) -> Self {
        Self {
            description: description.to_string(),
            provider,
            model_name: model_name.to_string(),
            max_tokens,
            default_max_convo_tokens,
            default_reserved_output_tokens,
            api_key_env_var: provider.api_key_env_var().to_string(),
            base_url: provider.base_url().to_string(),
            compatibility,
        }
    }
}

/// Read-only model catalog with a by-name index
///
/// Built once at startup and passed by reference (or `Arc`) to whoever
/// needs model lookup, instead of living in a mutable global.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<Arc<AvailableModel>>,
    by_name: HashMap<String, Arc<AvailableModel>>,
}

impl ModelCatalog {
    /// Build a catalog, rejecting duplicate model names
    pub fn new(models: Vec<AvailableModel>) -> ProviderResult<Self> {
        let mut by_name = HashMap::new();
        let mut owned = Vec::with_capacity(models.len());
        for model in models {
            let model = Arc::new(model);
            if by_name
                .insert(model.model_name.clone(), Arc::clone(&model))
                .is_some()
            {
                return Err(ProviderError::DuplicateModel(model.model_name.clone()));
            }
            owned.push(model);
        }
        Ok(Self {
            models: owned,
            by_name,
        })
    }

    /// The built-in catalog
    pub fn builtin() -> Self {
        let claude_compat = ModelCompatibility {
            streaming_function_calls: false,
            ..ModelCompatibility::FULL
        };

        let models = vec![
            AvailableModel::new(
                "OpenAI's latest gpt-4o model",
                ModelProvider::OpenAi,
                "gpt-4o-2024-08-06",
                128_000,
                10_000,
                4_096,
                ModelCompatibility::FULL,
            ),
            AvailableModel::new(
                "OpenAI's GPT-4o mini model",
                ModelProvider::OpenAi,
                "gpt-4o-mini",
                128_000,
                10_000,
                4_096,
                ModelCompatibility::FULL,
            ),
            AvailableModel::new(
                "OpenAI's latest gpt-4-turbo model",
                ModelProvider::OpenAi,
                "gpt-4-turbo",
                128_000,
                10_000,
                4_096,
                ModelCompatibility::FULL_EXCEPT_IMAGE,
            ),
            AvailableModel::new(
                "OpenAI's gpt-4 model",
                ModelProvider::OpenAi,
                "gpt-4",
                8_000,
                2_500,
                1_000,
                ModelCompatibility {
                    json_response_mode: false,
                    image_support: false,
                    ..ModelCompatibility::FULL
                },
            ),
            AvailableModel::new(
                "OpenAI's latest gpt-3.5-turbo model",
                ModelProvider::OpenAi,
                "gpt-3.5-turbo",
                16_385,
                5_000,
                2_000,
                ModelCompatibility::FULL_EXCEPT_IMAGE,
            ),
            AvailableModel::new(
                "Anthropic Claude 3.5 Sonnet via OpenRouter",
                ModelProvider::OpenRouter,
                "anthropic/claude-3.5-sonnet",
                200_000,
                15_000,
                4_096,
                ModelCompatibility {
                    image_support: true,
                    ..claude_compat
                },
            ),
            AvailableModel::new(
                "Anthropic Claude 3 Opus via OpenRouter",
                ModelProvider::OpenRouter,
                "anthropic/claude-3-opus",
                200_000,
                15_000,
                4_096,
                claude_compat,
            ),
            AvailableModel::new(
                "Anthropic Claude 3 Haiku via OpenRouter",
                ModelProvider::OpenRouter,
                "anthropic/claude-3-haiku",
                200_000,
                15_000,
                4_096,
                ModelCompatibility {
                    image_support: true,
                    ..claude_compat
                },
            ),
            AvailableModel::new(
                "Google Gemini Pro 1.5 via OpenRouter",
                ModelProvider::OpenRouter,
                "google/gemini-pro-1.5",
                2_800_000,
                100_000,
                22_937,
                ModelCompatibility {
                    image_support: true,
                    ..claude_compat
                },
            ),
            AvailableModel::new(
                "Mixtral-8x22B via Together.ai",
                ModelProvider::Together,
                "mistralai/Mixtral-8x22B-Instruct-v0.1",
                65_536,
                10_000,
                4_096,
                ModelCompatibility {
                    openai_compatible: true,
                    streaming: true,
                    ..ModelCompatibility::default()
                },
            ),
            AvailableModel::new(
                "Mixtral-8x7B via Together.ai",
                ModelProvider::Together,
                "mistralai/Mixtral-8x7B-Instruct-v0.1",
                32_768,
                5_000,
                4_096,
                ModelCompatibility {
                    image_support: false,
                    streaming_function_calls: false,
                    ..ModelCompatibility::FULL
                },
            ),
            AvailableModel::new(
                "CodeLlama-34b via Together.ai",
                ModelProvider::Together,
                "togethercomputer/CodeLlama-34b-Instruct",
                16_384,
                10_000,
                4_096,
                ModelCompatibility {
                    image_support: false,
                    streaming_function_calls: false,
                    ..ModelCompatibility::FULL
                },
            ),
        ];

        // Built-in names are distinct; new() only fails on duplicates.
        Self::new(models).unwrap_or_else(|_| Self {
            models: Vec::new(),
            by_name: HashMap::new(),
        })
    }

    /// Look up a model by its wire name
    pub fn get(&self, model_name: &str) -> Option<&Arc<AvailableModel>> {
        self.by_name.get(model_name)
    }

    /// Look up a model by name, failing with `UnknownModel`
    pub fn require(&self, model_name: &str) -> ProviderResult<&Arc<AvailableModel>> {
        self.get(model_name)
            .ok_or_else(|| ProviderError::UnknownModel(model_name.to_string()))
    }

    /// All models in catalog order
    pub fn models(&self) -> &[Arc<AvailableModel>] {
        &self.models
    }

    /// Models whose capability set covers the role's required set
    pub fn compatible_models(&self, role: ModelRole) -> Vec<&Arc<AvailableModel>> {
        let required = role.required_compatibility();
        self.models
            .iter()
            .filter(|m| m.compatibility.covers(&required))
            .collect()
    }
}
