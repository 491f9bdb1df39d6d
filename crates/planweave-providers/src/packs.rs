//! Model packs
//!
//! A pack assigns a concrete catalog model plus sampling config to every
//! role. The planner assignment additionally carries the conversation and
//! reserved-output token budgets derived from the chosen model's defaults.

use std::sync::Arc;

use crate::catalog::{AvailableModel, ModelCatalog};
use crate::chat::SamplingConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::roles::ModelRole;

/// A role's assignment inside a pack: the chosen model and sampling config
#[derive(Debug, Clone)]
pub struct ModelRoleConfig {
    pub role: ModelRole,
    pub model: Arc<AvailableModel>,
    pub sampling: SamplingConfig,
}

impl ModelRoleConfig {
    /// Assign `model` to `role`, enforcing the role's capability requirements
    pub fn new(role: ModelRole, model: Arc<AvailableModel>) -> ProviderResult<Self> {
        if !role.satisfied_by(&model.compatibility) {
            return Err(ProviderError::RoleUnsatisfied {
                role: role.to_string(),
                model: model.model_name.clone(),
            });
        }
        Ok(Self {
            role,
            model,
            sampling: role.default_sampling(),
        })
    }
}

/// The planner assignment, which also carries token budgets
#[derive(Debug, Clone)]
pub struct PlannerRoleConfig {
    pub config: ModelRoleConfig,
    /// Cap on conversation tokens, from the model's defaults
    pub max_convo_tokens: usize,
    /// Tokens reserved for model output, from the model's defaults
    pub reserved_output_tokens: usize,
}

impl PlannerRoleConfig {
    pub fn new(model: Arc<AvailableModel>) -> ProviderResult<Self> {
        let max_convo_tokens = model.default_max_convo_tokens;
        let reserved_output_tokens = model.default_reserved_output_tokens;
        Ok(Self {
            config: ModelRoleConfig::new(ModelRole::Planner, model)?,
            max_convo_tokens,
            reserved_output_tokens,
        })
    }

    /// Prompt budget: the model's context window minus reserved output
    pub fn max_prompt_tokens(&self) -> usize {
        self.config
            .model
            .max_tokens
            .saturating_sub(self.reserved_output_tokens)
    }
}

/// A full role → model mapping
#[derive(Debug, Clone)]
pub struct ModelPack {
    pub name: String,
    pub description: String,
    pub planner: PlannerRoleConfig,
    pub plan_summary: ModelRoleConfig,
    pub builder: ModelRoleConfig,
    pub namer: ModelRoleConfig,
    pub commit_msg: ModelRoleConfig,
    pub exec_status: ModelRoleConfig,
    pub verifier: ModelRoleConfig,
    pub auto_fix: ModelRoleConfig,
}

impl ModelPack {
    /// Build a pack that assigns one model to every role
    pub fn uniform(
        name: &str,
        description: &str,
        catalog: &ModelCatalog,
        model_name: &str,
    ) -> ProviderResult<Self> {
        let model = Arc::clone(catalog.require(model_name)?);
        Ok(Self {
            name: name.to_string(),
            description: description.to_string(),
            planner: PlannerRoleConfig::new(Arc::clone(&model))?,
            plan_summary: ModelRoleConfig::new(ModelRole::PlanSummary, Arc::clone(&model))?,
            builder: ModelRoleConfig::new(ModelRole::Builder, Arc::clone(&model))?,
            namer: ModelRoleConfig::new(ModelRole::Namer, Arc::clone(&model))?,
            commit_msg: ModelRoleConfig::new(ModelRole::CommitMsg, Arc::clone(&model))?,
            exec_status: ModelRoleConfig::new(ModelRole::ExecStatus, Arc::clone(&model))?,
            verifier: ModelRoleConfig::new(ModelRole::Verifier, Arc::clone(&model))?,
            auto_fix: ModelRoleConfig::new(ModelRole::AutoFix, model)?,
        })
    }

    /// The role's assignment inside this pack
    pub fn config_for(&self, role: ModelRole) -> &ModelRoleConfig {
        match role {
            ModelRole::Planner => &self.planner.config,
            ModelRole::PlanSummary => &self.plan_summary,
            ModelRole::Builder => &self.builder,
            ModelRole::Namer => &self.namer,
            ModelRole::CommitMsg => &self.commit_msg,
            ModelRole::ExecStatus => &self.exec_status,
            ModelRole::Verifier => &self.verifier,
            ModelRole::AutoFix => &self.auto_fix,
        }
    }

    /// The built-in packs, default first
    pub fn builtin(catalog: &ModelCatalog) -> ProviderResult<Vec<ModelPack>> {
        Ok(vec![
            ModelPack::uniform(
                "GPT-4o Latest",
                "Latest GPT-4o model for every role",
                catalog,
                "gpt-4o-2024-08-06",
            )?,
            ModelPack::uniform(
                "GPT-4o Mini",
                "Compact GPT-4o for efficient processing",
                catalog,
                "gpt-4o-mini",
            )?,
            ModelPack::uniform(
                "Claude 3.5 Sonnet",
                "Anthropic's Claude 3.5 Sonnet via OpenRouter",
                catalog,
                "anthropic/claude-3.5-sonnet",
            )?,
        ])
    }
}
