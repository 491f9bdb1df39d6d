//! Model roles and their requirements
//!
//! Each stage of the pipeline runs under a role; a role names the
//! capabilities a model must have and the sampling defaults it runs with.

use serde::{Deserialize, Serialize};

use crate::catalog::ModelCompatibility;
use crate::chat::SamplingConfig;

/// The roles a model can be assigned in a model pack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelRole {
    Planner,
    PlanSummary,
    Builder,
    Namer,
    CommitMsg,
    ExecStatus,
    Verifier,
    AutoFix,
}

impl ModelRole {
    /// Every role, in pack order
    pub const ALL: [ModelRole; 8] = [
        ModelRole::Planner,
        ModelRole::PlanSummary,
        ModelRole::Builder,
        ModelRole::Namer,
        ModelRole::CommitMsg,
        ModelRole::ExecStatus,
        ModelRole::Verifier,
        ModelRole::AutoFix,
    ];

    /// The capability subset a model must cover to serve this role
    pub fn required_compatibility(&self) -> ModelCompatibility {
        let base = ModelCompatibility {
            openai_compatible: true,
            ..ModelCompatibility::default()
        };
        match self {
            ModelRole::Planner | ModelRole::PlanSummary => ModelCompatibility {
                streaming: true,
                ..base
            },
            ModelRole::Builder | ModelRole::Verifier | ModelRole::AutoFix => {
                ModelCompatibility {
                    streaming: true,
                    function_calling: true,
                    ..base
                }
            }
            ModelRole::Namer => base,
            ModelRole::CommitMsg | ModelRole::ExecStatus => ModelCompatibility {
                function_calling: true,
                ..base
            },
        }
    }

    /// Default sampling config for the role
    pub fn default_sampling(&self) -> SamplingConfig {
        match self {
            ModelRole::Planner => SamplingConfig::new(0.3, 0.3),
            ModelRole::PlanSummary | ModelRole::Verifier => SamplingConfig::new(0.2, 0.2),
            ModelRole::Builder | ModelRole::ExecStatus | ModelRole::AutoFix => {
                SamplingConfig::new(0.1, 0.1)
            }
            ModelRole::Namer | ModelRole::CommitMsg => SamplingConfig::new(0.8, 0.5),
        }
    }

    /// True when a model with `compatibility` can serve this role
    pub fn satisfied_by(&self, compatibility: &ModelCompatibility) -> bool {
        compatibility.covers(&self.required_compatibility())
    }

    /// Stable name used in errors and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::Planner => "planner",
            ModelRole::PlanSummary => "plan-summary",
            ModelRole::Builder => "builder",
            ModelRole::Namer => "namer",
            ModelRole::CommitMsg => "commit-msg",
            ModelRole::ExecStatus => "exec-status",
            ModelRole::Verifier => "verifier",
            ModelRole::AutoFix => "auto-fix",
        }
    }
}

impl std::fmt::Display for ModelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
