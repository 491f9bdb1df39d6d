//! Data model for proposals
//!
//! A proposal is one end-to-end plan-generation run. It accumulates the
//! model's streamed reply, owns the run's cancellation handle, and ends in
//! either a plan description or an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use planweave_providers::ChatMessage;

use crate::error::ProposalError;

/// One piece of user-provided context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPart {
    /// File path, when the context is a file body
    pub path: Option<String>,
    /// The context text
    pub body: String,
}

/// One message of the prior conversation, with its token count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvoMessage {
    pub message: ChatMessage,
    pub tokens: usize,
    /// Monotonically increasing across the conversation
    pub timestamp: DateTime<Utc>,
}

/// A rolling summary of the conversation up to a timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Timestamp of the last message the summary covers
    pub last_message_timestamp: DateTime<Utc>,
    /// Number of messages summarized
    pub num_messages: usize,
    /// The summary text
    pub summary: String,
    /// Token count of the summary text
    pub tokens: usize,
}

/// A request to create a proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    pub org_id: String,
    pub plan_id: String,
    /// The user's natural-language prompt
    pub prompt: String,
    /// Files and free-form text the plan should be grounded in
    pub model_context: Vec<ContextPart>,
    /// Prior conversation in timestamp order
    pub conversation: Vec<ConvoMessage>,
    /// Available summaries in order of their last-message timestamp
    pub conversation_summaries: Vec<ConversationSummary>,
    pub parent_proposal_id: Option<Uuid>,
    pub root_proposal_id: Option<Uuid>,
}

/// Terminal description of a plan-generation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDescription {
    /// Whether the reply contained any labeled code blocks
    pub made_plan: bool,
    /// Paths referenced by the plan, in order of first appearance
    pub files: Vec<String>,
    /// Short model-generated commit summary
    pub commit_summary: String,
    pub response_timestamp: DateTime<Utc>,
    /// Set when prompt assembly replaced part of the conversation with a
    /// summary
    pub summarized_to_timestamp: Option<DateTime<Utc>>,
}

impl PlanDescription {
    /// Description of a run that produced no code blocks
    pub fn no_plan(
        response_timestamp: DateTime<Utc>,
        summarized_to_timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            made_plan: false,
            files: Vec::new(),
            commit_summary: String::new(),
            response_timestamp,
            summarized_to_timestamp,
        }
    }
}

/// Lifecycle stage of a proposal
#[derive(Debug, Clone, Default)]
pub enum ProposalState {
    #[default]
    Streaming,
    Finished(PlanDescription),
    Errored(ProposalError),
}

/// One in-flight plan-generation run
#[derive(Debug, Clone)]
pub struct Proposal {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    /// Equals `id` for a root proposal, otherwise inherited from the parent
    pub root_id: Uuid,
    pub request: PromptRequest,
    /// The model's streamed assistant text, appended chunk by chunk
    pub content: String,
    /// Cancels the provider stream and every child task of the run
    pub cancel: CancellationToken,
    pub state: ProposalState,
}

impl Proposal {
    pub fn new(
        id: Uuid,
        root_id: Uuid,
        request: PromptRequest,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            parent_id: request.parent_proposal_id,
            root_id,
            request,
            content: String::new(),
            cancel,
            state: ProposalState::Streaming,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn finish(&mut self, description: PlanDescription) {
        self.state = ProposalState::Finished(description);
    }

    pub fn set_err(&mut self, err: ProposalError) {
        self.state = ProposalState::Errored(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PromptRequest {
        PromptRequest {
            org_id: "org".to_string(),
            plan_id: "plan".to_string(),
            prompt: "do it".to_string(),
            model_context: Vec::new(),
            conversation: Vec::new(),
            conversation_summaries: Vec::new(),
            parent_proposal_id: None,
            root_proposal_id: None,
        }
    }

    #[test]
    fn root_proposal_has_own_root_id() {
        let id = Uuid::new_v4();
        let proposal = Proposal::new(id, id, request(), CancellationToken::new());
        assert!(proposal.is_root());
        assert_eq!(proposal.root_id, proposal.id);
    }

    #[test]
    fn child_inherits_root() {
        let parent = Uuid::new_v4();
        let root = Uuid::new_v4();
        let mut req = request();
        req.parent_proposal_id = Some(parent);
        req.root_proposal_id = Some(root);
        let proposal = Proposal::new(Uuid::new_v4(), root, req, CancellationToken::new());
        assert!(!proposal.is_root());
        assert_eq!(proposal.root_id, root);
    }

    #[test]
    fn state_transitions() {
        let id = Uuid::new_v4();
        let mut proposal = Proposal::new(id, id, request(), CancellationToken::new());
        assert!(matches!(proposal.state, ProposalState::Streaming));
        proposal.finish(PlanDescription::no_plan(Utc::now(), None));
        assert!(matches!(proposal.state, ProposalState::Finished(_)));
    }
}
