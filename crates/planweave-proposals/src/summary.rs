//! Rolling conversation summaries
//!
//! A background task per proposal root produces a summary of the
//! conversation so far and stores it process-wide, keyed by the root id.
//! The pipeline never waits on it; the next request reads the store.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;

use planweave_providers::{ChatClient, ChatMessage, ChatRequest, ModelRoleConfig, TokenCounter};

use crate::error::{ProposalError, ProposalResult};
use crate::models::{ConversationSummary, ConvoMessage};

const SUMMARIZE_PROMPT: &str = "Summarize the conversation so far in a compact form that \
preserves every decision, requirement, and file mentioned. Respond with the summary text \
only.";

struct RootEntry {
    /// Serializes summarizers for one root; the latest writer wins
    gate: tokio::sync::Mutex<()>,
    summary: Mutex<Option<ConversationSummary>>,
    done: Notify,
}

impl RootEntry {
    fn new() -> Self {
        Self {
            gate: tokio::sync::Mutex::new(()),
            summary: Mutex::new(None),
            done: Notify::new(),
        }
    }
}

/// Process-wide summary store keyed by proposal root id
#[derive(Clone, Default)]
pub struct SummaryStore {
    entries: Arc<Mutex<HashMap<Uuid, Arc<RootEntry>>>>,
}

impl SummaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, root_id: Uuid) -> Arc<RootEntry> {
        let mut entries = table(&self.entries);
        Arc::clone(
            entries
                .entry(root_id)
                .or_insert_with(|| Arc::new(RootEntry::new())),
        )
    }

    /// Latest summary for a root, if one completed
    pub fn get(&self, root_id: Uuid) -> Option<ConversationSummary> {
        let entry = self.entry(root_id);
        let summary = entry
            .summary
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        summary.clone()
    }

    /// Store a summary for a root and signal completion
    pub fn set(&self, root_id: Uuid, value: ConversationSummary) {
        let entry = self.entry(root_id);
        {
            let mut summary = entry
                .summary
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *summary = Some(value);
        }
        entry.done.notify_waiters();
    }

    /// Wait until the next summary completes for this root
    pub async fn completed(&self, root_id: Uuid) {
        let entry = self.entry(root_id);
        entry.done.notified().await;
    }
}

fn table(
    entries: &Mutex<HashMap<Uuid, Arc<RootEntry>>>,
) -> MutexGuard<'_, HashMap<Uuid, Arc<RootEntry>>> {
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Inputs for one summarizer run
pub struct SummaryJob {
    pub root_id: Uuid,
    /// The conversation the request carried
    pub conversation: Vec<ConvoMessage>,
    /// Latest prior summary, when one exists
    pub prior: Option<ConversationSummary>,
    /// The wrapped prompt message of the current request
    pub prompt_message: ChatMessage,
    /// The assistant's full reply content
    pub reply: String,
    pub response_timestamp: DateTime<Utc>,
}

/// Launch the summarizer in the background
///
/// Runs detached from the request that spawned it; the handle is returned
/// for callers that want to observe the outcome.
pub fn spawn_summarizer(
    client: Arc<dyn ChatClient>,
    config: ModelRoleConfig,
    counter: Arc<TokenCounter>,
    store: SummaryStore,
    job: SummaryJob,
) -> JoinHandle<ProposalResult<ConversationSummary>> {
    tokio::spawn(async move {
        let entry = store.entry(job.root_id);
        let _gate = entry.gate.lock().await;
        debug!(root_id = %job.root_id, "generating conversation summary");

        let mut messages = vec![ChatMessage::system(SUMMARIZE_PROMPT)];
        let num_messages = match &job.prior {
            Some(prior) => {
                messages.push(ChatMessage::assistant(prior.summary.clone()));
                prior.num_messages + 2
            }
            None => {
                for message in &job.conversation {
                    messages.push(message.message.clone());
                }
                job.conversation.len() + 2
            }
        };
        messages.push(job.prompt_message.clone());
        messages.push(ChatMessage::assistant(job.reply.clone()));

        let request = ChatRequest::new(messages, config.sampling);
        let completion = match client.complete(&config.model, request).await {
            Ok(completion) => completion,
            Err(err) => {
                error!(root_id = %job.root_id, "summary generation failed: {err}");
                return Err(err.into());
            }
        };
        let text = completion
            .content()
            .ok_or_else(|| {
                ProposalError::Protocol("summary completion had no content".to_string())
            })?
            .to_string();

        let summary = ConversationSummary {
            last_message_timestamp: job.response_timestamp,
            num_messages,
            tokens: counter.count(&text),
            summary: text,
        };
        store.set(job.root_id, summary.clone());
        debug!(root_id = %job.root_id, "stored conversation summary");
        Ok(summary)
    })
}
