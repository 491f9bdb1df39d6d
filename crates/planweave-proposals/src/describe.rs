//! Describe phase driver and proposal engine
//!
//! `ProposalEngine::create_proposal` accepts a prompt request, hands the
//! caller a proposal id immediately, and drives the streamed two-phase run
//! (describe, then per-file build) against the configured model pack.

use std::{path::PathBuf, sync::Arc, time::Duration};

use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use planweave_providers::{
    ChatClient, ChatMessage, ChatRequest, ChunkStream, ModelPack, ToolDefinition, TokenCounter,
};

use crate::build::{build_plan, BuildConfig};
use crate::error::{ProposalError, ProposalResult};
use crate::lorem;
use crate::models::{PlanDescription, PromptRequest, Proposal};
use crate::parser::{ReplyOutline, ReplyParser};
use crate::prompt;
use crate::registry::ProposalRegistry;
use crate::stream::{OnStream, BUILD_PHASE, DESCRIPTION_PHASE, STREAM_FINISHED};
use crate::summary::{spawn_summarizer, SummaryJob, SummaryStore};

/// Watchdog duration for silence between stream chunks
pub const STREAM_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable selecting the runtime environment
pub const RUNTIME_ENV_VAR: &str = "PLANWEAVE_ENV";

const DESCRIBE_SYSTEM_PROMPT: &str = "You write one-line commit messages. Given an \
assistant reply that proposes changes to a set of files, call describe_plan with a short \
commit message describing the change.";

#[derive(Deserialize)]
struct DescribePlanArgs {
    commit_msg: String,
}

/// The proposal pipeline, wired to a model pack and a plans directory
#[derive(Clone)]
pub struct ProposalEngine {
    client: Arc<dyn ChatClient>,
    pack: Arc<ModelPack>,
    counter: Arc<TokenCounter>,
    registry: ProposalRegistry,
    summaries: SummaryStore,
    /// Plan working trees live under `<plans_dir>/<org_id>/<plan_id>`
    plans_dir: PathBuf,
    chunk_timeout: Duration,
}

impl ProposalEngine {
    pub fn new(client: Arc<dyn ChatClient>, pack: ModelPack, plans_dir: PathBuf) -> Self {
        Self {
            client,
            pack: Arc::new(pack),
            counter: Arc::new(TokenCounter::new()),
            registry: ProposalRegistry::new(),
            summaries: SummaryStore::new(),
            plans_dir,
            chunk_timeout: STREAM_CHUNK_TIMEOUT,
        }
    }

    /// Override the chunk-inactivity watchdog duration
    pub fn with_chunk_timeout(mut self, chunk_timeout: Duration) -> Self {
        self.chunk_timeout = chunk_timeout;
        self
    }

    pub fn registry(&self) -> &ProposalRegistry {
        &self.registry
    }

    pub fn summaries(&self) -> &SummaryStore {
        &self.summaries
    }

    pub fn token_counter(&self) -> &Arc<TokenCounter> {
        &self.counter
    }

    /// Cancel an in-flight proposal; not an error, a distinct terminal state
    pub fn cancel_proposal(&self, proposal_id: Uuid) -> bool {
        self.registry.cancel(proposal_id)
    }

    /// Working tree of one plan
    pub fn plan_dir(&self, request: &PromptRequest) -> PathBuf {
        self.plans_dir.join(&request.org_id).join(&request.plan_id)
    }

    /// Accept a prompt request and start the streamed run
    ///
    /// The proposal id is delivered through `on_stream` before any content
    /// chunk, and returned. Errors returned here (budget, stream open) are
    /// not additionally delivered through the callback; errors after accept
    /// arrive as a payload-less callback with the error set.
    pub async fn create_proposal(
        &self,
        request: PromptRequest,
        on_stream: OnStream,
    ) -> ProposalResult<Uuid> {
        if std::env::var(RUNTIME_ENV_VAR).as_deref() == Ok("test") {
            let proposal_id = Uuid::new_v4();
            lorem::stream_placeholder(proposal_id, &on_stream);
            return Ok(proposal_id);
        }

        let proposal_id = Uuid::new_v4();
        let root_id = request.root_proposal_id.unwrap_or(proposal_id);
        let cancel = CancellationToken::new();

        on_stream(&proposal_id.to_string(), None);

        let max_tokens = self.pack.planner.max_prompt_tokens();
        let assembled = prompt::assemble(&request, max_tokens, &self.counter)?;
        debug!(
            %proposal_id,
            tokens = assembled.total_tokens,
            budget = max_tokens,
            "assembled planner prompt"
        );

        self.registry.insert(Proposal::new(
            proposal_id,
            root_id,
            request.clone(),
            cancel.clone(),
        ));

        let chat = ChatRequest::new(
            assembled.messages.clone(),
            self.pack.planner.config.sampling,
        )
        .streaming();
        // opening the stream is a network read like any other: race it
        // against cancellation
        let opened = tokio::select! {
            _ = cancel.cancelled() => {
                self.registry.remove(proposal_id);
                return Err(ProposalError::Cancelled);
            }
            opened = self.client.stream_chat(&self.pack.planner.config.model, chat) => opened,
        };
        let stream = match opened {
            Ok(stream) => stream,
            Err(err) => {
                self.registry.remove(proposal_id);
                return Err(err.into());
            }
        };

        let engine = self.clone();
        let summarized_to = assembled.summarized_to;
        tokio::spawn(async move {
            engine
                .run_describe(proposal_id, root_id, request, summarized_to, stream, cancel, on_stream)
                .await;
        });

        Ok(proposal_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_describe(
        &self,
        proposal_id: Uuid,
        root_id: Uuid,
        request: PromptRequest,
        summarized_to: Option<chrono::DateTime<Utc>>,
        mut stream: ChunkStream,
        cancel: CancellationToken,
        on_stream: OnStream,
    ) {
        let mut parser = ReplyParser::new(Arc::clone(&self.counter));

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%proposal_id, "proposal cancelled during describe");
                    self.registry.remove(proposal_id);
                    return;
                }
                _ = tokio::time::sleep(self.chunk_timeout) => {
                    self.terminate(proposal_id, ProposalError::StreamTimeout, &on_stream);
                    return;
                }
                next = stream.next() => next,
            };

            match next {
                None => {
                    self.terminate(
                        proposal_id,
                        ProposalError::Protocol(
                            "stream closed without finish reason".to_string(),
                        ),
                        &on_stream,
                    );
                    return;
                }
                Some(Err(err)) => {
                    self.terminate(proposal_id, err.into(), &on_stream);
                    return;
                }
                Some(Ok(chunk)) => {
                    if chunk.choices.len() != 1 {
                        self.terminate(
                            proposal_id,
                            ProposalError::Protocol(format!(
                                "stream chunk carried {} choices",
                                chunk.choices.len()
                            )),
                            &on_stream,
                        );
                        return;
                    }

                    let choice = &chunk.choices[0];
                    let finished = choice
                        .finish_reason
                        .as_deref()
                        .is_some_and(|r| !r.is_empty());
                    if finished {
                        self.finish_describe(
                            proposal_id,
                            root_id,
                            &request,
                            summarized_to,
                            parser,
                            cancel,
                            on_stream,
                        )
                        .await;
                        return;
                    }

                    if let Some(content) = choice.delta.content.as_deref() {
                        self.registry
                            .update(proposal_id, |p| p.content.push_str(content));
                        parser.add_chunk(content);
                        on_stream(content, None);
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_describe(
        &self,
        proposal_id: Uuid,
        root_id: Uuid,
        request: &PromptRequest,
        summarized_to: Option<chrono::DateTime<Utc>>,
        parser: ReplyParser,
        cancel: CancellationToken,
        on_stream: OnStream,
    ) {
        on_stream(DESCRIPTION_PHASE, None);
        let response_timestamp = Utc::now();

        // the summarizer runs detached; the pipeline never waits on it
        if !request.conversation.is_empty() {
            let reply = self
                .registry
                .get(proposal_id)
                .map(|p| p.content)
                .unwrap_or_default();
            spawn_summarizer(
                Arc::clone(&self.client),
                self.pack.plan_summary.clone(),
                Arc::clone(&self.counter),
                self.summaries.clone(),
                SummaryJob {
                    root_id,
                    conversation: request.conversation.clone(),
                    prior: request.conversation_summaries.last().cloned(),
                    prompt_message: ChatMessage::user(prompt::wrapped_prompt(&request.prompt)),
                    reply,
                    response_timestamp,
                },
            );
        }

        let outline = parser.finish();

        let description = if outline.files.is_empty() {
            PlanDescription::no_plan(response_timestamp, summarized_to)
        } else {
            let commit_summary = match self.generate_commit_summary(proposal_id, &cancel).await
            {
                Ok(commit_summary) => commit_summary,
                Err(ProposalError::Cancelled) => {
                    debug!(%proposal_id, "proposal cancelled during describe");
                    self.registry.remove(proposal_id);
                    return;
                }
                Err(err) => {
                    self.terminate(proposal_id, err, &on_stream);
                    return;
                }
            };
            PlanDescription {
                made_plan: true,
                files: outline.files.clone(),
                commit_summary,
                response_timestamp,
                summarized_to_timestamp: summarized_to,
            }
        };

        self.registry
            .update(proposal_id, |p| p.finish(description.clone()));

        let frame = match serde_json::to_string(&description) {
            Ok(frame) => frame,
            Err(err) => {
                self.terminate(proposal_id, err.into(), &on_stream);
                return;
            }
        };
        on_stream(&frame, None);

        if outline.files.is_empty() {
            on_stream(STREAM_FINISHED, None);
            self.registry.remove(proposal_id);
            return;
        }

        on_stream(BUILD_PHASE, None);
        self.run_build(proposal_id, request, outline, cancel, on_stream)
            .await;
    }

    async fn run_build(
        &self,
        proposal_id: Uuid,
        request: &PromptRequest,
        outline: ReplyOutline,
        cancel: CancellationToken,
        on_stream: OnStream,
    ) {
        let config = BuildConfig {
            client: Arc::clone(&self.client),
            builder: self.pack.builder.clone(),
            chunk_timeout: self.chunk_timeout,
            plan_dir: self.plan_dir(request),
        };

        match build_plan(config, &outline, cancel, on_stream.clone()).await {
            Ok(()) => {
                on_stream(STREAM_FINISHED, None);
                self.registry.remove(proposal_id);
            }
            Err(ProposalError::Cancelled) => {
                debug!(%proposal_id, "proposal cancelled during build");
                self.registry.remove(proposal_id);
            }
            Err(err) => self.terminate(proposal_id, err, &on_stream),
        }
    }

    /// Ask the commit-msg model for the plan's one-line summary
    async fn generate_commit_summary(
        &self,
        proposal_id: Uuid,
        cancel: &CancellationToken,
    ) -> ProposalResult<String> {
        let content = self
            .registry
            .get(proposal_id)
            .map(|p| p.content)
            .unwrap_or_default();

        let messages = vec![
            ChatMessage::system(DESCRIBE_SYSTEM_PROMPT),
            ChatMessage::user(content),
        ];
        let config = &self.pack.commit_msg;
        let request =
            ChatRequest::new(messages, config.sampling).with_tool(describe_plan_tool());

        let completion = tokio::select! {
            _ = cancel.cancelled() => return Err(ProposalError::Cancelled),
            completion = self.client.complete(&config.model, request) => completion?,
        };
        let arguments = completion.tool_arguments().ok_or_else(|| {
            ProposalError::Protocol("describe_plan call missing from completion".to_string())
        })?;
        let parsed: DescribePlanArgs = serde_json::from_str(arguments)?;
        Ok(parsed.commit_msg)
    }

    /// Deliver the terminal error and drop the registry entry
    fn terminate(&self, proposal_id: Uuid, err: ProposalError, on_stream: &OnStream) {
        match &err {
            ProposalError::StreamTimeout => warn!(%proposal_id, "stream timeout due to inactivity"),
            other => error!(%proposal_id, "proposal failed: {other}"),
        }
        self.registry
            .update(proposal_id, |p| p.set_err(err.clone()));
        self.registry.remove(proposal_id);
        on_stream("", Some(err));
    }
}

fn describe_plan_tool() -> ToolDefinition {
    ToolDefinition {
        name: "describe_plan".to_string(),
        description: "Record a short commit message for the proposed changes".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "commit_msg": {
                    "type": "string",
                    "description": "One-line commit message"
                }
            },
            "required": ["commit_msg"]
        }),
    }
}
