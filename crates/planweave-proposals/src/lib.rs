//! Planweave proposal pipeline
//!
//! The server-side core of the coding assistant: token-budgeted prompt
//! assembly, the streamed describe → build run, concurrent per-file
//! builders with cancellation and watchdogs, and the in-memory proposal
//! registry with per-root conversation summaries.

pub mod build;
pub mod describe;
pub mod error;
pub mod lorem;
pub mod models;
pub mod parser;
pub mod prompt;
pub mod registry;
pub mod stream;
pub mod summary;

pub use build::{build_plan, BuildConfig, REMOVAL_MARKER};
pub use describe::{ProposalEngine, RUNTIME_ENV_VAR, STREAM_CHUNK_TIMEOUT};
pub use error::{ProposalError, ProposalResult};
pub use models::{
    ContextPart, ConversationSummary, ConvoMessage, PlanDescription, PromptRequest, Proposal,
    ProposalState,
};
pub use parser::{ReplyOutline, ReplyParser};
pub use prompt::{assemble, AssembledPrompt};
pub use registry::ProposalRegistry;
pub use stream::{
    file_finished_marker, parse_file_finished_marker, OnStream, BUILD_PHASE,
    DESCRIPTION_PHASE, STREAM_FINISHED,
};
pub use summary::{spawn_summarizer, SummaryJob, SummaryStore};
