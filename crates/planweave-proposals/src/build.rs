//! Build phase driver
//!
//! For each file the describe phase referenced, a builder task streams a
//! merge of the proposed block into the current file body. Tasks run in
//! parallel under the proposal's cancellation root; committed writes to the
//! working tree happen strictly in the describe-parser file order.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use planweave_providers::{ChatClient, ChatMessage, ChatRequest, ModelRoleConfig, ToolDefinition};

use crate::error::{ProposalError, ProposalResult};
use crate::parser::ReplyOutline;
use crate::stream::{file_finished_marker, OnStream};

/// Marker a proposed block carries when the file's contents were removed
pub const REMOVAL_MARKER: &str = "removed:";

const BUILD_SYSTEM_PROMPT: &str = "You merge a proposed change into a file. You are given \
the current contents of the file and a proposed change block. Call write_merged_file with \
the complete contents of the file after applying the change. Output the entire file, not \
just the changed lines.";

/// Everything a build run needs besides the outline
pub struct BuildConfig {
    pub client: Arc<dyn ChatClient>,
    pub builder: ModelRoleConfig,
    pub chunk_timeout: Duration,
    /// Root of the plan's working tree
    pub plan_dir: PathBuf,
}

#[derive(Deserialize)]
struct MergedFileArgs {
    content: String,
}

/// Run one builder task per referenced file and commit results in order
pub async fn build_plan(
    config: BuildConfig,
    outline: &ReplyOutline,
    cancel: CancellationToken,
    on_stream: OnStream,
) -> ProposalResult<()> {
    let files = outline.files.clone();
    if files.is_empty() {
        return Ok(());
    }
    debug!(files = files.len(), "starting build phase");

    let (tx, mut rx) = mpsc::channel::<(usize, String)>(files.len());
    let mut tasks: JoinSet<ProposalResult<()>> = JoinSet::new();

    for (index, path) in files.iter().enumerate() {
        let proposed = outline
            .file_contents
            .get(path)
            .cloned()
            .unwrap_or_default();
        tasks.spawn(build_file(
            Arc::clone(&config.client),
            config.builder.clone(),
            config.chunk_timeout,
            config.plan_dir.clone(),
            index,
            path.clone(),
            proposed,
            cancel.clone(),
            on_stream.clone(),
            tx.clone(),
        ));
    }
    drop(tx);

    let mut pending: BTreeMap<usize, String> = BTreeMap::new();
    let mut next_index = 0;
    let mut tasks_done = false;

    while next_index < files.len() {
        tokio::select! {
            joined = tasks.join_next(), if !tasks_done => {
                match joined {
                    None => tasks_done = true,
                    Some(Err(join_err)) if join_err.is_panic() => {
                        cancel.cancel();
                        tasks.abort_all();
                        let message = panic_message(join_err.into_panic());
                        error!("builder task panicked: {message}");
                        return Err(ProposalError::Panic(message));
                    }
                    Some(Err(_)) => {
                        cancel.cancel();
                        tasks.abort_all();
                        return Err(ProposalError::Cancelled);
                    }
                    Some(Ok(Err(err))) => {
                        cancel.cancel();
                        tasks.abort_all();
                        return Err(err);
                    }
                    Some(Ok(Ok(()))) => {}
                }
            }
            received = rx.recv() => {
                match received {
                    Some((index, merged)) => {
                        pending.insert(index, merged);
                        while let Some(merged) = pending.remove(&next_index) {
                            let path = &files[next_index];
                            commit_file(&config.plan_dir, path, &merged).await?;
                            on_stream(&file_finished_marker(path), None);
                            next_index += 1;
                        }
                    }
                    None if next_index < files.len() => {
                        return Err(ProposalError::Protocol(
                            "builder finished without producing a file".to_string(),
                        ));
                    }
                    None => {}
                }
            }
        }
    }

    Ok(())
}

/// Write a built file into the working tree
async fn commit_file(plan_dir: &Path, path: &str, body: &str) -> ProposalResult<()> {
    let target = plan_dir.join(path);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&target, body).await?;
    debug!(path, "committed built file");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn build_file(
    client: Arc<dyn ChatClient>,
    builder: ModelRoleConfig,
    chunk_timeout: Duration,
    plan_dir: PathBuf,
    index: usize,
    path: String,
    proposed: String,
    cancel: CancellationToken,
    on_stream: OnStream,
    tx: mpsc::Sender<(usize, String)>,
) -> ProposalResult<()> {
    let current = tokio::fs::read_to_string(plan_dir.join(&path))
        .await
        .unwrap_or_default();

    let messages = vec![
        ChatMessage::system(BUILD_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "File path: {path}\n\nCurrent file contents:\n```\n{current}\n```\n\nProposed change:\n```\n{proposed}\n```"
        )),
    ];
    let request = ChatRequest::new(messages, builder.sampling)
        .with_tool(merged_file_tool(&path))
        .streaming();

    // opening the stream is a network read like any other: race it against
    // cancellation
    let opened = tokio::select! {
        _ = cancel.cancelled() => return Err(ProposalError::Cancelled),
        opened = client.stream_chat(&builder.model, request) => opened,
    };
    let mut stream = opened?;
    let mut arguments = String::new();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(ProposalError::Cancelled),
            _ = tokio::time::sleep(chunk_timeout) => {
                error!(path, "builder stream timeout due to inactivity");
                return Err(ProposalError::StreamTimeout);
            }
            next = stream.next() => next,
        };

        match next {
            None => {
                return Err(ProposalError::Protocol(
                    "builder stream closed without finish reason".to_string(),
                ));
            }
            Some(Err(err)) => return Err(err.into()),
            Some(Ok(chunk)) => {
                if chunk.choices.len() != 1 {
                    return Err(ProposalError::Protocol(format!(
                        "builder stream chunk carried {} choices",
                        chunk.choices.len()
                    )));
                }
                if let Some(fragment) = chunk.tool_arguments() {
                    arguments.push_str(&fragment);
                    on_stream(&fragment, None);
                }
                let finished = chunk.choices[0]
                    .finish_reason
                    .as_deref()
                    .is_some_and(|r| !r.is_empty());
                if finished {
                    break;
                }
            }
        }
    }

    let merged: MergedFileArgs = serde_json::from_str(&arguments).map_err(|err| {
        ProposalError::Build {
            path: path.clone(),
            message: format!("builder returned malformed arguments: {err}"),
        }
    })?;

    if merged.content.trim().is_empty() && !declares_removal(&proposed) {
        return Err(ProposalError::Build {
            path: path.clone(),
            message: "builder returned an empty file".to_string(),
        });
    }

    // receiver gone means the run already terminated
    let _ = tx.send((index, merged.content)).await;
    Ok(())
}

fn merged_file_tool(path: &str) -> ToolDefinition {
    ToolDefinition {
        name: "write_merged_file".to_string(),
        description: format!(
            "Write the full contents of {path} after merging the proposed change"
        ),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The complete merged file body"
                }
            },
            "required": ["content"]
        }),
    }
}

/// True when the proposed block says the file's contents were removed
fn declares_removal(proposed: &str) -> bool {
    proposed
        .lines()
        .find(|line| !line.trim().is_empty())
        .is_some_and(|line| line.to_ascii_lowercase().contains(REMOVAL_MARKER))
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
