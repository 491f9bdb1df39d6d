//! Prompt assembly
//!
//! Builds the `[system, ...history, wrapped prompt]` message list under the
//! planner's token budget. When the full history does not fit, the earliest
//! sufficient conversation summary replaces the messages it covers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use planweave_providers::{ChatMessage, TokenCounter};

use crate::error::{ProposalError, ProposalResult};
use crate::models::{ContextPart, PromptRequest};

/// Fixed head of the system message, ahead of the formatted context
pub const SYSTEM_MESSAGE_HEAD: &str = r#"You are a careful coding assistant that turns a task into a concrete plan over the user's files.

Your instructions:

```
Based on the user-provided context, plan the task as follows:

1. Decide whether you have enough information and context to plan the task.
   If not, say so explicitly, ask for what is missing, and stop there.

2. Decide whether the task is small enough for a single response.
   a. If so, write out the code changes. Label every code block with its file
      path on its own line, like '- src/main.rs:', placed immediately before
      the opening triple backticks. No other lines may appear between the
      path label and the code block; explanations go before the label or
      after the block.
   b. If not, say you will break the task into subtasks, list them in a
      numbered list, and stop there.

Always include the language name after the opening triple backticks.

Include only the minimum code needed to describe each change: the lines that
change and the lines needed to locate them. If a file becomes empty because
everything was removed, leave a one-line comment starting with 'removed:'
saying what was removed.

Every file you reference must exist in the context or be a new file in the
same base directory as a context file.
```

User-provided context:"#;

/// Wrap the user's prompt for the final message
pub fn wrapped_prompt(prompt: &str) -> String {
    format!(
        "The user's latest prompt:\n```\n{prompt}\n```\n\nPlease respond according to the 'Your instructions' section above. Remember to label code blocks with the file path exactly as described in 2a."
    )
}

/// Format context parts into the text appended to the system head
pub fn format_context(parts: &[ContextPart]) -> String {
    let mut out = String::new();
    for part in parts {
        match &part.path {
            Some(path) => {
                out.push_str(&format!("\n\n- {path}:\n```\n{}\n```", part.body));
            }
            None => {
                out.push_str(&format!("\n\n```\n{}\n```", part.body));
            }
        }
    }
    out
}

/// The assembled message list and what it cost
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub messages: Vec<ChatMessage>,
    /// Set when a summary replaced part of the history
    pub summarized_to: Option<DateTime<Utc>>,
    pub total_tokens: usize,
}

/// Assemble the planner request under `max_tokens`
pub fn assemble(
    request: &PromptRequest,
    max_tokens: usize,
    counter: &TokenCounter,
) -> ProposalResult<AssembledPrompt> {
    let context_text = format_context(&request.model_context);
    let prompt_text = wrapped_prompt(&request.prompt);

    let base = counter.count(SYSTEM_MESSAGE_HEAD)
        + counter.count(&context_text)
        + counter.count(&prompt_text);

    if base > max_tokens {
        return Err(ProposalError::BudgetBeforeConversation {
            total: base,
            max: max_tokens,
        });
    }

    // cumulative conversation tokens indexed by message timestamp
    let mut conversation_tokens = 0;
    let mut tokens_up_to: HashMap<DateTime<Utc>, usize> = HashMap::new();
    for message in &request.conversation {
        conversation_tokens += message.tokens;
        tokens_up_to.insert(message.timestamp, conversation_tokens);
    }

    let mut chosen_summary = None;
    if base + conversation_tokens > max_tokens {
        // summaries arrive in timestamp order; the first that fits wins
        for summary in &request.conversation_summaries {
            let covered = *tokens_up_to
                .get(&summary.last_message_timestamp)
                .ok_or(ProposalError::SummaryMismatch(
                    summary.last_message_timestamp,
                ))?;
            let shrunk = conversation_tokens - covered + summary.tokens;
            if base + shrunk <= max_tokens {
                chosen_summary = Some((summary, shrunk));
                break;
            }
        }
        if chosen_summary.is_none() {
            return Err(ProposalError::BudgetAfterSummary);
        }
    }

    let mut messages = vec![ChatMessage::system(format!(
        "{SYSTEM_MESSAGE_HEAD}{context_text}"
    ))];

    let (summarized_to, final_conversation_tokens) = match chosen_summary {
        None => {
            for message in &request.conversation {
                messages.push(message.message.clone());
            }
            (None, conversation_tokens)
        }
        Some((summary, shrunk)) => {
            messages.push(ChatMessage::assistant(summary.summary.clone()));
            for message in &request.conversation {
                if message.timestamp > summary.last_message_timestamp {
                    messages.push(message.message.clone());
                }
            }
            (Some(summary.last_message_timestamp), shrunk)
        }
    };

    messages.push(ChatMessage::user(prompt_text));

    Ok(AssembledPrompt {
        messages,
        summarized_to,
        total_tokens: base + final_conversation_tokens,
    })
}
