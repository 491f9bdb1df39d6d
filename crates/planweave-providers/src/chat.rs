//! OpenAI-compatible chat-completion wire types
//!
//! Role-tagged messages, streaming delta chunks, and function-calling
//! definitions shared by every provider the engine talks to.

use serde::{Deserialize, Serialize};

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling configuration for a completion call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_p: f32,
}

impl SamplingConfig {
    pub fn new(temperature: f32, top_p: f32) -> Self {
        Self { temperature, top_p }
    }
}

/// A function the model may call, in OpenAI tool format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Function name
    pub name: String,
    /// What the function does
    pub description: String,
    /// JSON schema of the function parameters
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Wire form: `{"type": "function", "function": {...}}`
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Chat completion request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub sampling: SamplingConfig,
    pub stream: bool,
    /// Tools offered to the model; empty means plain text completion
    pub tools: Vec<ToolDefinition>,
    /// When set, force the model to call this tool
    pub tool_choice: Option<String>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>, sampling: SamplingConfig) -> Self {
        Self {
            messages,
            sampling,
            stream: false,
            tools: Vec::new(),
            tool_choice: None,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tool_choice = Some(tool.name.clone());
        self.tools.push(tool);
        self
    }
}

/// One tool-call argument fragment inside a streamed delta
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

/// Function fragment of a streamed tool call
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// The delta payload of one streamed choice
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChoiceDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// One choice inside a streamed chunk
#[derive(Debug, Clone, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: ChoiceDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// A streamed chat-completion chunk
#[derive(Debug, Clone, Deserialize)]
pub struct StreamChunk {
    pub choices: Vec<StreamChoice>,
}

impl StreamChunk {
    /// Text content of the single choice's delta, if any
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
    }

    /// Concatenated tool-call argument fragments of the single choice
    pub fn tool_arguments(&self) -> Option<String> {
        let calls = self.choices.first()?.delta.tool_calls.as_ref()?;
        let mut out = String::new();
        for call in calls {
            if let Some(function) = &call.function {
                if let Some(arguments) = &function.arguments {
                    out.push_str(arguments);
                }
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }
}

/// A completed (non-streamed) tool call
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: FunctionCall,
}

/// The function part of a completed tool call
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, exactly as the model produced them
    pub arguments: String,
}

/// The message of a completed choice
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// One choice of a non-streamed completion
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice {
    pub message: CompletionMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// A non-streamed chat completion
#[derive(Debug, Clone, Deserialize)]
pub struct Completion {
    pub choices: Vec<CompletionChoice>,
}

impl Completion {
    /// Text content of the first choice
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
    }

    /// Arguments of the first tool call of the first choice
    pub fn tool_arguments(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.tool_calls.as_ref())
            .and_then(|calls| calls.first())
            .map(|call| call.function.arguments.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_roles_serialize_lowercase() {
        let message = ChatMessage::system("head");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "head");
    }

    #[test]
    fn tool_definition_wire_format() {
        let tool = ToolDefinition {
            name: "write_merged_file".to_string(),
            description: "Write the full merged file".to_string(),
            parameters: serde_json::json!({"type": "object"}),
        };
        let wire = tool.to_wire();
        assert_eq!(wire["type"], "function");
        assert_eq!(wire["function"]["name"], "write_merged_file");
    }

    #[test]
    fn stream_chunk_content_and_tools() {
        let chunk: StreamChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"hi"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.content(), Some("hi"));
        assert!(chunk.tool_arguments().is_none());

        let chunk: StreamChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"con"}}]}}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.tool_arguments().as_deref(), Some("{\"con"));
    }

    #[test]
    fn completion_tool_arguments() {
        let completion: Completion = serde_json::from_str(
            r#"{"choices":[{"message":{"tool_calls":[{"id":"1","function":{"name":"describe_plan","arguments":"{\"commit_msg\":\"x\"}"}}]},"finish_reason":"tool_calls"}]}"#,
        )
        .unwrap();
        assert_eq!(
            completion.tool_arguments(),
            Some("{\"commit_msg\":\"x\"}")
        );
    }
}
