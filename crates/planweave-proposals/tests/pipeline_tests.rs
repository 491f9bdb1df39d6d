//! End-to-end pipeline tests against a scripted chat client

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;
use tempfile::TempDir;
use uuid::Uuid;

use planweave_providers::chat::{
    ChoiceDelta, Completion, CompletionChoice, CompletionMessage, FunctionCall,
    FunctionDelta, StreamChoice, StreamChunk, ToolCall, ToolCallDelta,
};
use planweave_providers::{
    AvailableModel, ChatClient, ChatRequest, ChunkStream, MessageRole, ModelCatalog,
    ModelPack, ProviderError, ProviderResult,
};
use planweave_proposals::{
    parse_file_finished_marker, ContextPart, ConvoMessage, OnStream, PlanDescription,
    PromptRequest, ProposalEngine, BUILD_PHASE, DESCRIPTION_PHASE, STREAM_FINISHED,
};

#[derive(Clone)]
enum ScriptEvent {
    Chunk(StreamChunk),
    Wait(Duration),
    Fail(ProviderError),
}

fn text_chunk(text: &str) -> ScriptEvent {
    ScriptEvent::Chunk(StreamChunk {
        choices: vec![StreamChoice {
            delta: ChoiceDelta {
                content: Some(text.to_string()),
                tool_calls: None,
            },
            finish_reason: None,
        }],
    })
}

fn finish_chunk() -> ScriptEvent {
    ScriptEvent::Chunk(StreamChunk {
        choices: vec![StreamChoice {
            delta: ChoiceDelta::default(),
            finish_reason: Some("stop".to_string()),
        }],
    })
}

fn tool_args_chunk(fragment: &str) -> ScriptEvent {
    ScriptEvent::Chunk(StreamChunk {
        choices: vec![StreamChoice {
            delta: ChoiceDelta {
                content: None,
                tool_calls: Some(vec![ToolCallDelta {
                    index: 0,
                    function: Some(FunctionDelta {
                        name: Some("write_merged_file".to_string()),
                        arguments: Some(fragment.to_string()),
                    }),
                }]),
            },
            finish_reason: None,
        }],
    })
}

fn multi_choice_chunk() -> ScriptEvent {
    let choice = StreamChoice {
        delta: ChoiceDelta {
            content: Some("x".to_string()),
            tool_calls: None,
        },
        finish_reason: None,
    };
    ScriptEvent::Chunk(StreamChunk {
        choices: vec![choice.clone(), choice],
    })
}

fn tool_completion(name: &str, arguments: &str) -> Completion {
    Completion {
        choices: vec![CompletionChoice {
            message: CompletionMessage {
                content: None,
                tool_calls: Some(vec![ToolCall {
                    id: "call-1".to_string(),
                    function: FunctionCall {
                        name: name.to_string(),
                        arguments: arguments.to_string(),
                    },
                }]),
            },
            finish_reason: Some("tool_calls".to_string()),
        }],
    }
}

fn text_completion(content: &str) -> Completion {
    Completion {
        choices: vec![CompletionChoice {
            message: CompletionMessage {
                content: Some(content.to_string()),
                tool_calls: None,
            },
            finish_reason: Some("stop".to_string()),
        }],
    }
}

/// Chat client that replays canned streams and completions
#[derive(Default)]
struct ScriptedClient {
    describe_streams: Mutex<VecDeque<Vec<ScriptEvent>>>,
    builder_streams: Mutex<HashMap<String, Vec<ScriptEvent>>>,
    completions: Mutex<VecDeque<Completion>>,
    stream_calls: AtomicUsize,
}

impl ScriptedClient {
    fn with_describe(self, script: Vec<ScriptEvent>) -> Self {
        self.describe_streams.lock().unwrap().push_back(script);
        self
    }

    fn with_builder(self, path: &str, script: Vec<ScriptEvent>) -> Self {
        self.builder_streams
            .lock()
            .unwrap()
            .insert(path.to_string(), script);
        self
    }

    fn with_completion(self, completion: Completion) -> Self {
        self.completions.lock().unwrap().push_back(completion);
        self
    }

    fn script_stream(script: Vec<ScriptEvent>) -> ChunkStream {
        futures::stream::iter(script)
            .filter_map(|event| async move {
                match event {
                    ScriptEvent::Chunk(chunk) => Some(Ok(chunk)),
                    ScriptEvent::Wait(duration) => {
                        tokio::time::sleep(duration).await;
                        None
                    }
                    ScriptEvent::Fail(err) => Some(Err(err)),
                }
            })
            .boxed()
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn stream_chat(
        &self,
        _model: &AvailableModel,
        request: ChatRequest,
    ) -> ProviderResult<ChunkStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);

        if request.tool_choice.as_deref() == Some("write_merged_file") {
            let user = request
                .messages
                .iter()
                .find(|m| m.role == MessageRole::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let path = user
                .lines()
                .find_map(|line| line.strip_prefix("File path: "))
                .unwrap_or_default()
                .to_string();
            let script = self
                .builder_streams
                .lock()
                .unwrap()
                .remove(&path)
                .unwrap_or_else(|| panic!("no builder script for {path}"));
            return Ok(Self::script_stream(script));
        }

        let script = self
            .describe_streams
            .lock()
            .unwrap()
            .pop_front()
            .expect("no describe script queued");
        Ok(Self::script_stream(script))
    }

    async fn complete(
        &self,
        _model: &AvailableModel,
        _request: ChatRequest,
    ) -> ProviderResult<Completion> {
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::Provider("no completion queued".to_string()))
    }
}

#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl Recorder {
    fn on_stream(&self) -> OnStream {
        let events = Arc::clone(&self.events);
        Arc::new(move |payload, err| {
            events
                .lock()
                .unwrap()
                .push((payload.to_string(), err.map(|e| e.to_string())));
        })
    }

    fn snapshot(&self) -> Vec<(String, Option<String>)> {
        self.events.lock().unwrap().clone()
    }

    /// Poll until a terminal event arrives
    async fn wait_terminal(&self) -> Vec<(String, Option<String>)> {
        for _ in 0..200 {
            let events = self.snapshot();
            if events
                .iter()
                .any(|(payload, err)| payload == STREAM_FINISHED || err.is_some())
            {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no terminal event arrived: {:?}", self.snapshot());
    }
}

fn engine(client: ScriptedClient, plans_dir: &TempDir) -> ProposalEngine {
    let catalog = ModelCatalog::builtin();
    let pack = ModelPack::uniform("test", "test pack", &catalog, "gpt-4o-2024-08-06").unwrap();
    ProposalEngine::new(
        Arc::new(client),
        pack,
        plans_dir.path().to_path_buf(),
    )
}

fn request() -> PromptRequest {
    PromptRequest {
        org_id: "org-1".to_string(),
        plan_id: "plan-1".to_string(),
        prompt: "add the feature".to_string(),
        model_context: vec![ContextPart {
            path: Some("a.go".to_string()),
            body: "package main".to_string(),
        }],
        conversation: Vec::new(),
        conversation_summaries: Vec::new(),
        parent_proposal_id: None,
        root_proposal_id: None,
    }
}

#[tokio::test]
async fn two_file_plan_streams_builds_and_commits_in_order() {
    let client = ScriptedClient::default()
        .with_describe(vec![
            text_chunk("Here is the plan:\n"),
            text_chunk("- a.go:\n```go\nX\n```\n"),
            text_chunk("- b.go:\n```go\nY\n```\n"),
            finish_chunk(),
        ])
        .with_completion(tool_completion(
            "describe_plan",
            r#"{"commit_msg":"add a and b"}"#,
        ))
        .with_builder(
            "a.go",
            vec![
                tool_args_chunk(r#"{"content":"#),
                tool_args_chunk(r#""merged a"}"#),
                finish_chunk(),
            ],
        )
        .with_builder(
            "b.go",
            vec![
                tool_args_chunk(r#"{"content":"merged b"}"#),
                finish_chunk(),
            ],
        );

    let plans_dir = TempDir::new().unwrap();
    let engine = engine(client, &plans_dir);
    let recorder = Recorder::default();

    let proposal_id = engine
        .create_proposal(request(), recorder.on_stream())
        .await
        .unwrap();

    let events = recorder.wait_terminal().await;

    // proposal id arrives first, before any content
    assert_eq!(events[0].0, proposal_id.to_string());
    assert!(events[0].1.is_none());

    let payloads: Vec<&str> = events.iter().map(|(p, _)| p.as_str()).collect();
    let description_at = payloads
        .iter()
        .position(|p| *p == DESCRIPTION_PHASE)
        .unwrap();
    let build_at = payloads.iter().position(|p| *p == BUILD_PHASE).unwrap();
    let finished_at = payloads
        .iter()
        .position(|p| *p == STREAM_FINISHED)
        .unwrap();
    assert!(description_at < build_at && build_at < finished_at);
    assert_eq!(finished_at, payloads.len() - 1);

    // the description frame carries the files in first-appearance order
    let description: PlanDescription =
        serde_json::from_str(payloads[description_at + 1]).unwrap();
    assert!(description.made_plan);
    assert_eq!(description.files, vec!["a.go", "b.go"]);
    assert_eq!(description.commit_summary, "add a and b");

    // per-file completion markers appear in files order
    let markers: Vec<&str> = payloads
        .iter()
        .filter_map(|p| parse_file_finished_marker(p))
        .collect();
    assert_eq!(markers, vec!["a.go", "b.go"]);

    // built files landed in the plan working tree
    let plan_dir = plans_dir.path().join("org-1").join("plan-1");
    assert_eq!(
        std::fs::read_to_string(plan_dir.join("a.go")).unwrap(),
        "merged a"
    );
    assert_eq!(
        std::fs::read_to_string(plan_dir.join("b.go")).unwrap(),
        "merged b"
    );

    // registry entry removed on terminal transition
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn no_plan_reply_finishes_without_build() {
    let client = ScriptedClient::default().with_describe(vec![
        text_chunk("I need more information to plan this task."),
        finish_chunk(),
    ]);

    let plans_dir = TempDir::new().unwrap();
    let engine = engine(client, &plans_dir);
    let recorder = Recorder::default();

    engine
        .create_proposal(request(), recorder.on_stream())
        .await
        .unwrap();
    let events = recorder.wait_terminal().await;

    let payloads: Vec<&str> = events.iter().map(|(p, _)| p.as_str()).collect();
    let description_at = payloads
        .iter()
        .position(|p| *p == DESCRIPTION_PHASE)
        .unwrap();
    let description: PlanDescription =
        serde_json::from_str(payloads[description_at + 1]).unwrap();
    assert!(!description.made_plan);
    assert!(description.files.is_empty());
    assert!(!payloads.contains(&BUILD_PHASE));
    assert_eq!(*payloads.last().unwrap(), STREAM_FINISHED);
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn silent_provider_times_out() {
    let client = ScriptedClient::default().with_describe(vec![ScriptEvent::Wait(
        Duration::from_secs(30),
    )]);

    let plans_dir = TempDir::new().unwrap();
    let engine =
        engine(client, &plans_dir).with_chunk_timeout(Duration::from_millis(50));
    let recorder = Recorder::default();

    engine
        .create_proposal(request(), recorder.on_stream())
        .await
        .unwrap();
    let events = recorder.wait_terminal().await;

    let (payload, err) = events.last().unwrap();
    assert!(payload.is_empty());
    assert!(err.as_deref().unwrap().contains("timeout"));
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn budget_exceeded_makes_no_provider_call() {
    let client = ScriptedClient::default();

    let plans_dir = TempDir::new().unwrap();
    let mut oversized = request();
    // far beyond the planner budget of the configured model
    oversized.model_context = vec![ContextPart {
        path: None,
        body: "x".repeat(1_000_000),
    }];

    let engine = engine(client, &plans_dir);
    let recorder = Recorder::default();

    let err = engine
        .create_proposal(oversized, recorder.on_stream())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("before conversation"));

    // only the proposal id was delivered; no provider traffic happened
    let events = recorder.snapshot();
    assert_eq!(events.len(), 1);
    assert!(Uuid::parse_str(&events[0].0).is_ok());
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn provider_too_long_rejection_surfaces_as_budget_error() {
    let client = ScriptedClient::default().with_describe(vec![
        text_chunk("working on it\n"),
        ScriptEvent::Fail(ProviderError::ContextTooLarge),
    ]);

    let plans_dir = TempDir::new().unwrap();
    let engine = engine(client, &plans_dir);
    let recorder = Recorder::default();

    engine
        .create_proposal(request(), recorder.on_stream())
        .await
        .unwrap();
    let events = recorder.wait_terminal().await;

    let (payload, err) = events.last().unwrap();
    assert!(payload.is_empty());
    let err = err.as_deref().unwrap();
    assert!(err.contains("budget"), "got: {err}");
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn multi_choice_chunk_is_protocol_error() {
    let client = ScriptedClient::default()
        .with_describe(vec![text_chunk("ok\n"), multi_choice_chunk()]);

    let plans_dir = TempDir::new().unwrap();
    let engine = engine(client, &plans_dir);
    let recorder = Recorder::default();

    engine
        .create_proposal(request(), recorder.on_stream())
        .await
        .unwrap();
    let events = recorder.wait_terminal().await;

    let (_, err) = events.last().unwrap();
    assert!(err.as_deref().unwrap().contains("2 choices"));
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn build_failure_cancels_siblings_and_surfaces() {
    let client = ScriptedClient::default()
        .with_describe(vec![
            text_chunk("- a.go:\n```go\nX\n```\n- b.go:\n```go\nY\n```\n"),
            finish_chunk(),
        ])
        .with_completion(tool_completion(
            "describe_plan",
            r#"{"commit_msg":"two files"}"#,
        ))
        // a.go returns an empty body without a removal marker: build error
        .with_builder(
            "a.go",
            vec![tool_args_chunk(r#"{"content":""}"#), finish_chunk()],
        )
        // b.go would hang forever; sibling cancellation must reap it
        .with_builder("b.go", vec![ScriptEvent::Wait(Duration::from_secs(60))]);

    let plans_dir = TempDir::new().unwrap();
    let engine = engine(client, &plans_dir);
    let recorder = Recorder::default();

    engine
        .create_proposal(request(), recorder.on_stream())
        .await
        .unwrap();
    let events = recorder.wait_terminal().await;

    let (_, err) = events.last().unwrap();
    assert!(err.as_deref().unwrap().contains("a.go"));
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn cancelling_during_build_reaps_file_tasks() {
    let client = ScriptedClient::default()
        .with_describe(vec![
            text_chunk("- a.go:\n```go\nX\n```\n"),
            finish_chunk(),
        ])
        .with_completion(tool_completion(
            "describe_plan",
            r#"{"commit_msg":"one file"}"#,
        ))
        .with_builder("a.go", vec![ScriptEvent::Wait(Duration::from_secs(60))]);

    let plans_dir = TempDir::new().unwrap();
    let engine = engine(client, &plans_dir);
    let recorder = Recorder::default();

    let proposal_id = engine
        .create_proposal(request(), recorder.on_stream())
        .await
        .unwrap();

    // wait until the build phase is underway, then cancel
    for _ in 0..200 {
        if recorder
            .snapshot()
            .iter()
            .any(|(payload, _)| payload == BUILD_PHASE)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(engine.cancel_proposal(proposal_id));

    // cancellation is silent: the registry drains without a terminal error
    for _ in 0..200 {
        if engine.registry().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(engine.registry().is_empty());
    let events = recorder.snapshot();
    assert!(!events
        .iter()
        .any(|(payload, err)| payload == STREAM_FINISHED || err.is_some()));
}

#[tokio::test]
async fn summarizer_stores_summary_for_root() {
    let client = ScriptedClient::default()
        .with_describe(vec![text_chunk("No changes needed."), finish_chunk()])
        .with_completion(text_completion("a compact summary of the conversation"));

    let plans_dir = TempDir::new().unwrap();
    let engine = engine(client, &plans_dir);
    let recorder = Recorder::default();

    let mut with_history = request();
    with_history.conversation = vec![
        ConvoMessage {
            message: planweave_providers::ChatMessage::user("earlier question"),
            tokens: 10,
            timestamp: chrono::Utc::now(),
        },
        ConvoMessage {
            message: planweave_providers::ChatMessage::assistant("earlier answer"),
            tokens: 12,
            timestamp: chrono::Utc::now(),
        },
    ];

    let proposal_id = engine
        .create_proposal(with_history, recorder.on_stream())
        .await
        .unwrap();
    recorder.wait_terminal().await;

    // the summarizer is detached; poll the store
    let mut stored = None;
    for _ in 0..200 {
        stored = engine.summaries().get(proposal_id);
        if stored.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let summary = stored.expect("summary should be stored for the root");
    assert_eq!(summary.summary, "a compact summary of the conversation");
    assert_eq!(summary.num_messages, 4);
    assert!(summary.tokens > 0);
}
