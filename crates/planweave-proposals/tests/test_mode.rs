//! Runtime test environment short-circuits the describe driver

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use planweave_providers::{
    AvailableModel, ChatClient, ChatRequest, ChunkStream, Completion, ModelCatalog,
    ModelPack, ProviderResult,
};
use planweave_proposals::{
    ContextPart, OnStream, PromptRequest, ProposalEngine, DESCRIPTION_PHASE,
    RUNTIME_ENV_VAR, STREAM_FINISHED,
};

/// Fails the test if the pipeline touches the provider at all
struct UnreachableClient;

#[async_trait]
impl ChatClient for UnreachableClient {
    async fn stream_chat(
        &self,
        _model: &AvailableModel,
        _request: ChatRequest,
    ) -> ProviderResult<ChunkStream> {
        panic!("provider must not be called in the test environment");
    }

    async fn complete(
        &self,
        _model: &AvailableModel,
        _request: ChatRequest,
    ) -> ProviderResult<Completion> {
        panic!("provider must not be called in the test environment");
    }
}

#[tokio::test]
async fn test_environment_streams_placeholder() {
    std::env::set_var(RUNTIME_ENV_VAR, "test");

    let catalog = ModelCatalog::builtin();
    let pack = ModelPack::uniform("test", "test pack", &catalog, "gpt-4o-2024-08-06").unwrap();
    let plans_dir = TempDir::new().unwrap();
    let engine = ProposalEngine::new(
        Arc::new(UnreachableClient),
        pack,
        plans_dir.path().to_path_buf(),
    );

    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let on_stream: OnStream = Arc::new(move |payload, err| {
        assert!(err.is_none());
        sink.lock().unwrap().push(payload.to_string());
    });

    let proposal_id = engine
        .create_proposal(
            PromptRequest {
                org_id: "org".to_string(),
                plan_id: "plan".to_string(),
                prompt: "anything".to_string(),
                model_context: vec![ContextPart {
                    path: None,
                    body: "context".to_string(),
                }],
                conversation: Vec::new(),
                conversation_summaries: Vec::new(),
                parent_proposal_id: None,
                root_proposal_id: None,
            },
            on_stream,
        )
        .await
        .unwrap();

    std::env::remove_var(RUNTIME_ENV_VAR);

    let events = events.lock().unwrap();
    assert_eq!(events.first().unwrap(), &proposal_id.to_string());
    assert_eq!(events.last().unwrap(), STREAM_FINISHED);
    assert!(events.iter().any(|e| e == DESCRIPTION_PHASE));
    assert!(engine.registry().is_empty());
}
